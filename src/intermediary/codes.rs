//! Closed sets of intermediary status codes.
//!
//! Each status endpoint declares a fixed set of numeric codes. Anything
//! outside that set, or a payload that does not decode for its code, is an
//! integrity error against the counterparty.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::StatusResponse;
use crate::error::SwapError;
use crate::ledger::{EscrowData, SignatureData};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentProof {
    pub tx_id: Option<String>,
    pub secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationData {
    pub escrow: EscrowData,
    pub signature: SignatureData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIdData {
    pub tx_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundAuthorization {
    RefundData(SignatureData),
    Paid(PaymentProof),
    NotFound,
    Pending,
    Expired,
}

impl RefundAuthorization {
    pub const REFUND_DATA: u32 = 20000;
    pub const PAID: u32 = 20006;
    pub const NOT_FOUND: u32 = 20007;
    pub const PENDING: u32 = 20008;
    pub const EXPIRED: u32 = 20010;

    pub fn parse(url: &str, resp: StatusResponse) -> Result<Self, SwapError> {
        match resp.code {
            Self::REFUND_DATA => Ok(Self::RefundData(payload(url, &resp)?)),
            Self::PAID => Ok(Self::Paid(payload(url, &resp)?)),
            Self::NOT_FOUND => Ok(Self::NotFound),
            Self::PENDING => Ok(Self::Pending),
            Self::EXPIRED => Ok(Self::Expired),
            other => Err(unknown_code(url, "refund authorization", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentAuthorization {
    AuthData(AuthorizationData),
    Expired,
    Paid,
    Pending,
    AlreadyCommitted,
}

impl PaymentAuthorization {
    pub const AUTH_DATA: u32 = 10000;
    pub const EXPIRED: u32 = 10001;
    pub const PAID: u32 = 10002;
    pub const PENDING: u32 = 10003;
    pub const ALREADY_COMMITTED: u32 = 10004;

    pub fn parse(url: &str, resp: StatusResponse) -> Result<Self, SwapError> {
        match resp.code {
            Self::AUTH_DATA => Ok(Self::AuthData(payload(url, &resp)?)),
            Self::EXPIRED => Ok(Self::Expired),
            Self::PAID => Ok(Self::Paid),
            Self::PENDING => Ok(Self::Pending),
            Self::ALREADY_COMMITTED => Ok(Self::AlreadyCommitted),
            other => Err(unknown_code(url, "payment authorization", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoiceStatus {
    Paid(TxIdData),
    Expired,
    AwaitPayment,
    Pending,
    TxSent(TxIdData),
}

impl InvoiceStatus {
    pub const PAID: u32 = 10000;
    pub const EXPIRED: u32 = 10001;
    pub const AWAIT_PAYMENT: u32 = 10010;
    pub const PENDING: u32 = 10011;
    pub const TX_SENT: u32 = 10012;

    pub fn parse(url: &str, resp: StatusResponse) -> Result<Self, SwapError> {
        match resp.code {
            Self::PAID => Ok(Self::Paid(payload(url, &resp)?)),
            Self::EXPIRED => Ok(Self::Expired),
            Self::AWAIT_PAYMENT => Ok(Self::AwaitPayment),
            Self::PENDING => Ok(Self::Pending),
            Self::TX_SENT => Ok(Self::TxSent(payload(url, &resp)?)),
            other => Err(unknown_code(url, "invoice status", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressPaymentData {
    pub btc_tx_id: Option<String>,
    pub tx_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressStatus {
    Paid(AddressPaymentData),
    Expired,
    AwaitPayment,
    AwaitConfirmation(AddressPaymentData),
    TxSent(AddressPaymentData),
    Pending(AddressPaymentData),
    Refunded(AddressPaymentData),
    DoubleSpent(AddressPaymentData),
    Refundable(AddressPaymentData),
}

impl AddressStatus {
    pub const PAID: u32 = 10000;
    pub const EXPIRED: u32 = 10001;
    pub const AWAIT_PAYMENT: u32 = 10010;
    pub const AWAIT_CONFIRMATION: u32 = 10011;
    pub const TX_SENT: u32 = 10012;
    pub const PENDING: u32 = 10013;
    pub const REFUNDED: u32 = 10014;
    pub const DOUBLE_SPENT: u32 = 10015;
    pub const REFUNDABLE: u32 = 10016;

    pub fn parse(url: &str, resp: StatusResponse) -> Result<Self, SwapError> {
        match resp.code {
            Self::PAID => Ok(Self::Paid(payload(url, &resp)?)),
            Self::EXPIRED => Ok(Self::Expired),
            Self::AWAIT_PAYMENT => Ok(Self::AwaitPayment),
            Self::AWAIT_CONFIRMATION => Ok(Self::AwaitConfirmation(payload(url, &resp)?)),
            Self::TX_SENT => Ok(Self::TxSent(payload(url, &resp)?)),
            Self::PENDING => Ok(Self::Pending(payload(url, &resp)?)),
            Self::REFUNDED => Ok(Self::Refunded(payload(url, &resp)?)),
            Self::DOUBLE_SPENT => Ok(Self::DoubleSpent(payload(url, &resp)?)),
            Self::REFUNDABLE => Ok(Self::Refundable(payload(url, &resp)?)),
            other => Err(unknown_code(url, "address status", other)),
        }
    }
}

fn payload<T: DeserializeOwned>(url: &str, resp: &StatusResponse) -> Result<T, SwapError> {
    let data = resp.data.clone().ok_or_else(|| {
        SwapError::integrity(Some(url), format!("status {} without payload", resp.code))
    })?;
    serde_json::from_value(data).map_err(|e| {
        SwapError::integrity(
            Some(url),
            format!("malformed payload for status {}: {e}", resp.code),
        )
    })
}

fn unknown_code(url: &str, endpoint: &str, code: u32) -> SwapError {
    SwapError::integrity(Some(url), format!("unknown {endpoint} code {code}"))
}
