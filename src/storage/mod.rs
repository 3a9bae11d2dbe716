//! Persistence collaborator for swap records.
//!
//! Records are stored as one JSON document per swap plus a handful of
//! columns that reconciliation sweeps filter on. Writes are single-record,
//! last-write-wins; there are no cross-swap transactions.

mod memory;
mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::swap::SwapType;

pub use memory::MemorySwapStorage;
pub use sqlite::SqliteSwapStorage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSwap {
    pub id: String,
    pub swap_type: SwapType,
    pub state: i32,
    pub version: u32,
    pub initiator: String,
    pub payment_hash: Option<String>,
    pub created_at: u64,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryField {
    Id,
    SwapType,
    State,
    Initiator,
    PaymentHash,
}

impl QueryField {
    fn column(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::SwapType => "swap_type",
            Self::State => "state",
            Self::Initiator => "initiator",
            Self::PaymentHash => "payment_hash",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Text(String),
    Int(i64),
}

/// Matches when `field` equals any of `values`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParam {
    pub field: QueryField,
    pub values: Vec<QueryValue>,
}

impl QueryParam {
    pub fn id(id: &str) -> Self {
        Self {
            field: QueryField::Id,
            values: vec![QueryValue::Text(id.to_owned())],
        }
    }

    pub fn swap_type(swap_type: SwapType) -> Self {
        Self {
            field: QueryField::SwapType,
            values: vec![QueryValue::Text(swap_type.as_str().to_owned())],
        }
    }

    pub fn states(states: &[i32]) -> Self {
        Self {
            field: QueryField::State,
            values: states.iter().map(|s| QueryValue::Int(i64::from(*s))).collect(),
        }
    }

    pub fn initiator(initiator: &str) -> Self {
        Self {
            field: QueryField::Initiator,
            values: vec![QueryValue::Text(initiator.to_owned())],
        }
    }

    pub fn payment_hash(payment_hash: &str) -> Self {
        Self {
            field: QueryField::PaymentHash,
            values: vec![QueryValue::Text(payment_hash.to_owned())],
        }
    }

    fn matches(&self, swap: &StoredSwap) -> bool {
        self.values.iter().any(|value| match (self.field, value) {
            (QueryField::Id, QueryValue::Text(v)) => swap.id == *v,
            (QueryField::SwapType, QueryValue::Text(v)) => swap.swap_type.as_str() == v,
            (QueryField::State, QueryValue::Int(v)) => i64::from(swap.state) == *v,
            (QueryField::Initiator, QueryValue::Text(v)) => swap.initiator == *v,
            (QueryField::PaymentHash, QueryValue::Text(v)) => {
                swap.payment_hash.as_deref() == Some(v.as_str())
            }
            _ => false,
        })
    }
}

/// `query` takes a disjunction of conjunctions: a row matches when every
/// param of at least one group matches. An empty group list matches all.
pub fn matches_query(swap: &StoredSwap, groups: &[Vec<QueryParam>]) -> bool {
    groups.is_empty()
        || groups
            .iter()
            .any(|group| group.iter().all(|param| param.matches(swap)))
}

#[async_trait]
pub trait SwapStorage: Send + Sync {
    async fn save(&self, swap: &StoredSwap) -> Result<()>;
    async fn save_all(&self, swaps: &[StoredSwap]) -> Result<()>;
    async fn remove(&self, id: &str) -> Result<()>;
    async fn remove_all(&self, ids: &[String]) -> Result<()>;
    async fn query(&self, groups: &[Vec<QueryParam>]) -> Result<Vec<StoredSwap>>;
}
