pub mod btc;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod error;
pub mod intermediary;
pub mod ledger;
pub mod lightning;
pub mod logging;
pub mod quote;
pub mod retry;
pub mod storage;
pub mod swap;
pub mod swapper;
pub mod wrapper;

pub use error::{Recovery, SwapError};
