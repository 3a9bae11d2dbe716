pub mod invoice;

pub use invoice::{ParsedInvoice, new_secret, parse_bolt11, sha256_preimage};
