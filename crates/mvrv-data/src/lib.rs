//! mvrv-data crate

pub mod extract;
pub mod files;
pub mod node;
pub mod prices;
pub mod types;

pub use types::{DailyRealizedCap, MvrvRecord, PricePoint, UtxoRecord};
