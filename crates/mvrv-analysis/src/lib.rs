//! mvrv-analysis crate

pub mod chart;
pub mod mvrv;
pub mod realized;
