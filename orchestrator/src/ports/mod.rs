//! Host port ownership

pub mod ledger;
pub mod ranges;
pub mod store;
