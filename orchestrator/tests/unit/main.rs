//! Integration tests of the orchestrator flows

mod support;
mod test_engine;
mod test_health;
mod test_ledger;
mod test_properties;
mod test_rollback;
