//! fleetdeploy library
//!
//! Port-safe container deployments with rolling, blue-green, canary and
//! preview strategies, a shared port ledger and version history.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod exec;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod notify;
pub mod ports;
pub mod routing;
pub mod storage;
pub mod utils;
