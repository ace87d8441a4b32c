//! Filesystem helpers for persisted state

pub mod dir;
pub mod file;
