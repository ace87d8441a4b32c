//! Data models

pub mod deployment;
pub mod history;
pub mod project;
pub mod rollout;
