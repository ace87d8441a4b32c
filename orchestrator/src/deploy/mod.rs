//! Deployment module

pub mod blue_green;
pub mod canary;
pub mod context;
pub mod engine;
pub mod fsm;
pub mod health;
pub mod history;
pub mod locks;
pub mod pipeline;
pub mod preview;
pub mod promote;
pub mod rollback;
pub mod rolling;
pub mod step;
pub mod steps;
pub mod strategy;
