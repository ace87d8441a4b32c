//! Persisted state: directory layout, settings and key/value documents

pub mod layout;
pub mod settings;
pub mod state;
