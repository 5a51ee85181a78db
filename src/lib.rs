pub mod adapters;
pub mod alerts;
pub mod app;
pub mod commands;
pub mod config;
pub mod delivery;
pub mod ports;
pub mod recurrence;
pub mod retry;
pub mod runtime;
pub mod state;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use runtime::serve;
