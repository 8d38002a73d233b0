pub mod api;
pub mod config;
pub mod daemon;
pub mod error;
pub mod lease;
pub mod observability;
pub mod port;
pub mod rotation;
pub mod schedule;
pub mod state;
pub mod supervisor;
pub mod watcher;
