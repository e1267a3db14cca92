//! Worker process: leases queue items from noetl-api over HTTP, runs
//! each step's rendered pipeline against the builtin tool adapters, and
//! reports the outcome back as events and queue transitions. Never
//! touches storage directly.

pub mod client;
pub mod config;
pub mod pipeline;
pub mod runner;
