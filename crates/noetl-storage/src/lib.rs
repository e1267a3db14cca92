//! Postgres implementation of noetl-core's storage traits.

pub mod encryption;
pub mod event_store;
pub mod keychain_store;
pub mod pool;
pub mod queue_store;
pub mod result_ref_store;

pub use encryption::EncryptionService;
pub use event_store::PgEventStore;
pub use keychain_store::PgKeychainStore;
pub use pool::{connect, connect_from_env, run_migrations};
pub use queue_store::PgQueueStore;
pub use result_ref_store::PgResultRefStore;
