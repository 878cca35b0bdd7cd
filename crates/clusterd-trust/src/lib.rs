//! clusterd-trust - the authoritative local mapping from peer name to
//! `Remote`, watched for off-process edits.
//!
//! Grounded on `ormdb-core`'s persistence discipline (atomic
//! rename-over-temp writes) and on the `notify`-based hot-reload pattern
//! used for config watching in the load-test example in this pack.

pub mod remote;
pub mod store;
pub mod watcher;

pub use remote::Remote;
pub use store::Truststore;
pub use watcher::TruststoreWatcher;
