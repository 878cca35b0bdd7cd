//! clusterd-schema - the extensions registry and schema manager from
//! spec §4.2/§4.3.
//!
//! Grounded on `ormdb-core::migration` for the overall shape (ordered
//! migration list, applied-version bookkeeping) but specialized to raw SQL
//! text rather than ORMDB's native columnar migration plans, since the
//! replicated store here is a SQL database.

pub mod extensions;
pub mod migration;

pub use extensions::Extensions;
pub use migration::{AppliedVersions, Migration, MigrationOutcome, PreCheckDecision, SchemaManager};
