// Authentication module
// Credential persistence, single-flight refresh, session teardown

mod coordinator;
mod session;
mod store;

pub use coordinator::RefreshCoordinator;
pub use session::{Navigator, SessionGuard};
pub use store::{CredentialStore, KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore};
