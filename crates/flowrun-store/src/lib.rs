pub mod connector;
pub mod memory;
pub mod store;

pub use connector::SqliteConnector;
pub use memory::MemoryCredentialStore;
pub use store::SqliteStore;
