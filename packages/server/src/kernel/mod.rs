pub mod credentials;
pub mod deps;
pub mod dev_stubs;
pub mod memory_store;

pub use credentials::{CachingCredentialResolver, InlineCredentialCache};
pub use deps::ServerDeps;
pub use dev_stubs::{DevCollector, DevDriverFactory, StaticCredentialResolver};
pub use memory_store::{InMemoryCheckpointStore, InMemoryDedupStore};
