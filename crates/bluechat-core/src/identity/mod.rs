//! Local peer identity: generation, persistence and advertised form

pub mod storage;
pub mod store;

pub use storage::{FileStorage, IdentityStorage, MemoryStorage};
pub use store::{generate_identity, IdentityStore, IDENTITY_KEY};
