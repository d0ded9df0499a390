//! This module contains the authentication storage backend trait and implementations
use self::{
    authentication::Authentication,
    backends::{file::FileStorageError, memory::MemoryStorageError},
};

pub mod authentication;
pub mod backends;
pub mod storage;

pub use storage::AuthenticationStorage;

/// An error that can occur when accessing an authentication storage backend
#[derive(thiserror::Error, Debug)]
pub enum AuthenticationStorageError {
    /// An error occurred in the file storage backend
    #[error(transparent)]
    FileStorageError(#[from] FileStorageError),

    /// An error occurred in the memory storage backend
    #[error(transparent)]
    MemoryStorageError(#[from] MemoryStorageError),

    /// All configured backends failed to store or retrieve credentials
    #[error("{0}")]
    StorageError(String),
}

/// A trait that defines the interface for authentication storage backends
pub trait StorageBackend: std::fmt::Debug {
    /// Store the given authentication information for the given host
    fn store(
        &self,
        host: &str,
        authentication: &Authentication,
    ) -> Result<(), AuthenticationStorageError>;

    /// Retrieve the authentication information for the given host
    fn get(&self, host: &str) -> Result<Option<Authentication>, AuthenticationStorageError>;

    /// Delete the authentication information for the given host
    fn delete(&self, host: &str) -> Result<(), AuthenticationStorageError>;
}
