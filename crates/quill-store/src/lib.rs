//! Storage boundaries for Quill.
//!
//! Quill keeps structured records and document bytes in two independently
//! failing backends. This crate defines both boundaries and ships backends
//! for tests, embedding and single-node deployments.
//!
//! # Boundaries
//!
//! - [`MetadataStore`] -- project and document records, conditional updates
//!   keyed on a version token, and the unique `(project, path)` index
//! - [`BlobStore`] -- byte objects addressed by [`BlobKey`](quill_types::BlobKey),
//!   with optional expiring pre-authorized download links
//!
//! # Backends
//!
//! - [`InMemoryMetadataStore`] -- `HashMap`-based record store
//! - [`InMemoryBlobStore`] -- `HashMap`-based object store with signed links
//! - [`FsBlobStore`] -- object store rooted at a local directory
//!
//! # Design Rules
//!
//! 1. A conditional update either applies every change or none of them.
//! 2. No lock is held across an `.await`; each call is one critical section.
//! 3. Backends never interpret document bytes.
//! 4. Transient failures are reported as such (see [`StoreError::is_transient`]).

pub mod blob;
pub mod blob_fs;
pub mod blob_memory;
pub mod error;
pub mod memory;
pub mod query;
pub mod traits;

pub use blob::{BlobMeta, ByteReader, PresignedUrl};
pub use blob_fs::FsBlobStore;
pub use blob_memory::InMemoryBlobStore;
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryMetadataStore;
pub use query::{
    DocumentChanges, DocumentFilter, Membership, Page, PageRequest, ProjectChanges,
    ProjectFilter, ProjectSort,
};
pub use traits::{BlobStore, MetadataStore};
