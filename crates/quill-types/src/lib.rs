//! Foundation types for Quill.
//!
//! This crate provides the identifiers, records, and validation rules shared
//! by every other Quill crate. It performs no I/O.
//!
//! # Key Types
//!
//! - [`UserId`] -- Verified caller identifier supplied by the identity layer
//! - [`ProjectId`] / [`DocumentId`] -- UUID v7 record identifiers
//! - [`BlobKey`] -- Key of an externalized object in the blob store
//! - [`Role`] / [`Access`] -- Collaborator roles and the capability predicate
//! - [`FileType`] -- Closed set of document file types
//! - [`Project`] / [`Collaborator`] -- Project records with embedded collaborators
//! - [`Document`] / [`ContentLocation`] -- Document records and content placement

pub mod document;
pub mod error;
pub mod file_type;
pub mod id;
pub mod project;
pub mod role;
pub mod validate;

pub use document::{ContentLocation, Document};
pub use error::TypeError;
pub use file_type::FileType;
pub use id::{BlobKey, DocumentId, ProjectId, UserId};
pub use project::{Collaborator, Project};
pub use role::{Access, Role};
