//! Project and document management for Quill.
//!
//! Two managers sit on top of the storage boundaries from `quill-store`:
//!
//! - [`ProjectManager`] -- projects, collaborators, and the role-based access
//!   checks every other operation goes through
//! - [`DocumentManager`] -- documents whose bytes live either inline in the
//!   metadata record or in the blob store, chosen by [`PlacementPolicy`]
//!
//! [`Quill`] wires both over one pair of stores.
//!
//! # Concurrency
//!
//! There is no global lock. Document writes are compare-and-set on the
//! document version; collaborator changes are compare-and-set on the project
//! revision and retried a bounded number of times. Every store call is
//! bounded by [`CoreConfig::store_timeout`]; an elapsed call is a transient
//! [`CoreError::Storage`].
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use quill_core::{CoreConfig, NewDocument, NewProject, Quill};
//! use quill_types::UserId;
//!
//! # async fn demo() -> quill_core::CoreResult<()> {
//! let quill = Quill::in_memory(CoreConfig::default())?;
//! let me = UserId::new("ada");
//! let project = quill.projects().create(&me, NewProject::named("Thesis")).await?;
//! let main = NewDocument::from_path("/main.tex", Bytes::from_static(b"\\documentclass{article}"))?;
//! quill.documents().create(&project.id, &me, main).await?;
//! let tree = quill.documents().tree(&project.id, &me).await?;
//! println!("{}", tree.render());
//! # Ok(())
//! # }
//! ```

pub mod config;
mod deadline;
pub mod document;
pub mod error;
pub mod placement;
pub mod project;
pub mod quill;

#[cfg(test)]
mod test_support;

pub use config::{ConfigError, CoreConfig};
pub use document::{
    DocumentContent, DocumentManager, DocumentUpdate, Download, NewDocument, PurgeReport,
    UploadRequest,
};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use placement::{Placement, PlacementPolicy};
pub use project::{NewCollaborator, NewProject, ProjectManager, ProjectUpdate};
pub use quill::Quill;
