//! Folder/file tree reconstruction for Quill projects.
//!
//! Documents are stored flat, keyed by a project-relative path. This crate
//! turns such a listing into the nested folder/file view shown to users.
//! Building is pure: no I/O, and the input is never mutated.
//!
//! Sibling order is deterministic: folders first, then files, each group
//! sorted by name in byte order.

pub mod builder;
pub mod node;

pub use builder::{build_document_tree, build_tree, FileEntry};
pub use node::{NodeKind, TreeNode};
