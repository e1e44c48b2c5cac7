use quill_types::FileType;
use serde::{Deserialize, Serialize};

/// Where new content should be stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Inline,
    External,
}

impl std::fmt::Display for Placement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inline => write!(f, "inline"),
            Self::External => write!(f, "external"),
        }
    }
}

/// Decides inline vs. blob storage for document content.
///
/// Binary types always go to the blob store. Text content goes there only
/// when it is strictly longer than the threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlacementPolicy {
    threshold: u64,
}

impl PlacementPolicy {
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn decide(&self, file_type: FileType, len: u64) -> Placement {
        if file_type.is_binary() || len > self.threshold {
            Placement::External
        } else {
            Placement::Inline
        }
    }
}
