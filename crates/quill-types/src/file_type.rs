use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Document file type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Tex,
    Bib,
    Sty,
    Cls,
    Png,
    Jpg,
    Pdf,
}

impl FileType {
    pub const ALL: [FileType; 7] = [
        FileType::Tex,
        FileType::Bib,
        FileType::Sty,
        FileType::Cls,
        FileType::Png,
        FileType::Jpg,
        FileType::Pdf,
    ];

    /// Binary types are always externalized to the blob store.
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Png | Self::Jpg | Self::Pdf)
    }

    /// Canonical file extension (without the dot).
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Tex => "tex",
            Self::Bib => "bib",
            Self::Sty => "sty",
            Self::Cls => "cls",
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Pdf => "pdf",
        }
    }

    /// MIME type used for blob writes and downloads.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Tex | Self::Sty | Self::Cls => "text/x-tex",
            Self::Bib => "text/x-bibtex",
            Self::Png => "image/png",
            Self::Jpg => "image/jpeg",
            Self::Pdf => "application/pdf",
        }
    }

    /// Infer the type from the extension of a path or file name.
    pub fn from_path(path: &str) -> Result<Self, TypeError> {
        let name = path.rsplit('/').next().unwrap_or(path);
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext.parse(),
            _ => Err(TypeError::UnknownFileType(name.to_string())),
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for FileType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tex" => Ok(Self::Tex),
            "bib" => Ok(Self::Bib),
            "sty" => Ok(Self::Sty),
            "cls" => Ok(Self::Cls),
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpg),
            "pdf" => Ok(Self::Pdf),
            _ => Err(TypeError::UnknownFileType(s.to_string())),
        }
    }
}
