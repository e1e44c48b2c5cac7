//! Field validation shared by the project and document managers.
//!
//! All checks are pure and run before any store call.

use std::collections::BTreeSet;

use crate::error::TypeError;
use crate::id::UserId;

pub const MAX_PROJECT_NAME_CHARS: usize = 200;
pub const MAX_DESCRIPTION_CHARS: usize = 1000;
pub const MAX_TAGS: usize = 20;
pub const MAX_TAG_CHARS: usize = 50;
pub const MAX_DOCUMENT_NAME_CHARS: usize = 255;
pub const MAX_PATH_CHARS: usize = 1024;
pub const MAX_USER_ID_CHARS: usize = 255;

/// Path separator for project-relative document paths.
pub const PATH_SEPARATOR: char = '/';

/// Check a caller or collaborator id handed over by the identity layer.
///
/// Ids are opaque, so only blank, oversized or control-character ids are
/// rejected. Nothing is trimmed.
pub fn user_id(id: &UserId) -> Result<(), TypeError> {
    let id = id.as_str();
    if id.trim().is_empty() {
        return Err(TypeError::field("user id", "must not be blank"));
    }
    if id.chars().count() > MAX_USER_ID_CHARS {
        return Err(TypeError::field(
            "user id",
            format!("longer than {MAX_USER_ID_CHARS} characters"),
        ));
    }
    if id.chars().any(char::is_control) {
        return Err(TypeError::field("user id", "contains control characters"));
    }
    Ok(())
}

/// Validate and trim a project name (1–200 chars).
pub fn project_name(name: &str) -> Result<String, TypeError> {
    bounded_text("project name", name, MAX_PROJECT_NAME_CHARS)
}

/// Validate a project description (at most 1000 chars, may be empty).
pub fn description(text: &str) -> Result<String, TypeError> {
    if text.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(TypeError::field(
            "description",
            format!("longer than {MAX_DESCRIPTION_CHARS} characters"),
        ));
    }
    Ok(text.to_string())
}

/// Validate a tag list and collapse it into a sorted set.
pub fn tags<I, S>(tags: I) -> Result<BTreeSet<String>, TypeError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut set = BTreeSet::new();
    for tag in tags {
        set.insert(bounded_text("tag", tag.as_ref(), MAX_TAG_CHARS)?);
    }
    if set.len() > MAX_TAGS {
        return Err(TypeError::field(
            "tags",
            format!("more than {MAX_TAGS} tags"),
        ));
    }
    Ok(set)
}

/// Validate and trim a document display name (1–255 chars, no separator).
pub fn document_name(name: &str) -> Result<String, TypeError> {
    let name = bounded_text("document name", name, MAX_DOCUMENT_NAME_CHARS)?;
    if name.contains(PATH_SEPARATOR) {
        return Err(TypeError::field("document name", "must not contain '/'"));
    }
    Ok(name)
}

/// Validate a project-relative document path.
///
/// Paths are absolute within the project (`/chapters/intro.tex`), have no
/// empty, `.` or `..` segments, and do not end with a separator.
pub fn document_path(path: &str) -> Result<(), TypeError> {
    let invalid = |reason: &str| TypeError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if !path.starts_with(PATH_SEPARATOR) {
        return Err(invalid("must start with '/'"));
    }
    if path.len() == 1 {
        return Err(invalid("must name a file"));
    }
    if path.chars().count() > MAX_PATH_CHARS {
        return Err(invalid("too long"));
    }
    if path.chars().any(char::is_control) {
        return Err(invalid("contains control characters"));
    }
    for segment in path[1..].split(PATH_SEPARATOR) {
        match segment {
            "" => return Err(invalid("empty segment")),
            "." | ".." => return Err(invalid("relative segment")),
            _ => {}
        }
    }
    Ok(())
}

fn bounded_text(field: &'static str, value: &str, max: usize) -> Result<String, TypeError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TypeError::field(field, "must not be empty"));
    }
    if trimmed.chars().count() > max {
        return Err(TypeError::field(field, format!("longer than {max} characters")));
    }
    Ok(trimmed.to_string())
}
