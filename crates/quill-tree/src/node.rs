use std::fmt::Write;

use serde::{Deserialize, Serialize};

use quill_types::FileType;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
}

/// A node in a project tree. Only folders have children.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Document id for files, `folder:<path>` for folders.
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<FileType>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub(crate) fn folder(path: String, name: String) -> Self {
        Self {
            id: format!("folder:{path}"),
            name,
            kind: NodeKind::Folder,
            path,
            size: None,
            file_type: None,
            children: Vec::new(),
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    /// Number of file nodes in this subtree.
    pub fn count_files(&self) -> usize {
        match self.kind {
            NodeKind::File => 1,
            NodeKind::Folder => self.children.iter().map(TreeNode::count_files).sum(),
        }
    }

    /// Number of folder nodes in this subtree, excluding `self`.
    pub fn count_folders(&self) -> usize {
        self.children
            .iter()
            .filter(|c| c.is_folder())
            .map(|c| 1 + c.count_folders())
            .sum()
    }

    /// Find the node at `path` (e.g. `/chapters/intro.tex`).
    pub fn find(&self, path: &str) -> Option<&TreeNode> {
        let mut node = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            // A folder and a file may share a name; the folder wins.
            node = node
                .children
                .iter()
                .filter(|c| c.name == segment)
                .min_by_key(|c| !c.is_folder())?;
        }
        Some(node)
    }

    /// Indented plain-text rendering, one node per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            render_into(child, 0, &mut out);
        }
        out
    }
}

fn render_into(node: &TreeNode, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    match node.kind {
        NodeKind::Folder => {
            let _ = writeln!(out, "{indent}{}/", node.name);
            for child in &node.children {
                render_into(child, depth + 1, out);
            }
        }
        NodeKind::File => {
            let _ = match node.size {
                Some(size) => writeln!(out, "{indent}{} ({size} B)", node.name),
                None => writeln!(out, "{indent}{}", node.name),
            };
        }
    }
}
