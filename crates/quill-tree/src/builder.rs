use std::collections::HashMap;

use quill_types::validate::PATH_SEPARATOR;
use quill_types::{Document, FileType};

use crate::node::{NodeKind, TreeNode};

/// The per-document metadata the builder needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry<'a> {
    pub id: String,
    pub path: &'a str,
    pub size: Option<u64>,
    pub file_type: Option<FileType>,
}

impl<'a> From<&'a Document> for FileEntry<'a> {
    fn from(doc: &'a Document) -> Self {
        Self {
            id: doc.id.to_string(),
            path: &doc.path,
            size: Some(doc.size),
            file_type: Some(doc.file_type),
        }
    }
}

/// Build a tree from a document listing.
pub fn build_document_tree(documents: &[Document]) -> TreeNode {
    build_tree(documents.iter().map(FileEntry::from))
}

/// Build a tree from flat file entries.
///
/// Each path is split on `/`; folder nodes are materialized for every
/// intermediate segment not yet present under the current parent
/// (deduplicated by parent and name) and a file node is attached at the last
/// segment. Empty segments are skipped; entries with no segments at all are
/// ignored. Runs in time linear in the total number of path segments, plus
/// the final sibling sort.
pub fn build_tree<'a, I>(entries: I) -> TreeNode
where
    I: IntoIterator<Item = FileEntry<'a>>,
{
    let mut arena = Arena::new();

    for entry in entries {
        let segments: Vec<&str> = entry
            .path
            .split(PATH_SEPARATOR)
            .filter(|s| !s.is_empty())
            .collect();
        let Some((file_name, folders)) = segments.split_last() else {
            continue;
        };

        let mut parent = Arena::ROOT;
        for &folder in folders {
            parent = arena.folder(parent, folder);
        }
        arena.file(parent, *file_name, entry);
    }

    arena.into_tree()
}

/// Flat node storage used while building; converted to nested
/// [`TreeNode`]s at the end.
struct Arena<'a> {
    nodes: Vec<ArenaNode>,
    folders: HashMap<(usize, &'a str), usize>,
}

struct ArenaNode {
    node: TreeNode,
    children: Vec<usize>,
}

impl<'a> Arena<'a> {
    const ROOT: usize = 0;

    fn new() -> Self {
        let root = TreeNode::folder(PATH_SEPARATOR.to_string(), String::new());
        Self {
            nodes: vec![ArenaNode {
                node: root,
                children: Vec::new(),
            }],
            folders: HashMap::new(),
        }
    }

    fn child_path(&self, parent: usize, name: &str) -> String {
        let parent_path = &self.nodes[parent].node.path;
        if parent == Self::ROOT {
            format!("{PATH_SEPARATOR}{name}")
        } else {
            format!("{parent_path}{PATH_SEPARATOR}{name}")
        }
    }

    fn push(&mut self, parent: usize, node: TreeNode) -> usize {
        let index = self.nodes.len();
        self.nodes.push(ArenaNode {
            node,
            children: Vec::new(),
        });
        self.nodes[parent].children.push(index);
        index
    }

    /// Index of the folder `name` under `parent`, created on first use.
    fn folder(&mut self, parent: usize, name: &'a str) -> usize {
        if let Some(&index) = self.folders.get(&(parent, name)) {
            return index;
        }
        let node = TreeNode::folder(self.child_path(parent, name), name.to_string());
        let index = self.push(parent, node);
        self.folders.insert((parent, name), index);
        index
    }

    fn file(&mut self, parent: usize, name: &str, entry: FileEntry<'_>) {
        let node = TreeNode {
            id: entry.id,
            name: name.to_string(),
            kind: NodeKind::File,
            path: self.child_path(parent, name),
            size: entry.size,
            file_type: entry.file_type,
            children: Vec::new(),
        };
        self.push(parent, node);
    }

    fn into_tree(self) -> TreeNode {
        let mut slots: Vec<Option<ArenaNode>> = self.nodes.into_iter().map(Some).collect();
        assemble(&mut slots, Self::ROOT)
    }
}

fn assemble(slots: &mut [Option<ArenaNode>], index: usize) -> TreeNode {
    let Some(ArenaNode { mut node, children }) = slots[index].take() else {
        // Every index is referenced by exactly one parent.
        unreachable!("arena node {index} visited twice");
    };
    node.children = children
        .into_iter()
        .map(|child| assemble(slots, child))
        .collect();
    node.children.sort_by(|a, b| {
        b.is_folder()
            .cmp(&a.is_folder())
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
    node
}
