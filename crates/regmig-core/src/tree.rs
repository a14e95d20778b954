//! Hierarchical index over a flat registry file listing.
//!
//! A tree is built once per registry job and then shared read-only with every
//! package, version and file job underneath it. Subtrees are handed out as
//! `Arc<TreeNode>` so descendants borrow the same nodes instead of copying
//! the listing.

use crate::error::{MigrateError, Result};
use crate::types::{normalize_uri, File};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;

/// One path segment of a registry tree
#[derive(Debug)]
pub struct TreeNode {
    pub name: String,
    /// Full path from the root, `/` for the root itself
    pub key: String,
    /// Non-leaf children first, then leaves, each group ordered by name
    pub children: Vec<Arc<TreeNode>>,
    pub is_leaf: bool,
    /// Owned file record, present exactly on leaves
    pub file: Option<File>,
    index: HashMap<String, usize>,
}

impl TreeNode {
    /// Look up a direct child by name
    pub fn child(&self, name: &str) -> Option<&Arc<TreeNode>> {
        self.index.get(name).map(|&i| &self.children[i])
    }

    /// Every file at or below this node, in tree order
    pub fn files(&self) -> Vec<&File> {
        let mut files = Vec::new();
        self.collect_files(&mut files);
        files
    }

    fn collect_files<'a>(&'a self, out: &mut Vec<&'a File>) {
        if let Some(ref file) = self.file {
            out.push(file);
        }
        for child in &self.children {
            child.collect_files(out);
        }
    }

    /// Direct children that are directories
    pub fn dirs(&self) -> impl Iterator<Item = &Arc<TreeNode>> {
        self.children.iter().filter(|c| !c.is_leaf)
    }

    /// Direct children that are files
    pub fn leaves(&self) -> impl Iterator<Item = &Arc<TreeNode>> {
        self.children.iter().filter(|c| c.is_leaf)
    }

    /// Total size of every file at or below this node
    pub fn size(&self) -> u64 {
        self.files().iter().map(|f| f.size).sum()
    }
}

#[derive(Default)]
struct NodeBuilder {
    children: BTreeMap<String, NodeBuilder>,
    file: Option<File>,
}

impl NodeBuilder {
    fn freeze(self, name: String, key: String) -> TreeNode {
        let mut children: Vec<Arc<TreeNode>> = self
            .children
            .into_iter()
            .map(|(child_name, builder)| {
                let child_key = if key == "/" {
                    format!("/{}", child_name)
                } else {
                    format!("{}/{}", key, child_name)
                };
                Arc::new(builder.freeze(child_name, child_key))
            })
            .collect();

        // BTreeMap already yields names in order, so a stable sort on leafness suffices
        children.sort_by_key(|c| c.is_leaf);

        let file = if children.is_empty() {
            self.file
        } else {
            if let Some(ref f) = self.file {
                warn!(uri = %f.uri, "File shadowed by a directory of the same name; dropping it");
            }
            None
        };

        let index = children
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();

        TreeNode {
            name,
            key,
            is_leaf: file.is_some(),
            file,
            children,
            index,
        }
    }
}

/// Build a tree from a flat file listing.
///
/// Folder records only contribute intermediate nodes. When a URI appears
/// twice the later record wins.
pub fn build_tree(files: Vec<File>) -> Arc<TreeNode> {
    let mut root = NodeBuilder::default();

    for file in files {
        let uri = normalize_uri(&file.uri);
        let mut node = &mut root;
        for segment in uri.split('/').filter(|s| !s.is_empty()) {
            node = node.children.entry(segment.to_string()).or_default();
        }
        if file.is_folder {
            continue;
        }
        if node.file.is_some() {
            warn!(uri = %uri, "Duplicate file in listing; keeping the last record");
        }
        node.file = Some(File { uri, ..file });
    }

    Arc::new(root.freeze(String::new(), "/".to_string()))
}

/// Resolve `path` relative to `root`, failing with `NotFound` if any segment is missing
pub fn get_node_for_path(root: &Arc<TreeNode>, path: &str) -> Result<Arc<TreeNode>> {
    let mut node = root;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        node = node
            .child(segment)
            .ok_or_else(|| MigrateError::NotFound(format!("path {} in registry tree", path)))?;
    }
    Ok(Arc::clone(node))
}

/// Every file at or below `node`
pub fn get_all_files(node: &TreeNode) -> Vec<&File> {
    node.files()
}
