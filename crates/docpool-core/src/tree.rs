//! Directory tree built from stored document paths.
//!
//! Used to show how the workspace is organized without walking the disk.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Component, Path};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirNode {
    pub dirs: BTreeMap<String, DirNode>,
    pub files: Vec<String>,
}

impl DirNode {
    /// Files in this node and all nodes below it.
    pub fn file_count(&self) -> usize {
        self.files.len() + self.dirs.values().map(DirNode::file_count).sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirTree {
    pub root_name: String,
    pub root: DirNode,
    /// Paths that were not under the root.
    pub outside: usize,
    /// Paths deeper than the depth limit.
    pub truncated: usize,
}

impl DirTree {
    /// Build a tree of `paths` below `root`. With `max_depth`, paths with
    /// more than that many components below the root are left out.
    pub fn build<'a, I>(root: &Path, paths: I, max_depth: Option<usize>) -> Self
    where
        I: IntoIterator<Item = &'a Path>,
    {
        let mut tree = DirTree {
            root_name: root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| root.display().to_string()),
            root: DirNode::default(),
            outside: 0,
            truncated: 0,
        };

        for path in paths {
            let Ok(relative) = path.strip_prefix(root) else {
                tree.outside += 1;
                continue;
            };
            let parts: Vec<String> = relative
                .components()
                .filter_map(|c| match c {
                    Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect();
            let Some((file, dirs)) = parts.split_last() else {
                continue;
            };
            if max_depth.is_some_and(|depth| parts.len() > depth) {
                tree.truncated += 1;
                continue;
            }
            let mut node = &mut tree.root;
            for dir in dirs {
                node = node.dirs.entry(dir.clone()).or_default();
            }
            node.files.push(file.clone());
        }
        tree.sort_files();
        tree
    }

    fn sort_files(&mut self) {
        fn walk(node: &mut DirNode) {
            node.files.sort();
            node.dirs.values_mut().for_each(walk);
        }
        walk(&mut self.root);
    }

    /// Indented text rendering, directories first.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}/ ({})", self.root_name, self.root.file_count());
        render_node(&self.root, 1, &mut out);
        out
    }
}

fn render_node(node: &DirNode, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    for (name, child) in &node.dirs {
        let _ = writeln!(out, "{indent}{name}/ ({})", child.file_count());
        render_node(child, depth + 1, out);
    }
    for file in &node.files {
        let _ = writeln!(out, "{indent}{file}");
    }
}
