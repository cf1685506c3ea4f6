//! `docpool tree`: print the directory layout of the documents the store
//! knows about, built from their recorded paths without reading the disk.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::debug;

use docpool_core::store::DocumentStore;
use docpool_core::tree::DirTree;

use crate::config::Config;
use crate::orchestrator;

/// Tree of every stored document path under `root`.
pub async fn build_tree<S: DocumentStore + ?Sized>(
    store: &S,
    root: &Path,
    depth: Option<usize>,
) -> Result<DirTree> {
    let documents = store.all_documents().await?;
    let tree = DirTree::build(root, documents.iter().map(|d| d.path.as_path()), depth);
    if tree.outside > 0 {
        debug!(count = tree.outside, root = %root.display(), "documents outside the tree root");
    }
    Ok(tree)
}

pub async fn run_tree(config: &Config, dir: Option<PathBuf>, depth: Option<usize>) -> Result<()> {
    let orchestrator = orchestrator::open(config).await?;
    let root = dir.unwrap_or_else(|| config.workspace.root.clone());
    // Stored paths are canonical; match them when the root exists.
    let root = root.canonicalize().unwrap_or(root);

    let tree = build_tree(orchestrator.store(), &root, depth).await?;
    print!("{}", tree.render());
    if tree.truncated > 0 {
        println!("({} documents deeper than the depth limit not shown)", tree.truncated);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docpool_core::models::NewDocument;
    use docpool_core::store::memory::InMemoryStore;

    #[tokio::test]
    async fn tree_counts_files_per_directory() {
        let store = InMemoryStore::new();
        let docs: Vec<NewDocument> = ["/w/a.txt", "/w/x/b.txt", "/w/x/y/c.txt", "/elsewhere/d.txt"]
            .iter()
            .enumerate()
            .map(|(i, p)| NewDocument {
                fingerprint: format!("fp{i}"),
                path: PathBuf::from(p),
                text_slice: String::new(),
            })
            .collect();
        store.insert_documents(&docs).await.unwrap();

        let tree = build_tree(&store, Path::new("/w"), None).await.unwrap();
        assert_eq!(tree.outside, 1);
        assert_eq!(tree.root.file_count(), 3);

        let shallow = build_tree(&store, Path::new("/w"), Some(2)).await.unwrap();
        assert_eq!(shallow.truncated, 1);
        assert_eq!(shallow.root.file_count(), 2);
    }
}
