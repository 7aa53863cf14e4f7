use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tether_snapshot::{ProjectInfo, Workspace};
use tether_store::ContentStore;
use tether_types::{Checksum, DocumentId, ProjectId};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Directories never loaded as source.
const SKIPPED_DIRS: &[&str] = &["target", "node_modules"];

/// Load every UTF-8 file under `root` into a fresh workspace as a single
/// project. Ids derive from relative paths, so loading the same tree twice
/// yields the same snapshot checksum.
pub fn load_directory(root: &Path, store: Arc<dyn ContentStore>) -> anyhow::Result<Workspace> {
    let name = root
        .canonicalize()
        .with_context(|| format!("resolving {}", root.display()))?
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());

    let mut workspace = Workspace::new(store)?;
    let project = workspace.add_project(
        ProjectInfo::new(name.clone(), "text").with_id(ProjectId::from_u128(stable_id(&name))),
    )?;

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !skipped(e));
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("{} is outside {}", entry.path().display(), root.display()))?;
        let doc_name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let bytes = fs::read(entry.path())
            .with_context(|| format!("reading {}", entry.path().display()))?;
        let Ok(text) = String::from_utf8(bytes) else {
            debug!(path = %entry.path().display(), "skipping non-UTF-8 file");
            continue;
        };
        let id = DocumentId::from_u128(stable_id(&doc_name));
        workspace.add_document_with_id(project, id, doc_name, text)?;
    }
    Ok(workspace)
}

fn skipped(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || (entry.file_type().is_dir() && SKIPPED_DIRS.contains(&name.as_ref()))
}

fn stable_id(key: &str) -> u128 {
    let digest = Checksum::of(key.as_bytes());
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&digest.as_bytes()[..16]);
    u128::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_store::InMemoryContentStore;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::create_dir_all(dir.path().join("target/debug")).unwrap();
        fs::write(dir.path().join("README.md"), "# demo\n").unwrap();
        fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();
        fs::write(dir.path().join("src/nested/util.rs"), "pub fn util() {}\n").unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref: main\n").unwrap();
        fs::write(dir.path().join("target/debug/out"), "build output").unwrap();
        fs::write(dir.path().join("logo.bin"), [0xffu8, 0xfe, 0x00]).unwrap();
        dir
    }

    fn load(root: &Path) -> Workspace {
        load_directory(root, Arc::new(InMemoryContentStore::new())).unwrap()
    }

    #[test]
    fn loads_text_files_with_relative_names() {
        let dir = tree();
        let snapshot = load(dir.path()).current();
        let mut names: Vec<_> = snapshot.documents().map(|d| d.name().to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["README.md", "src/main.rs", "src/nested/util.rs"]);
        assert_eq!(snapshot.projects().count(), 1);
    }

    #[test]
    fn same_tree_same_checksum() {
        let dir = tree();
        let a = load(dir.path()).current().checksum();
        let b = load(dir.path()).current().checksum();
        assert_eq!(a, b);

        fs::write(dir.path().join("src/main.rs"), "fn main() { run() }\n").unwrap();
        assert_ne!(load(dir.path()).current().checksum(), a);
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent");
        assert!(load_directory(&missing, Arc::new(InMemoryContentStore::new())).is_err());
    }
}
