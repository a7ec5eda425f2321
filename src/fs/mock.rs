// src/fs/mock.rs

use super::FileSystem;
use anyhow::{Result, anyhow};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

#[derive(Debug, Clone)]
pub enum MockEntry {
    File(Vec<u8>),
    Dir,
}

#[derive(Debug, Clone)]
struct MockNode {
    entry: MockEntry,
    modified: SystemTime,
}

#[derive(Debug, Default)]
struct MockState {
    nodes: BTreeMap<PathBuf, MockNode>,
    /// File names whose writes fail, for exercising cleanup paths.
    failing_writes: HashSet<String>,
}

/// In-memory filesystem. Clones share the same tree.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    state: Arc<Mutex<MockState>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let mut state = self.lock();
        insert_file(&mut state, path.as_ref(), content.into());
    }

    /// Make every subsequent write to a file with this name fail.
    pub fn fail_writes_to(&self, file_name: &str) {
        self.lock().failing_writes.insert(file_name.to_string());
    }

    pub fn set_modified(&self, path: impl AsRef<Path>, at: SystemTime) {
        if let Some(node) = self.lock().nodes.get_mut(path.as_ref()) {
            node.modified = at;
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A poisoned mock only happens after a test already panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_writable(state: &MockState, path: &Path) -> Result<()> {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if state.failing_writes.contains(name) {
            return Err(anyhow!("injected write failure: {:?}", path));
        }
        Ok(())
    }
}

fn ensure_ancestors(state: &mut MockState, path: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir.as_os_str().is_empty() {
            break;
        }
        state.nodes.entry(dir.to_path_buf()).or_insert(MockNode {
            entry: MockEntry::Dir,
            modified: SystemTime::now(),
        });
        current = dir.parent();
    }
}

fn insert_file(state: &mut MockState, path: &Path, content: Vec<u8>) {
    ensure_ancestors(state, path);
    state.nodes.insert(
        path.to_path_buf(),
        MockNode {
            entry: MockEntry::File(content),
            modified: SystemTime::now(),
        },
    );
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        let state = self.lock();
        match state.nodes.get(path).map(|n| &n.entry) {
            Some(MockEntry::File(content)) => {
                String::from_utf8(content.clone()).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
            }
            Some(MockEntry::Dir) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let mut state = self.lock();
        Self::check_writable(&state, path)?;
        insert_file(&mut state, path, contents.to_vec());
        Ok(())
    }

    fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        // A single map insert is already atomic under the mutex.
        self.write(path, contents)
    }

    fn create_dir_exclusive(&self, path: &Path) -> Result<bool> {
        let mut state = self.lock();
        if state.nodes.contains_key(path) {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !state.nodes.contains_key(parent) {
                return Err(anyhow!("parent directory missing: {:?}", parent));
            }
        }
        state.nodes.insert(
            path.to_path_buf(),
            MockNode {
                entry: MockEntry::Dir,
                modified: SystemTime::now(),
            },
        );
        Ok(true)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut state = self.lock();
        ensure_ancestors(&mut state, path);
        state.nodes.entry(path.to_path_buf()).or_insert(MockNode {
            entry: MockEntry::Dir,
            modified: SystemTime::now(),
        });
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let mut state = self.lock();
        match state.nodes.get(path).map(|n| &n.entry) {
            Some(MockEntry::File(_)) => {
                state.nodes.remove(path);
                Ok(())
            }
            Some(MockEntry::Dir) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        let mut state = self.lock();
        state.nodes.retain(|p, _| !p.starts_with(path));
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.lock().nodes.contains_key(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        matches!(
            self.lock().nodes.get(path).map(|n| &n.entry),
            Some(MockEntry::File(_))
        )
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.lock().nodes.get(path).map(|n| &n.entry), Some(MockEntry::Dir))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let state = self.lock();
        match state.nodes.get(path).map(|n| &n.entry) {
            Some(MockEntry::Dir) => Ok(state
                .nodes
                .keys()
                .filter(|p| p.parent() == Some(path))
                .cloned()
                .collect()),
            _ => Err(anyhow!("Not a directory or not found: {:?}", path)),
        }
    }

    fn modified(&self, path: &Path) -> Result<SystemTime> {
        self.lock()
            .nodes
            .get(path)
            .map(|n| n.modified)
            .ok_or_else(|| anyhow!("File not found: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_dir_lists_direct_children_only() {
        let fs = MockFileSystem::new();
        fs.add_file("/grid/tasks/T1.json", "{}");
        fs.add_file("/grid/tasks/T2.json", "{}");
        fs.create_dir_all(Path::new("/grid/tasks/T1.json.lock")).unwrap();
        fs.add_file("/grid/tasks/T1.json.lock/holder.json", "{}");

        let mut children = fs.read_dir(Path::new("/grid/tasks")).unwrap();
        children.sort();
        assert_eq!(
            children,
            vec![
                PathBuf::from("/grid/tasks/T1.json"),
                PathBuf::from("/grid/tasks/T1.json.lock"),
                PathBuf::from("/grid/tasks/T2.json"),
            ]
        );
    }

    #[test]
    fn remove_dir_all_drops_subtree() {
        let fs = MockFileSystem::new();
        fs.create_dir_all(Path::new("/a/b.lock")).unwrap();
        fs.add_file("/a/b.lock/holder.json", "{}");
        fs.add_file("/a/b", "data");

        fs.remove_dir_all(Path::new("/a/b.lock")).unwrap();
        assert!(!fs.exists(Path::new("/a/b.lock/holder.json")));
        assert!(fs.exists(Path::new("/a/b")));
    }

    #[test]
    fn injected_write_failure() {
        let fs = MockFileSystem::new();
        fs.fail_writes_to("holder.json");
        assert!(fs.write(Path::new("/x/holder.json"), b"{}").is_err());
        assert!(fs.write(Path::new("/x/other.json"), b"{}").is_ok());
    }
}
