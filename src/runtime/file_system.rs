//! File system collaborator.
//!
//! [`FileSystemSync`] performs blocking operations. [`DefaultFileSystem`]
//! runs them as scheduled tasks and reports completion through callbacks, so
//! the caller (usually a script native holding the execution lane) never
//! blocks on disk I/O.

use crate::runtime::executor::Scheduler;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Result of a stat call. A missing path is reported as `exists == false`
/// rather than as an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatResult {
    pub exists: bool,
    pub is_directory: bool,
    pub is_file: bool,
    /// Milliseconds since the Unix epoch.
    pub last_modified: i64,
}

/// Blocking file operations.
pub trait FileSystemSync: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn remove(&self, path: &Path) -> io::Result<()>;
    fn stat(&self, path: &Path) -> io::Result<StatResult>;
    /// Map a script-supplied path to a real one.
    fn resolve(&self, path: &str) -> PathBuf;
}

/// [`FileSystemSync`] over `std::fs`, resolving relative paths against a base
/// directory.
pub struct DefaultFileSystemSync {
    base_path: PathBuf,
}

impl DefaultFileSystemSync {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

impl FileSystemSync for DefaultFileSystemSync {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        fs::write(path, data)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn stat(&self, path: &Path) -> io::Result<StatResult> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(StatResult::default()),
            Err(err) => return Err(err),
        };
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or(0);
        Ok(StatResult {
            exists: true,
            is_directory: metadata.is_dir(),
            is_file: metadata.is_file(),
            last_modified,
        })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.base_path.join(candidate)
        }
    }
}

pub type ReadCallback = Box<dyn FnOnce(Result<Vec<u8>, String>) + Send>;
pub type DoneCallback = Box<dyn FnOnce(Result<(), String>) + Send>;
pub type StatCallback = Box<dyn FnOnce(Result<StatResult, String>) + Send>;

/// Asynchronous file operations with callback completion.
///
/// Errors are rendered messages, ready to be handed to script.
pub trait FileSystem: Send + Sync {
    fn read(&self, path: &str, callback: ReadCallback);
    fn write(&self, path: &str, data: Vec<u8>, callback: DoneCallback);
    fn move_file(&self, from: &str, to: &str, callback: DoneCallback);
    fn remove(&self, path: &str, callback: DoneCallback);
    fn stat(&self, path: &str, callback: StatCallback);
}

/// Runs a [`FileSystemSync`] on a scheduler.
///
/// If the scheduler drops a task (for example after platform shutdown) its
/// callback is never invoked.
pub struct DefaultFileSystem {
    scheduler: Scheduler,
    sync: Arc<dyn FileSystemSync>,
}

impl DefaultFileSystem {
    pub fn new(scheduler: Scheduler, sync: Arc<dyn FileSystemSync>) -> Self {
        Self { scheduler, sync }
    }
}

fn describe(action: &str, path: &Path, err: io::Error) -> String {
    format!("Failed to {} {}: {}", action, path.display(), err)
}

impl FileSystem for DefaultFileSystem {
    fn read(&self, path: &str, callback: ReadCallback) {
        let sync = self.sync.clone();
        let path = sync.resolve(path);
        (self.scheduler)(Box::new(move || {
            callback(sync.read(&path).map_err(|e| describe("read", &path, e)));
        }));
    }

    fn write(&self, path: &str, data: Vec<u8>, callback: DoneCallback) {
        let sync = self.sync.clone();
        let path = sync.resolve(path);
        (self.scheduler)(Box::new(move || {
            callback(sync.write(&path, &data).map_err(|e| describe("write", &path, e)));
        }));
    }

    fn move_file(&self, from: &str, to: &str, callback: DoneCallback) {
        let sync = self.sync.clone();
        let from = sync.resolve(from);
        let to = sync.resolve(to);
        (self.scheduler)(Box::new(move || {
            callback(sync.rename(&from, &to).map_err(|e| describe("move", &from, e)));
        }));
    }

    fn remove(&self, path: &str, callback: DoneCallback) {
        let sync = self.sync.clone();
        let path = sync.resolve(path);
        (self.scheduler)(Box::new(move || {
            callback(sync.remove(&path).map_err(|e| describe("remove", &path, e)));
        }));
    }

    fn stat(&self, path: &str, callback: StatCallback) {
        let sync = self.sync.clone();
        let path = sync.resolve(path);
        (self.scheduler)(Box::new(move || {
            callback(sync.stat(&path).map_err(|e| describe("stat", &path, e)));
        }));
    }
}
