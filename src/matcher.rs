use std::cell::OnceCell;
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Result, ScanFailure};
use crate::indicators::MANIFEST_FILE_NAME;

/// A matched file. Content is read on first access and cached, so a file is
/// never read twice no matter how many checks look at it.
#[derive(Debug)]
pub struct FileDescriptor {
    path: PathBuf,
    base_name: String,
    directory: PathBuf,
    content: OnceCell<std::result::Result<String, String>>,
}

impl FileDescriptor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let base_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();

        Self {
            path,
            base_name,
            directory,
            content: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn is_manifest(&self) -> bool {
        self.base_name == MANIFEST_FILE_NAME
    }

    /// File content as text. Invalid UTF-8 is replaced rather than rejected;
    /// the error carries the I/O failure message.
    pub fn content(&self) -> std::result::Result<&str, String> {
        self.content
            .get_or_init(|| {
                fs::read(&self.path)
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .map_err(|e| e.to_string())
            })
            .as_deref()
            .map_err(Clone::clone)
    }
}

/// A directory entry that could not be inspected during traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryError {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct FileMatcher {
    follow_symlinks: bool,
}

impl FileMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Start a traversal of `root` yielding regular files whose base name is
    /// exactly one of `names`. Hidden entries are included. Fails only when
    /// the root itself is missing or cannot be inspected.
    pub fn find(&self, root: &Path, names: &BTreeSet<String>) -> Result<MatchIter> {
        match fs::metadata(root) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ScanFailure::RootNotFound(root.to_path_buf()));
            }
            Err(source) => {
                return Err(ScanFailure::Io {
                    path: root.to_path_buf(),
                    source,
                });
            }
        }

        let walker = WalkDir::new(root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name()
            .into_iter();

        Ok(MatchIter {
            walker,
            names: names.clone(),
        })
    }
}

/// Iterator returned by [`FileMatcher::find`]. Traversal order is sorted by
/// file name within each directory, so it is stable between runs.
pub struct MatchIter {
    walker: walkdir::IntoIter,
    names: BTreeSet<String>,
}

impl Iterator for MatchIter {
    type Item = std::result::Result<FileDescriptor, EntryError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.walker.next()? {
                Ok(entry) => {
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let wanted = entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| self.names.contains(name));
                    if wanted {
                        return Some(Ok(FileDescriptor::new(entry.into_path())));
                    }
                }
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                    tracing::debug!(path = %path.display(), error = %err, "skipping unreadable entry");
                    return Some(Err(EntryError {
                        path,
                        message: err.to_string(),
                    }));
                }
            }
        }
    }
}
