//! Immutable model of the client file tree a server publishes

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, SyncError};

/// One expected file: name, byte length and xxHash64 of its content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManifestFile {
    name: String,
    size: u64,
    hash: u64,
}

impl ManifestFile {
    pub fn new(name: impl Into<String>, size: u64, hash: u64) -> Self {
        Self {
            name: name.into(),
            size,
            hash,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Expected content hash
    pub fn hash(&self) -> u64 {
        self.hash
    }
}

/// A folder node. Owns its subfolders and files; siblings are kept in
/// manifest order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFolder {
    name: String,
    folders: Vec<ManifestFolder>,
    files: Vec<ManifestFile>,
}

impl ManifestFolder {
    pub fn new(
        name: impl Into<String>,
        folders: Vec<ManifestFolder>,
        files: Vec<ManifestFile>,
    ) -> Self {
        Self {
            name: name.into(),
            folders,
            files,
        }
    }

    /// Empty folder, to be filled with `with_folder` / `with_file`
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new(), Vec::new())
    }

    pub fn with_folder(mut self, folder: ManifestFolder) -> Self {
        self.folders.push(folder);
        self
    }

    pub fn with_file(mut self, file: ManifestFile) -> Self {
        self.files.push(file);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn folders(&self) -> &[ManifestFolder] {
        &self.folders
    }

    pub fn files_here(&self) -> &[ManifestFile] {
        &self.files
    }

    /// Depth-first walk over every file in the tree.
    ///
    /// Subfolders are visited before the files of the folder that contains
    /// them. The folder this is called on contributes no path segment.
    pub fn files(&self) -> ManifestEntries<'_> {
        ManifestEntries {
            stack: vec![Frame {
                folder: self,
                path: RelativePath::root(),
                next_folder: 0,
                next_file: 0,
            }],
        }
    }

    pub fn file_count(&self) -> usize {
        self.files.len() + self.folders.iter().map(Self::file_count).sum::<usize>()
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(ManifestFile::size).sum::<u64>()
            + self.folders.iter().map(Self::total_size).sum::<u64>()
    }

    /// Reject trees whose names could not be mapped onto both a URL path and
    /// a directory below the local root.
    pub fn validate(&self) -> Result<()> {
        self.validate_at(&RelativePath::root())
    }

    fn validate_at(&self, path: &RelativePath) -> Result<()> {
        let mut seen = HashSet::new();

        for folder in &self.folders {
            validate_name(path, &folder.name)?;
            if !seen.insert(folder.name.as_str()) {
                return Err(SyncError::manifest_error(
                    path.join(&folder.name).to_string(),
                    "duplicate entry name",
                ));
            }
            folder.validate_at(&path.join(&folder.name))?;
        }

        for file in &self.files {
            validate_name(path, &file.name)?;
            if !seen.insert(file.name.as_str()) {
                return Err(SyncError::manifest_error(
                    path.join(&file.name).to_string(),
                    "duplicate entry name",
                ));
            }
        }

        Ok(())
    }
}

fn validate_name(parent: &RelativePath, name: &str) -> Result<()> {
    let message = if name.is_empty() {
        "empty name"
    } else if name == "." || name == ".." {
        "relative directory names are not allowed"
    } else if name.contains('/') || name.contains('\\') {
        "names must not contain path separators"
    } else if name.contains('\0') {
        "names must not contain NUL"
    } else {
        return Ok(());
    };

    Err(SyncError::manifest_error(parent.join(name).to_string(), message))
}

/// Folder names from the manifest root down to an entry.
///
/// The same segments address the file on the server and on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelativePath {
    segments: Vec<String>,
}

impl RelativePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a `/`-separated string, ignoring empty segments
    pub fn parse(path: &str) -> Self {
        Self::from_segments(path.split('/').filter(|segment| !segment.is_empty()))
    }

    pub fn join(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn to_local(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        path.extend(&self.segments);
        path
    }

    /// Append each segment to `base` as an encoded path segment
    pub fn to_url(&self, base: &Url) -> Result<Url> {
        let mut url = base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                SyncError::Config(format!("base URL '{}' cannot carry a path", base))
            })?;
            path.pop_if_empty();
            path.extend(&self.segments);
        }
        Ok(url)
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

/// Lazy depth-first iterator returned by [`ManifestFolder::files`]
pub struct ManifestEntries<'a> {
    stack: Vec<Frame<'a>>,
}

struct Frame<'a> {
    folder: &'a ManifestFolder,
    path: RelativePath,
    next_folder: usize,
    next_file: usize,
}

impl<'a> Iterator for ManifestEntries<'a> {
    type Item = (RelativePath, &'a ManifestFile);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;
            let folder = frame.folder;

            if let Some(child) = folder.folders.get(frame.next_folder) {
                frame.next_folder += 1;
                let path = frame.path.join(&child.name);
                self.stack.push(Frame {
                    folder: child,
                    path,
                    next_folder: 0,
                    next_file: 0,
                });
                continue;
            }

            if let Some(file) = folder.files.get(frame.next_file) {
                frame.next_file += 1;
                return Some((frame.path.clone(), file));
            }

            self.stack.pop();
        }
    }
}
