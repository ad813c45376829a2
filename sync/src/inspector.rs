//! Decides whether the on-disk copy of a manifest file can be kept

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::Xxh64;

use crate::manifest::{ManifestFile, RelativePath};

/// Chunk size used when hashing local files
pub const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Content digest used to build manifests
pub trait ContentHasher: Send + Sync {
    fn hash_reader(&self, reader: &mut dyn Read) -> io::Result<u64>;
}

/// xxHash64 with seed 0, streamed in fixed-size chunks
#[derive(Debug, Clone, Copy)]
pub struct Xxh64Hasher {
    buffer_size: usize,
}

impl Default for Xxh64Hasher {
    fn default() -> Self {
        Self {
            buffer_size: HASH_BUFFER_SIZE,
        }
    }
}

impl Xxh64Hasher {
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    /// Hash an in-memory buffer; matches `hash_reader` over the same bytes
    pub fn hash_bytes(data: &[u8]) -> u64 {
        xxhash_rust::xxh64::xxh64(data, 0)
    }
}

impl ContentHasher for Xxh64Hasher {
    fn hash_reader(&self, reader: &mut dyn Read) -> io::Result<u64> {
        let mut hasher = Xxh64::new(0);
        let mut buffer = vec![0u8; self.buffer_size];

        loop {
            let bytes_read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(hasher.digest())
    }
}

/// Why a local file does or does not satisfy its manifest entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalState {
    /// Size and hash match
    UpToDate,
    /// Nothing at the expected path
    Missing,
    /// Length differs; content was not hashed
    SizeMismatch { actual: u64 },
    /// Same length, different content
    HashMismatch { actual: u64 },
    /// Could not be opened or read
    Unreadable(String),
}

impl LocalState {
    pub fn needs_download(&self) -> bool {
        !matches!(self, LocalState::UpToDate)
    }
}

/// Read-only check of one file against the manifest
pub struct LocalStateInspector<H = Xxh64Hasher> {
    hasher: H,
}

impl Default for LocalStateInspector<Xxh64Hasher> {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStateInspector<Xxh64Hasher> {
    pub fn new() -> Self {
        Self {
            hasher: Xxh64Hasher::default(),
        }
    }
}

impl<H: ContentHasher> LocalStateInspector<H> {
    pub fn with_hasher(hasher: H) -> Self {
        Self { hasher }
    }

    /// `true` unless the local file is present with matching size and hash.
    /// Read errors count as "download it again".
    pub fn needs_download(&self, local_root: &Path, path: &RelativePath, file: &ManifestFile) -> bool {
        self.inspect(local_root, path, file).needs_download()
    }

    pub fn inspect(&self, local_root: &Path, path: &RelativePath, file: &ManifestFile) -> LocalState {
        let local_path = path.join(file.name()).to_local(local_root);

        // The handle is dropped before returning on every path
        let mut handle = match File::open(&local_path) {
            Ok(handle) => handle,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return LocalState::Missing,
            Err(e) => {
                tracing::debug!(path = %local_path.display(), error = %e, "Local file unreadable");
                return LocalState::Unreadable(e.to_string());
            }
        };

        let actual_size = match handle.metadata() {
            Ok(metadata) if metadata.is_dir() => {
                return LocalState::Unreadable("expected a file, found a directory".to_string())
            }
            Ok(metadata) => metadata.len(),
            Err(e) => return LocalState::Unreadable(e.to_string()),
        };

        if actual_size != file.size() {
            return LocalState::SizeMismatch { actual: actual_size };
        }

        match self.hasher.hash_reader(&mut handle) {
            Ok(actual) if actual == file.hash() => LocalState::UpToDate,
            Ok(actual) => LocalState::HashMismatch { actual },
            Err(e) => {
                tracing::debug!(path = %local_path.display(), error = %e, "Failed to hash local file");
                LocalState::Unreadable(e.to_string())
            }
        }
    }
}
