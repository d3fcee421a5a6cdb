//! Track storage seen by the producer.
//!
//! [`Storage`] is the seam between [`PlaybackController`] and wherever the
//! audio files live. [`DirStorage`] serves a directory of files;
//! [`MemStorage`] keeps tracks in memory.
//!
//! [`PlaybackController`]: crate::playback::PlaybackController

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::StorageError;

/// A track known to a [`Storage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackEntry {
    pub name: String,
    pub size: u64,
}

/// Named byte streams the producer can read from.
///
/// A handle is opened once per song and read sequentially until it reports
/// end of stream, then closed.
pub trait Storage {
    /// An open track.
    type Handle;

    /// Whether `name` can be opened.
    fn exists(&self, name: &str) -> bool;

    fn open(&mut self, name: &str) -> Result<Self::Handle, StorageError>;

    /// Total size of the open track in bytes.
    fn size(&self, handle: &Self::Handle) -> u64;

    /// Read up to `buf.len()` bytes; `Ok(0)` means end of stream.
    fn read(&mut self, handle: &mut Self::Handle, buf: &mut [u8]) -> Result<usize, StorageError>;

    fn close(&mut self, handle: Self::Handle);

    fn delete(&mut self, name: &str) -> Result<(), StorageError>;

    /// All tracks, sorted by name.
    fn list(&self) -> Result<Vec<TrackEntry>, StorageError>;
}

/// Reject names that could escape the storage root.
fn check_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(StorageError::InvalidName(name.to_owned()));
    }
    Ok(())
}

// ── Directory storage ──────────────────────────────────────────────────────

/// Tracks stored as files in one directory.
///
/// With [`with_extension`](Self::with_extension), track `"bell"` maps to
/// `bell.mp3` and listings only show files with that extension, stem only.
#[derive(Debug, Clone)]
pub struct DirStorage {
    root: PathBuf,
    extension: Option<String>,
}

/// An open file in a [`DirStorage`].
#[derive(Debug)]
pub struct DirHandle {
    file: File,
    size: u64,
}

impl DirStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirStorage {
            root: root.into(),
            extension: None,
        }
    }

    /// Map track names to files with this extension (without the dot).
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StorageError> {
        check_name(name)?;
        let mut path = self.root.join(name);
        if let Some(ext) = &self.extension {
            let mut file_name = path.file_name().unwrap_or_default().to_os_string();
            file_name.push(".");
            file_name.push(ext);
            path.set_file_name(file_name);
        }
        Ok(path)
    }

    fn not_found(name: &str, err: io::Error) -> StorageError {
        if err.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(name.to_owned())
        } else {
            StorageError::Io(err)
        }
    }

    fn track_name(&self, path: &Path) -> Option<String> {
        match &self.extension {
            Some(ext) => {
                let matches = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case(ext));
                if !matches {
                    return None;
                }
                path.file_stem()?.to_str().map(str::to_owned)
            }
            None => path.file_name()?.to_str().map(str::to_owned),
        }
    }
}

impl Storage for DirStorage {
    type Handle = DirHandle;

    fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_ok_and(|path| path.is_file())
    }

    fn open(&mut self, name: &str) -> Result<DirHandle, StorageError> {
        let path = self.path_for(name)?;
        let file = File::open(&path).map_err(|err| Self::not_found(name, err))?;
        let size = file.metadata()?.len();
        debug!(path = %path.display(), size, "track opened");
        Ok(DirHandle { file, size })
    }

    fn size(&self, handle: &DirHandle) -> u64 {
        handle.size
    }

    fn read(&mut self, handle: &mut DirHandle, buf: &mut [u8]) -> Result<usize, StorageError> {
        loop {
            match handle.file.read(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn close(&mut self, handle: DirHandle) {
        drop(handle);
    }

    fn delete(&mut self, name: &str) -> Result<(), StorageError> {
        let path = self.path_for(name)?;
        fs::remove_file(&path).map_err(|err| Self::not_found(name, err))?;
        debug!(path = %path.display(), "track deleted");
        Ok(())
    }

    fn list(&self) -> Result<Vec<TrackEntry>, StorageError> {
        let mut tracks = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(name) = self.track_name(&path) {
                tracks.push(TrackEntry {
                    name,
                    size: entry.metadata()?.len(),
                });
            }
        }
        tracks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tracks)
    }
}

// ── In-memory storage ──────────────────────────────────────────────────────

/// Tracks held in memory. Counts opens and closes so callers can check that
/// every handle is released.
#[derive(Debug, Default, Clone)]
pub struct MemStorage {
    tracks: BTreeMap<String, Vec<u8>>,
    opens: usize,
    closes: usize,
    fail_reads: bool,
}

/// An open track in a [`MemStorage`].
#[derive(Debug)]
pub struct MemHandle {
    name: String,
    pos: usize,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a track.
    pub fn insert(&mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.tracks.insert(name.into(), data.into());
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with_track(mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.insert(name, data);
        self
    }

    pub fn opens(&self) -> usize {
        self.opens
    }

    pub fn closes(&self) -> usize {
        self.closes
    }

    /// Handles opened and not yet closed.
    pub fn open_handles(&self) -> usize {
        self.opens - self.closes
    }

    /// Make every subsequent read fail with an I/O error.
    pub fn fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }
}

impl Storage for MemStorage {
    type Handle = MemHandle;

    fn exists(&self, name: &str) -> bool {
        check_name(name).is_ok() && self.tracks.contains_key(name)
    }

    fn open(&mut self, name: &str) -> Result<MemHandle, StorageError> {
        check_name(name)?;
        if !self.tracks.contains_key(name) {
            return Err(StorageError::NotFound(name.to_owned()));
        }
        self.opens += 1;
        Ok(MemHandle {
            name: name.to_owned(),
            pos: 0,
        })
    }

    fn size(&self, handle: &MemHandle) -> u64 {
        self.tracks.get(&handle.name).map_or(0, |data| data.len() as u64)
    }

    fn read(&mut self, handle: &mut MemHandle, buf: &mut [u8]) -> Result<usize, StorageError> {
        if self.fail_reads {
            return Err(io::Error::other("simulated read failure").into());
        }
        let data = self
            .tracks
            .get(&handle.name)
            .ok_or_else(|| StorageError::NotFound(handle.name.clone()))?;
        let rest = data.get(handle.pos..).unwrap_or_default();
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        handle.pos += n;
        Ok(n)
    }

    fn close(&mut self, handle: MemHandle) {
        drop(handle);
        self.closes += 1;
    }

    fn delete(&mut self, name: &str) -> Result<(), StorageError> {
        check_name(name)?;
        self.tracks
            .remove(name)
            .map(drop)
            .ok_or_else(|| StorageError::NotFound(name.to_owned()))
    }

    fn list(&self) -> Result<Vec<TrackEntry>, StorageError> {
        Ok(self
            .tracks
            .iter()
            .map(|(name, data)| TrackEntry {
                name: name.clone(),
                size: data.len() as u64,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_all<S: Storage>(storage: &mut S, name: &str) -> Vec<u8> {
        let mut handle = storage.open(name).unwrap();
        let mut out = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            let n = storage.read(&mut handle, &mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        storage.close(handle);
        out
    }

    fn dir_with_tracks() -> (TempDir, DirStorage) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bell.mp3"), [1u8; 100]).unwrap();
        fs::write(dir.path().join("alarm.mp3"), [2u8; 40]).unwrap();
        fs::write(dir.path().join("notes.txt"), b"not audio").unwrap();
        fs::create_dir(dir.path().join("sub.mp3")).unwrap();
        let storage = DirStorage::new(dir.path()).with_extension("mp3");
        (dir, storage)
    }

    #[test]
    fn dir_storage_reads_whole_file() {
        let (_dir, mut storage) = dir_with_tracks();
        assert!(storage.exists("bell"));
        let handle = storage.open("bell").unwrap();
        assert_eq!(storage.size(&handle), 100);
        storage.close(handle);

        assert_eq!(read_all(&mut storage, "bell"), vec![1u8; 100]);
    }

    #[test]
    fn dir_storage_missing_track() {
        let (_dir, mut storage) = dir_with_tracks();
        assert!(!storage.exists("gong"));
        assert!(matches!(
            storage.open("gong"),
            Err(StorageError::NotFound(name)) if name == "gong"
        ));
        assert!(!storage.exists("sub"));
    }

    #[test]
    fn dir_storage_rejects_path_names() {
        let (_dir, mut storage) = dir_with_tracks();
        for name in ["", ".", "..", "../bell", "a/b", "a\\b"] {
            assert!(!storage.exists(name), "{name:?}");
            assert!(
                matches!(storage.open(name), Err(StorageError::InvalidName(_))),
                "{name:?}"
            );
        }
    }

    #[test]
    fn dir_storage_lists_matching_files() {
        let (_dir, storage) = dir_with_tracks();
        let tracks = storage.list().unwrap();
        assert_eq!(
            tracks,
            vec![
                TrackEntry {
                    name: "alarm".into(),
                    size: 40
                },
                TrackEntry {
                    name: "bell".into(),
                    size: 100
                },
            ]
        );
    }

    #[test]
    fn dir_storage_without_extension_uses_file_names() {
        let (dir, _) = dir_with_tracks();
        let storage = DirStorage::new(dir.path());
        let names: Vec<String> = storage.list().unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, ["alarm.mp3", "bell.mp3", "notes.txt"]);
        assert!(storage.exists("notes.txt"));
    }

    #[test]
    fn dir_storage_delete() {
        let (dir, mut storage) = dir_with_tracks();
        storage.delete("alarm").unwrap();
        assert!(!dir.path().join("alarm.mp3").exists());
        assert!(matches!(storage.delete("alarm"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn mem_storage_counts_handles() {
        let mut storage = MemStorage::new().with_track("a", vec![5u8; 20]);
        assert_eq!(read_all(&mut storage, "a"), vec![5u8; 20]);
        assert_eq!(storage.opens(), 1);
        assert_eq!(storage.closes(), 1);
        assert_eq!(storage.open_handles(), 0);
    }

    #[test]
    fn mem_storage_failures() {
        let mut storage = MemStorage::new().with_track("a", vec![0u8; 4]);
        assert!(matches!(storage.open("b"), Err(StorageError::NotFound(_))));
        assert_eq!(storage.opens(), 0);

        let mut handle = storage.open("a").unwrap();
        storage.fail_reads(true);
        assert!(matches!(
            storage.read(&mut handle, &mut [0u8; 4]),
            Err(StorageError::Io(_))
        ));
        storage.close(handle);

        storage.delete("a").unwrap();
        assert!(!storage.exists("a"));
        assert!(storage.list().unwrap().is_empty());
    }
}
