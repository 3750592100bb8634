//! Metadata persistence layer for tubegrab.
//!
//! Every completed download is described by one [`VideoRecord`]. The whole
//! catalog lives in a single pretty-printed JSON object keyed by record id, so
//! the file stays readable and hand-editable. Each mutation reads the full
//! file, changes it in memory and writes it back in one piece.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Default catalog location, relative to the working directory.
pub const DEFAULT_METADATA_FILE: &str = "videos_info.json";

/// One finished download, exactly as it is written to the catalog and
/// returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub duration: u64,
    pub uploader: String,
    pub description: String,
    /// URL path under the static mount, e.g. `/static/videos/<id>/clip.mp4`.
    pub file_path: String,
    /// RFC 3339 timestamp taken once the file is on disk.
    pub download_date: String,
    pub filesize: u64,
}

/// Full id → record mapping. A `BTreeMap` keeps the on-disk key order stable
/// between writes.
pub type VideoCatalog = BTreeMap<String, VideoRecord>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reading metadata file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parsing metadata file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("writing metadata file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Handle on the JSON catalog.
///
/// Readers never lock. Writers take `writer` for the whole
/// read-modify-write cycle, so two submissions finishing at the same time in
/// this process cannot drop each other's entry. Other processes writing the
/// same file are not coordinated with.
#[derive(Debug)]
pub struct MetadataStore {
    path: PathBuf,
    writer: Mutex<()>,
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the whole catalog. A missing file is an empty catalog; an
    /// unreadable or malformed one is an error.
    pub fn load(&self) -> Result<VideoCatalog, StoreError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(VideoCatalog::new()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_slice(&raw).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Replaces the catalog on disk with `catalog`.
    ///
    /// The payload is written to a temporary file next to the target and then
    /// renamed over it, so readers see either the old or the new catalog.
    pub fn save(&self, catalog: &VideoCatalog) -> Result<(), StoreError> {
        let write_err = |source: io::Error| StoreError::Write {
            path: self.path.clone(),
            source,
        };
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(write_err)?;

        let payload = serde_json::to_vec_pretty(catalog).map_err(|err| write_err(err.into()))?;
        let mut tmp = NamedTempFile::new_in(parent).map_err(write_err)?;
        tmp.write_all(&payload).map_err(write_err)?;
        tmp.write_all(b"\n").map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path)
            .map_err(|err| write_err(err.error))?;
        Ok(())
    }

    /// Adds or replaces a single record.
    pub fn insert(&self, record: VideoRecord) -> Result<(), StoreError> {
        let _guard = self.writer.lock();
        let mut catalog = self.load()?;
        catalog.insert(record.id.clone(), record);
        self.save(&catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn sample_record(id: &str) -> VideoRecord {
        VideoRecord {
            id: id.to_owned(),
            title: format!("Video {id}"),
            duration: 120,
            uploader: "Uploader".into(),
            description: "desc".into(),
            file_path: format!("/static/videos/{id}/Video {id}.mp4"),
            download_date: "2024-01-01T00:00:00+00:00".into(),
            filesize: 1024,
        }
    }

    #[test]
    fn missing_file_loads_as_empty_catalog() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new(dir.path().join("videos_info.json"));
        assert!(store.load().unwrap().is_empty());
        assert!(!store.path().exists(), "loading must not create the file");
    }

    #[test]
    fn insert_persists_and_keeps_existing_entries() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new(dir.path().join("nested/videos_info.json"));
        store.insert(sample_record("alpha")).unwrap();
        store.insert(sample_record("beta")).unwrap();

        let catalog = store.load().unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog["alpha"], sample_record("alpha"));
        assert_eq!(catalog["beta"].title, "Video beta");
    }

    #[test]
    fn file_is_a_pretty_printed_object_keyed_by_id() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new(dir.path().join("videos_info.json"));
        let mut record = sample_record("alpha");
        record.title = "Überraschung 動画".into();
        store.insert(record).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\n  \"alpha\": {"));
        assert!(raw.contains("Überraschung 動画"), "non-ASCII must stay verbatim");
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["alpha"]["filesize"], 1024);
        assert_eq!(parsed["alpha"]["file_path"], "/static/videos/alpha/Video alpha.mp4");
    }

    #[test]
    fn reads_catalogs_with_missing_duration() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("videos_info.json");
        fs::write(
            &path,
            r#"{"x": {"id": "x", "title": "t", "uploader": "u", "description": "d",
                "file_path": "/static/videos/x/t.mp4",
                "download_date": "2024-05-01T10:00:00.123456", "filesize": 3}}"#,
        )
        .unwrap();
        let catalog = MetadataStore::new(&path).load().unwrap();
        assert_eq!(catalog["x"].duration, 0);
        assert_eq!(catalog["x"].download_date, "2024-05-01T10:00:00.123456");
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("videos_info.json");
        fs::write(&path, "{ not json").unwrap();
        let err = MetadataStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
        assert!(err.to_string().contains("videos_info.json"));
    }

    #[test]
    fn concurrent_inserts_do_not_lose_entries() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MetadataStore::new(dir.path().join("videos_info.json")));
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let store = store.clone();
                std::thread::spawn(move || store.insert(sample_record(&format!("id-{n}"))))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(store.load().unwrap().len(), 8);
    }
}
