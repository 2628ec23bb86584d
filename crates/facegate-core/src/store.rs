//! Enrolled-face store: two key-value tables persisted as JSON files.
//!
//! `faces.json` maps identity → embedding, `profiles.json` maps identity →
//! profile. Both are loaded wholesale on open and the mutated table is
//! rewritten in full (write to a temporary file, then rename) on every change.
//! A change that fails to reach disk is rolled back in memory.
//! The tables are independent: a profile may exist without an embedding and
//! vice versa.

use crate::matcher::{EuclideanMatcher, MatchOutcome, Matcher};
use crate::types::{Embedding, Profile};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const FACES_FILE: &str = "faces.json";
const PROFILES_FILE: &str = "profiles.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity key must not be empty")]
    EmptyKey,
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt table {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// An enrolled embedding plus when it was registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledFace {
    pub embedding: Embedding,
    /// RFC 3339 timestamp of the latest registration.
    pub registered_at: String,
}

/// What `remove` actually deleted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Removed {
    pub embedding: bool,
    pub profile: bool,
}

impl Removed {
    pub fn any(&self) -> bool {
        self.embedding || self.profile
    }
}

pub struct FaceStore {
    faces_path: PathBuf,
    profiles_path: PathBuf,
    faces: BTreeMap<String, EnrolledFace>,
    profiles: BTreeMap<String, Profile>,
}

impl FaceStore {
    /// Open (or create) the store in `dir`, loading both tables.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let faces_path = dir.join(FACES_FILE);
        let profiles_path = dir.join(PROFILES_FILE);
        let faces = load_table(&faces_path)?;
        let profiles = load_table(&profiles_path)?;

        tracing::info!(
            dir = %dir.display(),
            faces = faces.len(),
            profiles = profiles.len(),
            "face store loaded"
        );

        Ok(Self {
            faces_path,
            profiles_path,
            faces,
            profiles,
        })
    }

    /// Upsert the embedding for `key` and, if given, its profile.
    ///
    /// A re-registration overwrites the previous embedding. The existing
    /// profile is kept when `profile` is `None`.
    pub fn register(
        &mut self,
        key: &str,
        embedding: Embedding,
        profile: Option<Profile>,
    ) -> Result<(), StoreError> {
        let key = validate_key(key)?;
        let face = EnrolledFace {
            embedding,
            registered_at: chrono::Utc::now().to_rfc3339(),
        };
        let previous = self.faces.insert(key.to_string(), face);
        let replaced = previous.is_some();
        if let Err(e) = save_table(&self.faces_path, &self.faces) {
            restore(&mut self.faces, key, previous);
            return Err(e);
        }
        tracing::info!(key, replaced, "embedding stored");

        if let Some(profile) = profile {
            self.set_profile(key, profile)?;
        }
        Ok(())
    }

    /// Upsert only the profile for `key`.
    pub fn set_profile(&mut self, key: &str, profile: Profile) -> Result<(), StoreError> {
        let key = validate_key(key)?;
        let previous = self.profiles.insert(key.to_string(), profile);
        if let Err(e) = save_table(&self.profiles_path, &self.profiles) {
            restore(&mut self.profiles, key, previous);
            return Err(e);
        }
        tracing::debug!(key, "profile stored");
        Ok(())
    }

    /// Delete `key` from both tables. Missing keys are not an error.
    pub fn remove(&mut self, key: &str) -> Result<Removed, StoreError> {
        let key = key.trim();
        let mut removed = Removed::default();

        if let Some(face) = self.faces.remove(key) {
            if let Err(e) = save_table(&self.faces_path, &self.faces) {
                restore(&mut self.faces, key, Some(face));
                return Err(e);
            }
            removed.embedding = true;
        }
        if let Some(profile) = self.profiles.remove(key) {
            if let Err(e) = save_table(&self.profiles_path, &self.profiles) {
                restore(&mut self.profiles, key, Some(profile));
                return Err(e);
            }
            removed.profile = true;
        }

        tracing::info!(key, embedding = removed.embedding, profile = removed.profile, "identity removed");
        Ok(removed)
    }

    /// Lookups trim `key` the same way writes do.
    pub fn face(&self, key: &str) -> Option<&EnrolledFace> {
        self.faces.get(key.trim())
    }

    pub fn embedding(&self, key: &str) -> Option<&Embedding> {
        self.face(key).map(|f| &f.embedding)
    }

    pub fn profile(&self, key: &str) -> Option<&Profile> {
        self.profiles.get(key.trim())
    }

    /// Whether `key` has an enrolled embedding.
    pub fn is_registered(&self, key: &str) -> bool {
        self.faces.contains_key(key.trim())
    }

    /// Identities with an enrolled embedding, in key order.
    pub fn identities(&self) -> Vec<String> {
        self.faces.keys().cloned().collect()
    }

    /// Number of enrolled embeddings.
    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Borrowing view of the embeddings table, in key order.
    pub fn gallery(&self) -> impl Iterator<Item = (&str, &Embedding)> {
        self.faces.iter().map(|(k, f)| (k.as_str(), &f.embedding))
    }

    /// Match `probe` against every enrolled embedding.
    pub fn authenticate(&self, probe: &Embedding, threshold: f32) -> MatchOutcome {
        EuclideanMatcher.compare(probe, self.gallery(), threshold)
    }
}

fn validate_key(key: &str) -> Result<&str, StoreError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(StoreError::EmptyKey);
    }
    Ok(key)
}

/// Put back the entry that a failed write replaced or removed.
fn restore<T>(table: &mut BTreeMap<String, T>, key: &str, previous: Option<T>) {
    match previous {
        Some(value) => {
            table.insert(key.to_string(), value);
        }
        None => {
            table.remove(key);
        }
    }
}

fn load_table<T: DeserializeOwned>(path: &Path) -> Result<BTreeMap<String, T>, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn save_table<T: Serialize>(path: &Path, table: &BTreeMap<String, T>) -> Result<(), StoreError> {
    let io_err = |source: std::io::Error| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    let bytes = serde_json::to_vec_pretty(table).map_err(|e| io_err(e.into()))?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }
    std::fs::rename(&tmp, path).map_err(io_err)?;
    tracing::trace!(path = %path.display(), entries = table.len(), "table written");
    Ok(())
}
