//! Durable session storage.
//!
//! Holds at most one record: the serialized `Identity` of the signed-in user.
//! Absence of the record means "logged out". Only the session manager writes here.

use std::path::Path;
use std::sync::Mutex;

use sled::Db;

use crate::error::Result;
use crate::models::Identity;

const SESSION_TREE: &str = "session";
const IDENTITY_KEY: &[u8] = b"identity";

pub trait SessionStore: Send + Sync {
    /// Returns `Ok(None)` when nothing usable is stored.
    fn load(&self) -> Result<Option<Identity>>;
    fn save(&self, identity: &Identity) -> Result<()>;
    /// Idempotent.
    fn clear(&self) -> Result<()>;
}

/// Sled-backed store that survives process restarts.
#[derive(Clone)]
pub struct SledSessionStore {
    _db: Db,
    tree: sled::Tree,
}

impl SledSessionStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        let tree = db.open_tree(SESSION_TREE)?;
        Ok(Self { _db: db, tree })
    }
}

impl SessionStore for SledSessionStore {
    fn load(&self) -> Result<Option<Identity>> {
        let Some(bytes) = self.tree.get(IDENTITY_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_slice::<Identity>(&bytes) {
            Ok(identity) => Ok(Some(identity)),
            Err(e) => {
                tracing::warn!(error = %e, "discarding malformed session record");
                Ok(None)
            }
        }
    }

    fn save(&self, identity: &Identity) -> Result<()> {
        let bytes = serde_json::to_vec(identity)?;
        self.tree.insert(IDENTITY_KEY, bytes)?;
        self.tree.flush()?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.tree.remove(IDENTITY_KEY)?;
        self.tree.flush()?;
        Ok(())
    }
}

/// Process-local store for tests and embedding.
#[derive(Default)]
pub struct MemorySessionStore {
    slot: Mutex<Option<Vec<u8>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw bytes as-is, e.g. to simulate a corrupted record.
    pub fn with_raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            slot: Mutex::new(Some(bytes.into())),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Vec<u8>>> {
        self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<Identity>> {
        let slot = self.slot();
        Ok(slot
            .as_deref()
            .and_then(|bytes| serde_json::from_slice(bytes).ok()))
    }

    fn save(&self, identity: &Identity) -> Result<()> {
        let bytes = serde_json::to_vec(identity)?;
        *self.slot() = Some(bytes);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot() = None;
        Ok(())
    }
}
