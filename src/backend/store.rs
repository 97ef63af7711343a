use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;

use crate::error::{PortalError, Result};
use crate::models::{Role, StockItem, StockSnapshot, VideoRecord};

/// Account as the backend stores it.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    /// Requires a one-time code after the password.
    #[serde(default)]
    pub two_factor: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
struct SyncMeta {
    last_sync_time: Option<DateTime<Utc>>,
    sync_status: Option<String>,
}

const SYNC_META_KEY: &[u8] = b"sync";

/// One-time codes stop working after this long.
pub const CODE_TTL_SECS: i64 = 10 * 60;
/// Wrong codes accepted before the challenge is dropped and the user must log in again.
pub const MAX_CODE_FAILURES: u32 = 5;
pub const RESET_TOKEN_TTL_SECS: i64 = 60 * 60;

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct IssuedCode {
    code: String,
    issued_at: DateTime<Utc>,
    #[serde(default)]
    failures: u32,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct IssuedResetToken {
    user_id: String,
    issued_at: DateTime<Utc>,
}

fn is_fresh(issued_at: DateTime<Utc>, ttl_secs: i64) -> bool {
    Utc::now() - issued_at < Duration::seconds(ttl_secs)
}

/// Sled trees behind the reference backend:
/// - users: id -> UserRecord
/// - stock / videos: sequence id -> record (iteration order = insertion order)
/// - challenges: user id -> pending one-time code with issue time and wrong tries
/// - reset_tokens: token -> user id and issue time (single use)
/// - meta: stock sync metadata
#[derive(Clone)]
pub struct BackendStore {
    db: Db,
    users: sled::Tree,
    stock: sled::Tree,
    videos: sled::Tree,
    challenges: sled::Tree,
    reset_tokens: sled::Tree,
    meta: sled::Tree,
}

impl BackendStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory database, removed on drop.
    pub fn open_temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self> {
        Ok(Self {
            users: db.open_tree("users")?,
            stock: db.open_tree("stock")?,
            videos: db.open_tree("videos")?,
            challenges: db.open_tree("challenges")?,
            reset_tokens: db.open_tree("reset_tokens")?,
            meta: db.open_tree("meta")?,
            db,
        })
    }

    fn next_key(&self) -> Result<[u8; 8]> {
        Ok(self.db.generate_id()?.to_be_bytes())
    }

    // --- users ---

    pub fn create_user(&self, user: UserRecord) -> Result<()> {
        if self.find_user_by_username(&user.username)?.is_some() {
            return Err(PortalError::Rejected(format!("User {} already exists", user.username)));
        }
        self.users.insert(user.id.as_bytes(), serde_json::to_vec(&user)?)?;
        Ok(())
    }

    pub fn update_user(&self, user: &UserRecord) -> Result<()> {
        self.users.insert(user.id.as_bytes(), serde_json::to_vec(user)?)?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRecord>> {
        match self.users.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn find_user(&self, pred: impl Fn(&UserRecord) -> bool) -> Result<Option<UserRecord>> {
        for item in self.users.iter() {
            let (_, v) = item?;
            let user: UserRecord = serde_json::from_slice(&v)?;
            if pred(&user) {
                return Ok(Some(user));
            }
        }
        Ok(None)
    }

    pub fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        self.find_user(|u| u.username.eq_ignore_ascii_case(username))
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        self.find_user(|u| {
            u.email
                .as_deref()
                .is_some_and(|e| e.eq_ignore_ascii_case(email))
        })
    }

    // --- second factor ---

    pub fn put_challenge(&self, user_id: &str, code: &str, issued_at: DateTime<Utc>) -> Result<()> {
        let issued = IssuedCode {
            code: code.to_string(),
            issued_at,
            failures: 0,
        };
        self.challenges.insert(user_id.as_bytes(), serde_json::to_vec(&issued)?)?;
        Ok(())
    }

    /// True when `code` matches a live challenge, which is then consumed.
    /// Expired challenges and the last allowed wrong code remove the challenge.
    pub fn redeem_challenge(&self, user_id: &str, code: &str) -> Result<bool> {
        let key = user_id.as_bytes();
        let Some(bytes) = self.challenges.get(key)? else {
            return Ok(false);
        };
        let mut issued: IssuedCode = serde_json::from_slice(&bytes)?;
        if !is_fresh(issued.issued_at, CODE_TTL_SECS) {
            self.challenges.remove(key)?;
            return Ok(false);
        }
        if issued.code == code {
            self.challenges.remove(key)?;
            return Ok(true);
        }
        issued.failures += 1;
        if issued.failures >= MAX_CODE_FAILURES {
            self.challenges.remove(key)?;
        } else {
            self.challenges.insert(key, serde_json::to_vec(&issued)?)?;
        }
        Ok(false)
    }

    // --- password reset ---

    pub fn put_reset_token(&self, token: &str, user_id: &str, issued_at: DateTime<Utc>) -> Result<()> {
        let issued = IssuedResetToken {
            user_id: user_id.to_string(),
            issued_at,
        };
        self.reset_tokens.insert(token.as_bytes(), serde_json::to_vec(&issued)?)?;
        Ok(())
    }

    /// Single use: the token is removed whether or not it is still fresh.
    pub fn take_reset_token(&self, token: &str) -> Result<Option<String>> {
        let Some(bytes) = self.reset_tokens.remove(token.as_bytes())? else {
            return Ok(None);
        };
        let issued: IssuedResetToken = serde_json::from_slice(&bytes)?;
        Ok(is_fresh(issued.issued_at, RESET_TOKEN_TTL_SECS).then_some(issued.user_id))
    }

    // --- inventory feed ---

    /// Replace the whole stock list, as a feed sync does.
    pub fn replace_stock(&self, items: &[StockItem], synced_at: DateTime<Utc>) -> Result<()> {
        self.stock.clear()?;
        for item in items {
            self.stock.insert(self.next_key()?, serde_json::to_vec(item)?)?;
        }
        let meta = SyncMeta {
            last_sync_time: Some(synced_at),
            sync_status: Some("success".to_string()),
        };
        self.meta.insert(SYNC_META_KEY, serde_json::to_vec(&meta)?)?;
        Ok(())
    }

    pub fn stock_snapshot(&self) -> Result<StockSnapshot> {
        let mut results = vec![];
        for item in self.stock.iter() {
            let (_, v) = item?;
            results.push(serde_json::from_slice::<StockItem>(&v)?);
        }
        let meta: SyncMeta = match self.meta.get(SYNC_META_KEY)? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => SyncMeta::default(),
        };
        Ok(StockSnapshot {
            total_vehicles: results.len() as u64,
            results,
            last_sync_time: meta.last_sync_time,
            sync_status: meta.sync_status,
        })
    }

    // --- video catalog ---

    pub fn add_video(&self, video: &VideoRecord) -> Result<()> {
        self.videos.insert(self.next_key()?, serde_json::to_vec(video)?)?;
        Ok(())
    }

    pub fn videos(&self) -> Result<Vec<VideoRecord>> {
        let mut videos = vec![];
        for item in self.videos.iter() {
            let (_, v) = item?;
            videos.push(serde_json::from_slice(&v)?);
        }
        Ok(videos)
    }
}
