//! Inventory board: the state behind every stock/video view.
//!
//! A refresh fetches the stock snapshot and the video list in parallel, waits for
//! both, and rebuilds the join from scratch. Read failures degrade to empty lists so
//! the views stay usable; an authorization failure ends the session instead, unless the
//! session has already moved on to another credential.
//! Each refresh is numbered and only the newest completed one is applied.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, Weak};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::InventoryService;
use crate::error::{PortalError, Result};
use crate::indexing::PlateIndex;
use crate::models::{StockSnapshot, VideoRecord};
use crate::reconcile::{self, CoverageSummary, ReconciliationJoin, StockQuery, StockRow};
use crate::session::AuthSessionManager;

/// Above this many plate/title pairs the join goes through `PlateIndex`.
const INDEXED_JOIN_THRESHOLD: usize = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    Stock,
    Videos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFailure {
    pub feed: Feed,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// False when a newer refresh had already been applied.
    pub applied: bool,
    pub stock_count: usize,
    pub video_count: usize,
    pub failures: Vec<FeedFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncInfo {
    pub last_sync_time: Option<DateTime<Utc>>,
    pub sync_status: Option<String>,
    pub total_vehicles: u64,
}

struct Fetched {
    stock: StockSnapshot,
    videos: Vec<VideoRecord>,
    failures: Vec<FeedFailure>,
}

#[derive(Default)]
struct BoardState {
    generation: u64,
    stock: StockSnapshot,
    videos: Vec<VideoRecord>,
    join: ReconciliationJoin,
    failures: Vec<FeedFailure>,
}

#[derive(Default)]
struct BoardInner {
    next_generation: AtomicU64,
    state: RwLock<BoardState>,
}

#[derive(Default)]
pub struct InventoryBoard {
    inner: Arc<BoardInner>,
}

impl InventoryBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn refresh(
        &self,
        inventory: &dyn InventoryService,
        session: &AuthSessionManager,
    ) -> Result<RefreshOutcome> {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let fetched = fetch(inventory, session).await?;
        Ok(apply(&self.inner, generation, fetched))
    }

    /// Background refresh. The task only holds a weak reference, so a board dropped
    /// while the request is in flight is left alone and the task yields `None`.
    pub fn spawn_refresh(
        &self,
        inventory: Arc<dyn InventoryService>,
        session: Arc<AuthSessionManager>,
    ) -> JoinHandle<Option<Result<RefreshOutcome>>> {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let board: Weak<BoardInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let fetched = fetch(inventory.as_ref(), &session).await;
            let Some(inner) = board.upgrade() else {
                debug!(generation, "board dropped before refresh completed");
                return None;
            };
            Some(fetched.map(|fetched| apply(&inner, generation, fetched)))
        })
    }

    pub fn rows(&self, query: &StockQuery) -> Vec<StockRow> {
        let state = self.read();
        reconcile::filter_rows(query, &state.stock.results, &state.join)
    }

    pub fn matches(&self, stock_id: &str) -> Vec<VideoRecord> {
        self.read().join.matches(stock_id).to_vec()
    }

    pub fn find_video(&self, video_id: &str) -> Option<VideoRecord> {
        self.read().videos.iter().find(|v| v.id == video_id).cloned()
    }

    pub fn coverage(&self) -> CoverageSummary {
        let state = self.read();
        reconcile::coverage(&state.stock.results, &state.join)
    }

    pub fn sync_info(&self) -> SyncInfo {
        let state = self.read();
        SyncInfo {
            last_sync_time: state.stock.last_sync_time,
            sync_status: state.stock.sync_status.clone(),
            total_vehicles: state.stock.total_vehicles,
        }
    }

    pub fn failures(&self) -> Vec<FeedFailure> {
        self.read().failures.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, BoardState> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn fetch(inventory: &dyn InventoryService, session: &AuthSessionManager) -> Result<Fetched> {
    let credential = session
        .credential()
        .ok_or(PortalError::InvalidState("not signed in"))?;

    let (stock, videos) = tokio::join!(
        inventory.fetch_stock(&credential),
        inventory.fetch_videos(&credential)
    );

    let auth_failed = matches!(&stock, Err(e) if e.is_auth_failure())
        || matches!(&videos, Err(e) if e.is_auth_failure());
    if auth_failed {
        if session.invalidate(&credential) {
            return Err(PortalError::SessionExpiredOrInvalid);
        }
        return Err(PortalError::InvalidState("session changed while the refresh was in flight"));
    }

    let mut failures = Vec::new();
    let stock = stock.unwrap_or_else(|e| {
        warn!(error = %e, "stock feed unavailable, showing no stock");
        failures.push(FeedFailure {
            feed: Feed::Stock,
            message: e.to_string(),
        });
        StockSnapshot::default()
    });
    let videos = videos.unwrap_or_else(|e| {
        warn!(error = %e, "video catalog unavailable, showing no videos");
        failures.push(FeedFailure {
            feed: Feed::Videos,
            message: e.to_string(),
        });
        Vec::new()
    });

    Ok(Fetched {
        stock,
        videos,
        failures,
    })
}

fn apply(inner: &BoardInner, generation: u64, fetched: Fetched) -> RefreshOutcome {
    let Fetched {
        stock,
        videos,
        failures,
    } = fetched;

    let pairs = stock.results.len().saturating_mul(videos.len());
    let join = if pairs > INDEXED_JOIN_THRESHOLD {
        PlateIndex::build(&stock.results).join(&stock.results, &videos)
    } else {
        reconcile::join(&stock.results, &videos)
    };

    let outcome = RefreshOutcome {
        applied: false,
        stock_count: stock.results.len(),
        video_count: videos.len(),
        failures: failures.clone(),
    };

    let mut state = inner.state.write().unwrap_or_else(PoisonError::into_inner);
    if generation <= state.generation {
        debug!(generation, current = state.generation, "dropping stale refresh");
        return outcome;
    }
    *state = BoardState {
        generation,
        stock,
        videos,
        join,
        failures,
    };
    info!(
        generation,
        stock = outcome.stock_count,
        videos = outcome.video_count,
        "inventory board refreshed"
    );
    RefreshOutcome {
        applied: true,
        ..outcome
    }
}
