//! Fire-and-forget persistence of finished games.
//!
//! Players learn how their game ended from in-memory state, before
//! anything is written. The record then goes onto a bounded queue drained
//! by a single worker task that talks to the [`GameStore`]. A full queue
//! or a failing store costs us the record, never the game result:
//! failures are logged and the worker moves on.
//!
//! ```text
//! Orchestrator ──submit (try_send)──→ [ bounded mpsc ] ──→ worker ──→ GameStore
//!                                                           │
//!                               flush marker ←──────────────┘ (oneshot ack)
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use gambit_protocol::{EndReason, GameId, GameResult, TimeControl};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A player as the store knows them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub id: u64,
    pub name: String,
    pub rating: i32,
    pub games_played: u32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
}

/// How one game went for one player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerOutcome {
    Win,
    Loss,
    Draw,
}

impl PlayerOutcome {
    fn from_score(score: f64) -> Self {
        if score >= 1.0 {
            Self::Win
        } else if score <= 0.0 {
            Self::Loss
        } else {
            Self::Draw
        }
    }
}

/// One side of a [`GameRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatRecord {
    pub name: String,
    pub rating_before: i32,
    /// Only set for rated games.
    pub rating_after: Option<i32>,
}

/// Everything kept about a finished game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRecord {
    pub game_id: GameId,
    pub white: SeatRecord,
    pub black: SeatRecord,
    pub result: GameResult,
    pub reason: EndReason,
    /// SAN, in order.
    pub moves: Vec<String>,
    pub final_fen: String,
    pub rated: bool,
    pub time_control: Option<TimeControl>,
    pub duration_secs: u64,
}

impl GameRecord {
    fn seats(&self) -> [(&SeatRecord, PlayerOutcome); 2] {
        let white_score = match self.result {
            GameResult::WhiteWins => 1.0,
            GameResult::BlackWins => 0.0,
            GameResult::Draw => 0.5,
        };
        [
            (&self.white, PlayerOutcome::from_score(white_score)),
            (&self.black, PlayerOutcome::from_score(1.0 - white_score)),
        ]
    }
}

// ---------------------------------------------------------------------------
// GameStore
// ---------------------------------------------------------------------------

/// Errors from a [`GameStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("player {0} not found")]
    PlayerNotFound(u64),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Where finished games and player ratings are kept.
///
/// Every call is made from the persistence worker, never from a path a
/// player is waiting on.
pub trait GameStore: Send + Sync + 'static {
    fn find_player_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<PlayerRecord>, StoreError>> + Send;

    fn create_player(
        &self,
        name: &str,
        rating: i32,
    ) -> impl Future<Output = Result<PlayerRecord, StoreError>> + Send;

    fn update_player_after_game(
        &self,
        player_id: u64,
        new_rating: Option<i32>,
        outcome: PlayerOutcome,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn save_game(&self, record: &GameRecord) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// A [`GameStore`] that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    players: HashMap<u64, PlayerRecord>,
    games: Vec<GameRecord>,
    next_player_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every saved game, oldest first.
    pub async fn games(&self) -> Vec<GameRecord> {
        self.inner.lock().await.games.clone()
    }

    pub async fn player(&self, name: &str) -> Option<PlayerRecord> {
        self.inner
            .lock()
            .await
            .players
            .values()
            .find(|p| p.name == name)
            .cloned()
    }
}

impl GameStore for MemoryStore {
    fn find_player_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<PlayerRecord>, StoreError>> + Send {
        async move { Ok(self.player(name).await) }
    }

    fn create_player(
        &self,
        name: &str,
        rating: i32,
    ) -> impl Future<Output = Result<PlayerRecord, StoreError>> + Send {
        async move {
            let mut inner = self.inner.lock().await;
            inner.next_player_id += 1;
            let record = PlayerRecord {
                id: inner.next_player_id,
                name: name.to_string(),
                rating,
                games_played: 0,
                wins: 0,
                losses: 0,
                draws: 0,
            };
            inner.players.insert(record.id, record.clone());
            Ok(record)
        }
    }

    fn update_player_after_game(
        &self,
        player_id: u64,
        new_rating: Option<i32>,
        outcome: PlayerOutcome,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        async move {
            let mut inner = self.inner.lock().await;
            let player = inner
                .players
                .get_mut(&player_id)
                .ok_or(StoreError::PlayerNotFound(player_id))?;
            if let Some(rating) = new_rating {
                player.rating = rating;
            }
            player.games_played += 1;
            match outcome {
                PlayerOutcome::Win => player.wins += 1,
                PlayerOutcome::Loss => player.losses += 1,
                PlayerOutcome::Draw => player.draws += 1,
            }
            Ok(())
        }
    }

    fn save_game(&self, record: &GameRecord) -> impl Future<Output = Result<(), StoreError>> + Send {
        let record = record.clone();
        async move {
            self.inner.lock().await.games.push(record);
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// PersistenceQueue
// ---------------------------------------------------------------------------

enum PersistJob {
    Finished(Box<GameRecord>),
    Flush(oneshot::Sender<()>),
}

/// Handle for handing finished games to the persistence worker.
///
/// Cheap to clone; every clone feeds the same worker. The worker exits
/// once every handle is dropped.
#[derive(Debug, Clone)]
pub struct PersistenceQueue {
    tx: mpsc::Sender<PersistJob>,
}

impl std::fmt::Debug for PersistJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Finished(record) => write!(f, "Finished({})", record.game_id),
            Self::Flush(_) => write!(f, "Flush"),
        }
    }
}

impl PersistenceQueue {
    /// Starts the worker. At most `capacity` records wait at once.
    pub fn spawn<S: GameStore>(store: Arc<S>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    PersistJob::Finished(record) => persist(store.as_ref(), &record).await,
                    PersistJob::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("persistence worker stopped");
        });
        (Self { tx }, worker)
    }

    /// Queues a record without waiting. Returns `false` if it was dropped
    /// because the queue is full or the worker is gone.
    pub fn submit(&self, record: GameRecord) -> bool {
        let game_id = record.game_id;
        match self.tx.try_send(PersistJob::Finished(Box::new(record))) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%game_id, "persistence queue full, dropping game record");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(%game_id, "persistence worker gone, dropping game record");
                false
            }
        }
    }

    /// Waits until every record submitted so far has been handled, for at
    /// most `timeout`. Returns `false` if the wait was cut short.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let (done_tx, done_rx) = oneshot::channel();
        let flushed = tokio::time::timeout(timeout, async {
            self.tx.send(PersistJob::Flush(done_tx)).await.ok()?;
            done_rx.await.ok()
        })
        .await;
        match flushed {
            Ok(Some(())) => true,
            _ => {
                warn!(?timeout, "persistence flush did not complete");
                false
            }
        }
    }
}

/// Writes one finished game. Errors are logged, never returned.
async fn persist<S: GameStore>(store: &S, record: &GameRecord) {
    for (seat, outcome) in record.seats() {
        if let Err(e) = update_player(store, seat, outcome).await {
            warn!(game_id = %record.game_id, player = %seat.name, error = %e, "failed to update player");
        }
    }
    match store.save_game(record).await {
        Ok(()) => debug!(game_id = %record.game_id, "game saved"),
        Err(e) => warn!(game_id = %record.game_id, error = %e, "failed to save game"),
    }
}

async fn update_player<S: GameStore>(
    store: &S,
    seat: &SeatRecord,
    outcome: PlayerOutcome,
) -> Result<(), StoreError> {
    let player = match store.find_player_by_name(&seat.name).await? {
        Some(player) => player,
        None => store.create_player(&seat.name, seat.rating_before).await?,
    };
    store
        .update_player_after_game(player.id, seat.rating_after, outcome)
        .await
}
