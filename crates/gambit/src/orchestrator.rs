//! The session orchestrator: the single owner of every queue, table, and
//! game on the server.
//!
//! All state lives in one [`Orchestrator`] behind a `tokio::sync::Mutex`,
//! so connection handlers and the periodic sweeps take turns and never
//! interleave inside an operation.
//! Nothing here awaits: replies are pushed onto each connection's outbox
//! and written to the socket by that connection's own task.
//!
//! ```text
//!   handler ──ClientMessage──→ Orchestrator ──→ RatingQueue / OpenTableLobby
//!                                   │                     │ MatchResult
//!                                   │ ←───────────────────┘
//!                                   ├──→ MatchSession ──→ ChessRules
//!                                   ├──→ outboxes (ServerMessage per connection)
//!                                   └──→ PersistenceQueue (at game end)
//! ```
//!
//! Invariant: a connection is in at most one game in progress, and a
//! connection that is in a game is neither queued nor hosting a table.
//! `by_connection` holds exactly the connections seated in games still
//! being played.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gambit_matchmaking::{
    Contender, JoinTable, MatchResult, MatchSource, MatchStrategy, OpenTableLobby, QueueEntry,
    RatingQueue,
};
use gambit_protocol::{
    ClientMessage, Color, ConnectionId, ErrorCode, GameId, ProtocolError, ServerMessage, TableId,
    TimeControl,
};
use gambit_resilience::{RoomAdmission, ShutdownController};
use gambit_session::{ChessRules, GameEnd, MatchSession, SessionConfig, SessionError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::persistence::{GameRecord, PersistenceQueue, SeatRecord};
use crate::rating::{MatchElo, calculate_match_elo};

/// Where replies for one connection are queued.
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

const DEFAULT_RATING: i32 = 1200;
const MAX_RATING: i32 = 4000;
const MAX_NAME_CHARS: usize = 32;
const MAX_PIECE_BANK_CHARS: usize = 64;

/// Checks the identity a client claims when it asks to play.
fn validate_identity(name: &str, rating: Option<i32>) -> Result<(String, i32), ProtocolError> {
    let name = name.trim();
    let chars = name.chars().count();
    if chars == 0 || chars > MAX_NAME_CHARS {
        return Err(ProtocolError::InvalidMessage(format!(
            "name must be 1 to {MAX_NAME_CHARS} characters"
        )));
    }
    let rating = rating.unwrap_or(DEFAULT_RATING);
    if !(0..=MAX_RATING).contains(&rating) {
        return Err(ProtocolError::InvalidMessage(format!(
            "rating must be between 0 and {MAX_RATING}"
        )));
    }
    Ok((name.to_string(), rating))
}

fn validate_time_control(time_control: TimeControl) -> Result<TimeControl, ProtocolError> {
    if time_control.initial_secs == 0 {
        return Err(ProtocolError::InvalidMessage(
            "time control needs a positive initial time".into(),
        ));
    }
    Ok(time_control)
}

fn validate_piece_bank(piece_bank: Option<String>) -> Result<Option<String>, ProtocolError> {
    match piece_bank {
        Some(bank) if bank.chars().count() > MAX_PIECE_BANK_CHARS => Err(
            ProtocolError::InvalidMessage(format!(
                "piece bank must be at most {MAX_PIECE_BANK_CHARS} characters"
            )),
        ),
        other => Ok(other),
    }
}

/// Whole seconds, rounded up.
fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

/// Dispatcher and registry for everything that happens on the server.
pub struct Orchestrator {
    rules: Arc<dyn ChessRules>,
    queue: RatingQueue,
    lobby: OpenTableLobby,
    sessions: HashMap<GameId, MatchSession>,
    by_connection: HashMap<ConnectionId, GameId>,
    outboxes: HashMap<ConnectionId, Outbox>,
    admission: RoomAdmission,
    session_config: SessionConfig,
    finished_retention: Duration,
    next_game_id: u64,
    persistence: PersistenceQueue,
    active: watch::Sender<usize>,
    shutdown: Arc<ShutdownController>,
}

impl Orchestrator {
    pub fn new(
        config: &ServerConfig,
        rules: Arc<dyn ChessRules>,
        persistence: PersistenceQueue,
        shutdown: Arc<ShutdownController>,
    ) -> Self {
        let (active, _) = watch::channel(0);
        Self {
            rules,
            queue: RatingQueue::new(config.queue.clone()),
            lobby: OpenTableLobby::new(config.tables.clone()),
            sessions: HashMap::new(),
            by_connection: HashMap::new(),
            outboxes: HashMap::new(),
            admission: RoomAdmission::new(config.max_rooms),
            session_config: config.session.clone(),
            finished_retention: config.finished_retention,
            next_game_id: 0,
            persistence,
            active,
            shutdown,
        }
    }

    // -- Lookups ------------------------------------------------------------

    pub fn queue(&self) -> &RatingQueue {
        &self.queue
    }

    pub fn lobby(&self) -> &OpenTableLobby {
        &self.lobby
    }

    pub fn session(&self, game_id: GameId) -> Option<&MatchSession> {
        self.sessions.get(&game_id)
    }

    /// The game in progress the connection is playing in.
    pub fn game_of(&self, connection_id: ConnectionId) -> Option<GameId> {
        self.by_connection.get(&connection_id).copied()
    }

    /// Sessions kept in memory, finished ones included.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Games still being played.
    pub fn active_count(&self) -> usize {
        self.sessions.values().filter(|s| !s.is_finished()).count()
    }

    /// Follows [`active_count`](Self::active_count) as it changes.
    pub fn active_sessions(&self) -> watch::Receiver<usize> {
        self.active.subscribe()
    }

    pub fn connection_count(&self) -> usize {
        self.outboxes.len()
    }

    // -- Connections --------------------------------------------------------

    /// Starts delivering messages for `connection_id` to `outbox`.
    pub fn register(&mut self, connection_id: ConnectionId, outbox: Outbox) {
        self.outboxes.insert(connection_id, outbox);
    }

    /// Forgets a closed connection.
    ///
    /// Anything it had waiting is withdrawn. If it was playing, its seat is
    /// marked disconnected and the opponent is told how long the grace
    /// period is; the game itself goes on.
    pub fn handle_disconnect(&mut self, connection_id: ConnectionId, now: Instant) {
        self.outboxes.remove(&connection_id);
        self.withdraw_everywhere(connection_id);

        let Some(game_id) = self.by_connection.remove(&connection_id) else {
            return;
        };
        let grace_secs = self.session_config.disconnect_grace.as_secs();
        let opponent = self.sessions.get_mut(&game_id).and_then(|session| {
            session.handle_disconnect(connection_id, now)?;
            session
                .opponent_of(connection_id)
                .map(|p| p.connection_id)
        });
        if let Some(opponent) = opponent {
            self.send(
                opponent,
                ServerMessage::OpponentDisconnected {
                    game_id,
                    grace_secs,
                },
            );
        }
    }

    /// Sends `message` to every connected client.
    pub fn broadcast(&self, message: &ServerMessage) {
        for outbox in self.outboxes.values() {
            let _ = outbox.send(message.clone());
        }
    }

    fn send(&self, connection_id: ConnectionId, message: ServerMessage) {
        if let Some(outbox) = self.outboxes.get(&connection_id) {
            // A closed outbox means the handler is already gone; the
            // disconnect path cleans up after it.
            let _ = outbox.send(message);
        }
    }

    fn reply_error(&self, connection_id: ConnectionId, code: ErrorCode, message: impl Into<String>) {
        let message = message.into();
        debug!(conn_id = %connection_id, ?code, %message, "request refused");
        self.send(connection_id, ServerMessage::error(code, message));
    }

    fn withdraw_everywhere(&mut self, connection_id: ConnectionId) {
        let sources: [&mut dyn MatchSource; 2] = [&mut self.queue, &mut self.lobby];
        for source in sources {
            if source.withdraw(connection_id) {
                debug!(conn_id = %connection_id, source = source.label(), "withdrawn");
            }
        }
    }

    fn is_waiting(&self, connection_id: ConnectionId) -> bool {
        self.queue.is_waiting(connection_id) || self.lobby.is_waiting(connection_id)
    }

    fn publish_active(&self) {
        let count = self.active_count();
        self.active.send_if_modified(|current| {
            let changed = *current != count;
            *current = count;
            changed
        });
    }

    // -- Dispatch -----------------------------------------------------------

    /// Handles one message from `connection_id`. Every outcome, including
    /// refusal, is answered through the outboxes.
    pub fn handle_message(&mut self, connection_id: ConnectionId, message: ClientMessage, now: Instant) {
        debug!(conn_id = %connection_id, kind = message.kind(), "message");

        if message.starts_pairing() && !self.shutdown.is_running() {
            self.reply_error(
                connection_id,
                ErrorCode::ShuttingDown,
                "server is shutting down, no new games",
            );
            return;
        }

        match message {
            ClientMessage::JoinQueue {
                name,
                rating,
                games_played,
                time_control,
            } => self.join_queue(connection_id, name, rating, games_played, time_control, now),
            ClientMessage::LeaveQueue => {
                self.queue.remove_player(connection_id);
                self.send(connection_id, ServerMessage::QueueLeft);
            }
            ClientMessage::CreateTable {
                name,
                rating,
                piece_bank,
            } => self.create_table(connection_id, name, rating, piece_bank, now),
            ClientMessage::ListTables => {
                let tables = self.lobby.list_tables().map(|t| t.summary(now)).collect();
                self.send(connection_id, ServerMessage::TablesList { tables });
            }
            ClientMessage::JoinTable {
                table_id,
                name,
                rating,
            } => self.join_table(connection_id, table_id, name, rating, now),
            ClientMessage::LeaveTable => match self.lobby.remove_player_table(connection_id) {
                Some(table) => self.send(
                    connection_id,
                    ServerMessage::TableCancelled {
                        table_id: table.table_id,
                    },
                ),
                None => self.reply_error(
                    connection_id,
                    ErrorCode::TableNotFound,
                    "you are not hosting a table",
                ),
            },
            ClientMessage::MakeMove { game_id, mv } => {
                self.make_move(connection_id, game_id, &mv, now);
            }
            ClientMessage::Resign { game_id } => self.resign(connection_id, game_id, now),
            ClientMessage::OfferDraw { game_id } => self.offer_draw(connection_id, game_id),
            ClientMessage::AcceptDraw { game_id } => self.accept_draw(connection_id, game_id, now),
            ClientMessage::DeclineDraw { game_id } => self.decline_draw(connection_id, game_id),
            ClientMessage::Reconnect {
                game_id,
                player_token,
            } => self.reconnect(connection_id, game_id, &player_token, now),
        }
    }

    // -- Pairing ------------------------------------------------------------

    /// Common refusals for a connection asking to be paired.
    fn check_can_wait(&self, connection_id: ConnectionId) -> Result<(), (ErrorCode, &'static str)> {
        if self.by_connection.contains_key(&connection_id) {
            return Err((ErrorCode::AlreadyInGame, "finish your current game first"));
        }
        if self.is_waiting(connection_id) {
            return Err((
                ErrorCode::AlreadyWaiting,
                "you are already queued or hosting a table",
            ));
        }
        Ok(())
    }

    fn join_queue(
        &mut self,
        connection_id: ConnectionId,
        name: String,
        rating: Option<i32>,
        games_played: Option<u32>,
        time_control: TimeControl,
        now: Instant,
    ) {
        let validated = validate_identity(&name, rating).and_then(|identity| {
            validate_time_control(time_control).map(|time_control| (identity, time_control))
        });
        let ((display_name, rating), time_control) = match validated {
            Ok(v) => v,
            Err(e) => return self.reply_error(connection_id, e.code(), e.to_string()),
        };
        if let Err((code, msg)) = self.check_can_wait(connection_id) {
            return self.reply_error(connection_id, code, msg);
        }
        if !self.admission.can_create_room(self.active_count()) {
            return self.reply_error(connection_id, ErrorCode::ServerFull, "server is full");
        }

        let entry = QueueEntry {
            connection_id,
            display_name,
            rating,
            games_played: games_played.unwrap_or(0),
            time_control,
            joined_at: now,
        };
        info!(conn_id = %connection_id, rating, %time_control, "joined queue");
        match self.queue.offer(entry) {
            Some(pairing) => self.start_match(pairing, now),
            None => self.send_queue_status(connection_id, now),
        }
    }

    fn send_queue_status(&self, connection_id: ConnectionId, now: Instant) {
        let Some(position) = self.queue.position(connection_id) else {
            return;
        };
        let estimated_wait = self
            .queue
            .estimated_wait(connection_id, now)
            .map(ceil_secs);
        self.send(
            connection_id,
            ServerMessage::QueueStatus {
                position,
                estimated_wait,
            },
        );
    }

    fn create_table(
        &mut self,
        connection_id: ConnectionId,
        name: String,
        rating: Option<i32>,
        piece_bank: Option<String>,
        now: Instant,
    ) {
        let validated = validate_identity(&name, rating).and_then(|identity| {
            validate_piece_bank(piece_bank).map(|piece_bank| (identity, piece_bank))
        });
        let ((display_name, rating), piece_bank) = match validated {
            Ok(v) => v,
            Err(e) => return self.reply_error(connection_id, e.code(), e.to_string()),
        };
        if let Err((code, msg)) = self.check_can_wait(connection_id) {
            return self.reply_error(connection_id, code, msg);
        }

        let host = Contender {
            connection_id,
            display_name,
            rating,
            games_played: 0,
        };
        match self.lobby.create_table(host, piece_bank, now) {
            Some(table_id) => {
                info!(conn_id = %connection_id, %table_id, "table created");
                self.send(connection_id, ServerMessage::TableCreated { table_id });
            }
            None => self.reply_error(
                connection_id,
                ErrorCode::AlreadyWaiting,
                "you are already hosting a table",
            ),
        }
    }

    fn join_table(
        &mut self,
        connection_id: ConnectionId,
        table_id: TableId,
        name: String,
        rating: Option<i32>,
        now: Instant,
    ) {
        let (display_name, rating) = match validate_identity(&name, rating) {
            Ok(v) => v,
            Err(e) => return self.reply_error(connection_id, e.code(), e.to_string()),
        };
        if self.by_connection.contains_key(&connection_id) {
            return self.reply_error(
                connection_id,
                ErrorCode::AlreadyInGame,
                "finish your current game first",
            );
        }
        if self.lobby.player_table_id(connection_id) == Some(table_id) {
            return self.reply_error(connection_id, ErrorCode::OwnTable, "you cannot join your own table");
        }
        if self.is_waiting(connection_id) {
            return self.reply_error(
                connection_id,
                ErrorCode::AlreadyWaiting,
                "you are already queued or hosting a table",
            );
        }
        if self.lobby.get_table(table_id).is_none() {
            return self.reply_error(
                connection_id,
                ErrorCode::TableNotFound,
                format!("table {table_id} is no longer open"),
            );
        }
        if !self.admission.can_create_room(self.active_count()) {
            return self.reply_error(connection_id, ErrorCode::ServerFull, "server is full");
        }

        let guest = Contender {
            connection_id,
            display_name,
            rating,
            games_played: 0,
        };
        if let Some(pairing) = self.lobby.offer(JoinTable { table_id, guest }) {
            self.start_match(pairing, now);
        }
    }

    /// Turns a pairing into a session and tells both players.
    fn start_match(&mut self, pairing: MatchResult, now: Instant) {
        self.next_game_id += 1;
        let game_id = GameId(self.next_game_id);
        let session = MatchSession::new(
            game_id,
            pairing,
            self.rules.as_ref(),
            self.session_config.clone(),
            now,
        );

        for player in session.players() {
            let opponent = session.player(player.color.opposite());
            self.by_connection.insert(player.connection_id, game_id);
            self.send(
                player.connection_id,
                ServerMessage::GameFound {
                    game_id,
                    color: player.color,
                    opponent: opponent.as_opponent(),
                    time_control: session.time_control(),
                    fen: session.position().to_string(),
                    player_token: player.reconnect_token.clone(),
                    rated: session.is_rated(),
                    piece_bank: session.piece_bank().map(str::to_string),
                },
            );
        }

        self.sessions.insert(game_id, session);
        self.publish_active();
    }

    // -- Game actions -------------------------------------------------------

    fn make_move(&mut self, connection_id: ConnectionId, game_id: GameId, mv: &str, now: Instant) {
        let Some(session) = self.sessions.get_mut(&game_id) else {
            return self.reply_error(connection_id, ErrorCode::GameNotFound, format!("no game {game_id}"));
        };
        let result = session.make_move(self.rules.as_ref(), connection_id, mv, now);
        let opponent = session.opponent_of(connection_id).map(|p| p.connection_id);

        match result {
            Ok(ack) => {
                self.send(
                    connection_id,
                    ServerMessage::MoveAck {
                        game_id,
                        mv: ack.notation.clone(),
                        fen: ack.fen.clone(),
                        clocks: ack.clocks,
                    },
                );
                if let Some(opponent) = opponent {
                    self.send(
                        opponent,
                        ServerMessage::OpponentMove {
                            game_id,
                            mv: ack.notation,
                            fen: ack.fen,
                            clocks: ack.clocks,
                        },
                    );
                }
                if let Some(end) = ack.end {
                    self.end_game(game_id, end);
                }
            }
            Err(SessionError::TimeExpired(end)) => self.end_game(game_id, end),
            Err(e) => self.reply_error(connection_id, e.code(), e.to_string()),
        }
    }

    fn resign(&mut self, connection_id: ConnectionId, game_id: GameId, now: Instant) {
        let Some(session) = self.sessions.get_mut(&game_id) else {
            return self.reply_error(connection_id, ErrorCode::GameNotFound, format!("no game {game_id}"));
        };
        match session.resign(connection_id, now) {
            Some(end) => self.end_game(game_id, end),
            None => self.reply_error(connection_id, ErrorCode::InvalidAction, "cannot resign this game"),
        }
    }

    fn offer_draw(&mut self, connection_id: ConnectionId, game_id: GameId) {
        let Some(session) = self.sessions.get_mut(&game_id) else {
            return self.reply_error(connection_id, ErrorCode::GameNotFound, format!("no game {game_id}"));
        };
        match session.offer_draw(connection_id) {
            Some(from) => {
                let opponent = session.player(from.opposite()).connection_id;
                self.send(opponent, ServerMessage::DrawOffer { game_id, from });
            }
            None => self.reply_error(
                connection_id,
                ErrorCode::InvalidAction,
                "a draw cannot be offered right now",
            ),
        }
    }

    fn accept_draw(&mut self, connection_id: ConnectionId, game_id: GameId, now: Instant) {
        let Some(session) = self.sessions.get_mut(&game_id) else {
            return self.reply_error(connection_id, ErrorCode::GameNotFound, format!("no game {game_id}"));
        };
        match session.accept_draw(connection_id, now) {
            Some(end) => self.end_game(game_id, end),
            None => self.reply_error(connection_id, ErrorCode::InvalidAction, "no draw offer to accept"),
        }
    }

    fn decline_draw(&mut self, connection_id: ConnectionId, game_id: GameId) {
        let Some(session) = self.sessions.get_mut(&game_id) else {
            return self.reply_error(connection_id, ErrorCode::GameNotFound, format!("no game {game_id}"));
        };
        let offerer = session
            .pending_draw()
            .map(|color| session.player(color).connection_id);
        if session.decline_draw(connection_id) {
            if let Some(offerer) = offerer {
                self.send(offerer, ServerMessage::DrawDeclined { game_id });
            }
        } else {
            self.reply_error(connection_id, ErrorCode::InvalidAction, "no draw offer to decline");
        }
    }

    fn reconnect(&mut self, connection_id: ConnectionId, game_id: GameId, token: &str, now: Instant) {
        if let Some(current) = self.game_of(connection_id) {
            if current != game_id {
                return self.reply_error(
                    connection_id,
                    ErrorCode::AlreadyInGame,
                    "this connection is already playing another game",
                );
            }
        }
        let Some(session) = self.sessions.get_mut(&game_id) else {
            return self.reply_error(connection_id, ErrorCode::GameNotFound, format!("no game {game_id}"));
        };
        let Some(reconnection) = session.handle_reconnect(token, connection_id) else {
            return self.reply_error(connection_id, ErrorCode::InvalidToken, "invalid reconnect token");
        };

        let color = reconnection.color;
        let opponent = session.player(color.opposite());
        let finished = session.is_finished();
        let opponent_connection = opponent.connection_id;
        let resumed = ServerMessage::Reconnected {
            game_id,
            color,
            opponent: opponent.as_opponent(),
            time_control: session.time_control(),
            fen: session.position().to_string(),
            moves: session.moves().to_vec(),
            clocks: session.clocks(now),
            finished,
        };

        if !finished {
            if self.by_connection.get(&reconnection.previous_connection) == Some(&game_id) {
                self.by_connection.remove(&reconnection.previous_connection);
            }
            self.withdraw_everywhere(connection_id);
            self.by_connection.insert(connection_id, game_id);
        }
        self.send(connection_id, resumed);
        if !finished {
            self.send(opponent_connection, ServerMessage::OpponentReconnected { game_id });
        }
    }

    // -- End of game --------------------------------------------------------

    /// Tells both players how the game ended, releases their seats, and
    /// hands the record to persistence.
    fn end_game(&mut self, game_id: GameId, end: GameEnd) {
        let Some(session) = self.sessions.get(&game_id) else {
            return;
        };
        let [white, black] = session.players();
        let elo: Option<MatchElo> = session.is_rated().then(|| {
            calculate_match_elo(
                white.rating,
                black.rating,
                end.result.score_for(Color::White),
                white.games_played,
                black.games_played,
            )
        });

        for player in [white, black] {
            let change = elo.map(|e| match player.color {
                Color::White => e.a,
                Color::Black => e.b,
            });
            self.send(
                player.connection_id,
                ServerMessage::GameOver {
                    game_id,
                    result: end.result,
                    reason: end.reason,
                    winner: end.winner(),
                    elo_change: change.map(|c| c.change),
                    new_elo: change.map(|c| c.new_rating),
                },
            );
        }

        let record = GameRecord {
            game_id,
            white: SeatRecord {
                name: white.display_name.clone(),
                rating_before: white.rating,
                rating_after: elo.map(|e| e.a.new_rating),
            },
            black: SeatRecord {
                name: black.display_name.clone(),
                rating_before: black.rating,
                rating_after: elo.map(|e| e.b.new_rating),
            },
            result: end.result,
            reason: end.reason,
            moves: session.moves().to_vec(),
            final_fen: session.position().to_string(),
            rated: session.is_rated(),
            time_control: session.time_control(),
            duration_secs: end
                .finished_at
                .saturating_duration_since(session.created_at())
                .as_secs(),
        };
        let seated = [white.connection_id, black.connection_id];

        info!(game_id = %game_id, result = %end.result, reason = %end.reason, "game over");
        for connection_id in seated {
            if self.by_connection.get(&connection_id) == Some(&game_id) {
                self.by_connection.remove(&connection_id);
            }
        }
        // Queue the record before the count drops so a shutdown waiting on
        // that count flushes it.
        self.persistence.submit(record);
        self.publish_active();
    }

    // -- Periodic work ------------------------------------------------------

    /// Drops players who waited too long, then pairs whoever fits.
    pub fn queue_tick(&mut self, now: Instant) {
        for entry in self.queue.check_timeouts(now) {
            let waited_secs = now.saturating_duration_since(entry.joined_at).as_secs();
            info!(conn_id = %entry.connection_id, waited_secs, "queue timeout");
            self.send(entry.connection_id, ServerMessage::QueueTimeout { waited_secs });
        }

        if !self.shutdown.is_running() {
            return;
        }
        for pairing in self.queue.scan_for_matches(now) {
            if self.admission.can_create_room(self.active_count()) {
                self.start_match(pairing, now);
            } else {
                warn!("room limit reached, refusing queued pairing");
                for connection_id in [pairing.player1.connection_id, pairing.player2.connection_id] {
                    self.reply_error(connection_id, ErrorCode::ServerFull, "server is full");
                }
            }
        }
    }

    /// Ends games on the clock or by disconnect forfeit, then purges
    /// finished games past their retention.
    pub fn session_tick(&mut self, now: Instant) {
        let ended: Vec<(GameId, GameEnd)> = self
            .sessions
            .iter_mut()
            .filter(|(_, s)| !s.is_finished())
            .filter_map(|(id, s)| {
                s.check_flag(now)
                    .or_else(|| s.check_disconnect_timeout(now))
                    .map(|end| (*id, end))
            })
            .collect();
        for (game_id, end) in ended {
            self.end_game(game_id, end);
        }

        let retention = self.finished_retention;
        let before = self.sessions.len();
        self.sessions
            .retain(|_, s| s.finished_for(now).is_none_or(|age| age <= retention));
        let purged = before - self.sessions.len();
        if purged > 0 {
            debug!(purged, "finished sessions purged");
        }
    }

    /// Expires open tables nobody joined.
    pub fn table_tick(&mut self, now: Instant) {
        for table in self.lobby.remove_stale(now) {
            info!(table_id = %table.table_id, "table expired");
            self.send(
                table.host_connection_id,
                ServerMessage::TableExpired {
                    table_id: table.table_id,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use gambit_protocol::{EndReason, GameResult};
    use gambit_session::StandardRules;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::persistence::MemoryStore;

    struct Harness {
        orch: Orchestrator,
        store: Arc<MemoryStore>,
        persistence: PersistenceQueue,
        shutdown: Arc<ShutdownController>,
        t0: Instant,
    }

    fn harness_with(config: ServerConfig) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let (persistence, _worker) = PersistenceQueue::spawn(Arc::clone(&store), 16);
        let shutdown = ShutdownController::new();
        let orch = Orchestrator::new(
            &config,
            Arc::new(StandardRules::new()),
            persistence.clone(),
            Arc::clone(&shutdown),
        );
        Harness {
            orch,
            store,
            persistence,
            shutdown,
            t0: Instant::now(),
        }
    }

    fn harness() -> Harness {
        harness_with(ServerConfig::default())
    }

    fn connect(h: &mut Harness, id: u64) -> (ConnectionId, UnboundedReceiver<ServerMessage>) {
        let conn = ConnectionId::new(id);
        let (tx, rx) = mpsc::unbounded_channel();
        h.orch.register(conn, tx);
        (conn, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn last(rx: &mut UnboundedReceiver<ServerMessage>) -> ServerMessage {
        drain(rx).pop().expect("expected a message")
    }

    fn join_queue(name: &str, rating: i32) -> ClientMessage {
        ClientMessage::JoinQueue {
            name: name.into(),
            rating: Some(rating),
            games_played: Some(100),
            time_control: TimeControl::new(600, 0),
        }
    }

    fn error_code(msg: &ServerMessage) -> ErrorCode {
        match msg {
            ServerMessage::Error { code, .. } => *code,
            other => panic!("expected error, got {other:?}"),
        }
    }

    struct Seat {
        conn: ConnectionId,
        rx: UnboundedReceiver<ServerMessage>,
        color: Color,
        token: String,
    }

    fn seat_from(conn: ConnectionId, mut rx: UnboundedReceiver<ServerMessage>) -> (GameId, Seat) {
        match last(&mut rx) {
            ServerMessage::GameFound {
                game_id,
                color,
                player_token,
                ..
            } => (
                game_id,
                Seat {
                    conn,
                    rx,
                    color,
                    token: player_token,
                },
            ),
            other => panic!("expected game_found, got {other:?}"),
        }
    }

    /// Pairs two equal-rated players through the queue.
    fn start_game(h: &mut Harness) -> (GameId, Seat, Seat) {
        let (a, rx_a) = connect(h, 1);
        let (b, rx_b) = connect(h, 2);
        h.orch.handle_message(a, join_queue("ada", 1500), h.t0);
        h.orch.handle_message(b, join_queue("bob", 1500), h.t0);
        let (game_id, seat_a) = seat_from(a, rx_a);
        let (_, seat_b) = seat_from(b, rx_b);
        if seat_a.color == Color::White {
            (game_id, seat_a, seat_b)
        } else {
            (game_id, seat_b, seat_a)
        }
    }

    fn play(h: &mut Harness, game_id: GameId, seat: &Seat, mv: &str) {
        h.orch.handle_message(
            seat.conn,
            ClientMessage::MakeMove {
                game_id,
                mv: mv.into(),
            },
            h.t0,
        );
    }

    #[tokio::test]
    async fn test_join_queue_alone_gets_status() {
        let mut h = harness();
        let (a, mut rx) = connect(&mut h, 1);
        h.orch.handle_message(a, join_queue("ada", 1500), h.t0);
        assert_eq!(
            last(&mut rx),
            ServerMessage::QueueStatus {
                position: 1,
                estimated_wait: None
            }
        );
        assert!(h.orch.queue().contains(a));
    }

    #[tokio::test]
    async fn test_join_queue_estimated_wait_in_whole_seconds() {
        let mut h = harness();
        let (a, _rx_a) = connect(&mut h, 1);
        let (b, mut rx_b) = connect(&mut h, 2);
        h.orch.handle_message(a, join_queue("ada", 1500), h.t0);
        // Gap 150 needs the 200 window, reached after 15s of waiting.
        h.orch.handle_message(b, join_queue("bob", 1650), h.t0);
        assert_eq!(
            last(&mut rx_b),
            ServerMessage::QueueStatus {
                position: 2,
                estimated_wait: Some(15)
            }
        );
    }

    #[tokio::test]
    async fn test_join_queue_compatible_pair_starts_rated_game() {
        let mut h = harness();
        let (game_id, white, black) = start_game(&mut h);
        assert_eq!(white.color, Color::White);
        assert_eq!(black.color, Color::Black);
        assert_ne!(white.token, black.token);

        let session = h.orch.session(game_id).unwrap();
        assert!(session.is_rated());
        assert_eq!(session.time_control(), Some(TimeControl::new(600, 0)));
        assert_eq!(h.orch.game_of(white.conn), Some(game_id));
        assert_eq!(h.orch.game_of(black.conn), Some(game_id));
        assert!(h.orch.queue().is_empty());
        assert_eq!(*h.orch.active_sessions().borrow(), 1);
    }

    #[tokio::test]
    async fn test_join_queue_invalid_identity_rejected() {
        let mut h = harness();
        let (a, mut rx) = connect(&mut h, 1);

        h.orch.handle_message(a, join_queue("   ", 1500), h.t0);
        assert_eq!(error_code(&last(&mut rx)), ErrorCode::InvalidMessage);

        h.orch.handle_message(a, join_queue(&"x".repeat(33), 1500), h.t0);
        assert_eq!(error_code(&last(&mut rx)), ErrorCode::InvalidMessage);

        h.orch.handle_message(a, join_queue("ada", 4001), h.t0);
        assert_eq!(error_code(&last(&mut rx)), ErrorCode::InvalidMessage);

        h.orch.handle_message(
            a,
            ClientMessage::JoinQueue {
                name: "ada".into(),
                rating: None,
                games_played: None,
                time_control: TimeControl::new(0, 5),
            },
            h.t0,
        );
        assert_eq!(error_code(&last(&mut rx)), ErrorCode::InvalidMessage);
        assert!(h.orch.queue().is_empty());
    }

    #[tokio::test]
    async fn test_join_queue_twice_already_waiting() {
        let mut h = harness();
        let (a, mut rx) = connect(&mut h, 1);
        h.orch.handle_message(a, join_queue("ada", 1500), h.t0);
        h.orch.handle_message(a, join_queue("ada", 1500), h.t0);
        assert_eq!(error_code(&last(&mut rx)), ErrorCode::AlreadyWaiting);
        assert_eq!(h.orch.queue().len(), 1);
    }

    #[tokio::test]
    async fn test_join_queue_while_playing_already_in_game() {
        let mut h = harness();
        let (_, mut white, _) = start_game(&mut h);
        h.orch.handle_message(white.conn, join_queue("ada", 1500), h.t0);
        assert_eq!(error_code(&last(&mut white.rx)), ErrorCode::AlreadyInGame);
    }

    #[tokio::test]
    async fn test_join_queue_during_shutdown_refused() {
        let mut h = harness();
        h.shutdown.request_shutdown();
        let (a, mut rx) = connect(&mut h, 1);
        h.orch.handle_message(a, join_queue("ada", 1500), h.t0);
        assert_eq!(error_code(&last(&mut rx)), ErrorCode::ShuttingDown);
    }

    #[tokio::test]
    async fn test_join_queue_room_limit_server_full() {
        let mut h = harness_with(ServerConfig {
            max_rooms: 1,
            ..ServerConfig::default()
        });
        start_game(&mut h);
        let (c, mut rx) = connect(&mut h, 3);
        h.orch.handle_message(c, join_queue("cy", 1500), h.t0);
        assert_eq!(error_code(&last(&mut rx)), ErrorCode::ServerFull);
    }

    #[tokio::test]
    async fn test_leave_queue_removes_player() {
        let mut h = harness();
        let (a, mut rx) = connect(&mut h, 1);
        h.orch.handle_message(a, join_queue("ada", 1500), h.t0);
        h.orch.handle_message(a, ClientMessage::LeaveQueue, h.t0);
        assert_eq!(last(&mut rx), ServerMessage::QueueLeft);
        assert!(h.orch.queue().is_empty());
    }

    #[tokio::test]
    async fn test_queue_tick_times_out_wide_gap() {
        let mut h = harness();
        let (a, mut rx_a) = connect(&mut h, 1);
        let (b, mut rx_b) = connect(&mut h, 2);
        h.orch.handle_message(a, join_queue("ada", 1200), h.t0);
        h.orch.handle_message(b, join_queue("bob", 1650), h.t0);
        drain(&mut rx_a);
        drain(&mut rx_b);

        for secs in [16, 31, 46] {
            h.orch.queue_tick(h.t0 + Duration::from_secs(secs));
            assert_eq!(h.orch.active_count(), 0);
        }
        h.orch.queue_tick(h.t0 + Duration::from_secs(61));
        assert_eq!(last(&mut rx_a), ServerMessage::QueueTimeout { waited_secs: 61 });
        assert_eq!(last(&mut rx_b), ServerMessage::QueueTimeout { waited_secs: 61 });
        assert!(h.orch.queue().is_empty());
    }

    #[tokio::test]
    async fn test_queue_tick_pairs_once_window_widens() {
        let mut h = harness();
        let (a, _rx_a) = connect(&mut h, 1);
        let (b, mut rx_b) = connect(&mut h, 2);
        h.orch.handle_message(a, join_queue("ada", 1500), h.t0);
        h.orch.handle_message(b, join_queue("bob", 1650), h.t0);

        h.orch.queue_tick(h.t0 + Duration::from_secs(5));
        assert_eq!(h.orch.active_count(), 0);
        h.orch.queue_tick(h.t0 + Duration::from_secs(15));
        assert_eq!(h.orch.active_count(), 1);
        assert!(matches!(last(&mut rx_b), ServerMessage::GameFound { .. }));
    }

    #[tokio::test]
    async fn test_queue_tick_no_scan_while_draining() {
        let mut h = harness();
        let (a, _rx_a) = connect(&mut h, 1);
        let (b, _rx_b) = connect(&mut h, 2);
        h.orch.handle_message(a, join_queue("ada", 1500), h.t0);
        h.orch.handle_message(b, join_queue("bob", 1650), h.t0);
        h.shutdown.request_shutdown();
        h.orch.queue_tick(h.t0 + Duration::from_secs(20));
        assert_eq!(h.orch.active_count(), 0);
    }

    #[tokio::test]
    async fn test_create_table_then_list() {
        let mut h = harness();
        let (a, mut rx) = connect(&mut h, 1);
        h.orch.handle_message(
            a,
            ClientMessage::CreateTable {
                name: "ada".into(),
                rating: None,
                piece_bank: Some("staunton".into()),
            },
            h.t0,
        );
        let table_id = match last(&mut rx) {
            ServerMessage::TableCreated { table_id } => table_id,
            other => panic!("expected table_created, got {other:?}"),
        };

        h.orch
            .handle_message(a, ClientMessage::ListTables, h.t0 + Duration::from_secs(3));
        match last(&mut rx) {
            ServerMessage::TablesList { tables } => {
                assert_eq!(tables.len(), 1);
                assert_eq!(tables[0].table_id, table_id);
                assert_eq!(tables[0].host_rating, DEFAULT_RATING);
                assert_eq!(tables[0].waiting_secs, 3);
                assert_eq!(tables[0].piece_bank.as_deref(), Some("staunton"));
            }
            other => panic!("expected tables_list, got {other:?}"),
        }
    }

    fn create_table(h: &mut Harness, conn: ConnectionId, rx: &mut UnboundedReceiver<ServerMessage>) -> TableId {
        h.orch.handle_message(
            conn,
            ClientMessage::CreateTable {
                name: "host".into(),
                rating: Some(1400),
                piece_bank: None,
            },
            h.t0,
        );
        match last(rx) {
            ServerMessage::TableCreated { table_id } => table_id,
            other => panic!("expected table_created, got {other:?}"),
        }
    }

    fn join_table(table_id: TableId) -> ClientMessage {
        ClientMessage::JoinTable {
            table_id,
            name: "guest".into(),
            rating: Some(1800),
        }
    }

    #[tokio::test]
    async fn test_join_table_starts_casual_untimed_game() {
        let mut h = harness();
        let (host, mut rx_host) = connect(&mut h, 1);
        let (guest, rx_guest) = connect(&mut h, 2);
        let table_id = create_table(&mut h, host, &mut rx_host);

        h.orch.handle_message(guest, join_table(table_id), h.t0);
        let (game_id, host_seat) = seat_from(host, rx_host);
        let (_, guest_seat) = seat_from(guest, rx_guest);
        assert_ne!(host_seat.color, guest_seat.color);

        let session = h.orch.session(game_id).unwrap();
        assert!(!session.is_rated());
        assert_eq!(session.time_control(), None);
        assert!(h.orch.lobby().is_empty());
    }

    #[tokio::test]
    async fn test_join_table_own_table_refused() {
        let mut h = harness();
        let (host, mut rx) = connect(&mut h, 1);
        let table_id = create_table(&mut h, host, &mut rx);
        h.orch.handle_message(host, join_table(table_id), h.t0);
        assert_eq!(error_code(&last(&mut rx)), ErrorCode::OwnTable);
        assert_eq!(h.orch.lobby().len(), 1);
    }

    #[tokio::test]
    async fn test_join_table_unknown_table_not_found() {
        let mut h = harness();
        let (guest, mut rx) = connect(&mut h, 1);
        h.orch.handle_message(guest, join_table(TableId(99)), h.t0);
        assert_eq!(error_code(&last(&mut rx)), ErrorCode::TableNotFound);
    }

    #[tokio::test]
    async fn test_join_table_while_queued_already_waiting() {
        let mut h = harness();
        let (host, mut rx_host) = connect(&mut h, 1);
        let (guest, mut rx_guest) = connect(&mut h, 2);
        let table_id = create_table(&mut h, host, &mut rx_host);
        h.orch.handle_message(guest, join_queue("guest", 1500), h.t0);
        h.orch.handle_message(guest, join_table(table_id), h.t0);
        assert_eq!(error_code(&last(&mut rx_guest)), ErrorCode::AlreadyWaiting);
    }

    #[tokio::test]
    async fn test_leave_table_cancels_or_reports_missing() {
        let mut h = harness();
        let (host, mut rx) = connect(&mut h, 1);
        let table_id = create_table(&mut h, host, &mut rx);
        h.orch.handle_message(host, ClientMessage::LeaveTable, h.t0);
        assert_eq!(last(&mut rx), ServerMessage::TableCancelled { table_id });
        h.orch.handle_message(host, ClientMessage::LeaveTable, h.t0);
        assert_eq!(error_code(&last(&mut rx)), ErrorCode::TableNotFound);
    }

    #[tokio::test]
    async fn test_table_tick_expires_old_tables() {
        let mut h = harness();
        let (host, mut rx) = connect(&mut h, 1);
        let table_id = create_table(&mut h, host, &mut rx);

        h.orch.table_tick(h.t0 + Duration::from_secs(600));
        assert!(drain(&mut rx).is_empty());
        h.orch.table_tick(h.t0 + Duration::from_secs(601));
        assert_eq!(last(&mut rx), ServerMessage::TableExpired { table_id });
        assert!(h.orch.lobby().is_empty());
    }

    #[tokio::test]
    async fn test_make_move_relays_to_opponent() {
        let mut h = harness();
        let (game_id, mut white, mut black) = start_game(&mut h);
        play(&mut h, game_id, &white, "e2e4");

        match last(&mut white.rx) {
            ServerMessage::MoveAck { mv, clocks, .. } => {
                assert_eq!(mv, "e4");
                assert!(clocks.is_some());
            }
            other => panic!("expected move_ack, got {other:?}"),
        }
        match last(&mut black.rx) {
            ServerMessage::OpponentMove { mv, fen, .. } => {
                assert_eq!(mv, "e4");
                assert!(fen.contains(" b "));
            }
            other => panic!("expected opponent_move, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_make_move_errors_map_to_codes() {
        let mut h = harness();
        let (game_id, mut white, mut black) = start_game(&mut h);

        play(&mut h, game_id, &black, "e7e5");
        assert_eq!(error_code(&last(&mut black.rx)), ErrorCode::InvalidAction);

        play(&mut h, game_id, &white, "e2e5");
        assert_eq!(error_code(&last(&mut white.rx)), ErrorCode::IllegalMove);

        play(&mut h, game_id, &white, "zz");
        assert_eq!(error_code(&last(&mut white.rx)), ErrorCode::IllegalMove);

        play(&mut h, GameId(404), &white, "e2e4");
        assert_eq!(error_code(&last(&mut white.rx)), ErrorCode::GameNotFound);
    }

    #[tokio::test]
    async fn test_make_move_checkmate_ends_rated_game() {
        let mut h = harness();
        let (game_id, mut white, mut black) = start_game(&mut h);
        for (seat, mv) in [
            (&white, "f2f3"),
            (&black, "e7e5"),
            (&white, "g2g4"),
            (&black, "d8h4"),
        ] {
            play(&mut h, game_id, seat, mv);
        }

        let over = drain(&mut black.rx)
            .into_iter()
            .find(|m| matches!(m, ServerMessage::GameOver { .. }))
            .unwrap();
        assert_eq!(
            over,
            ServerMessage::GameOver {
                game_id,
                result: GameResult::BlackWins,
                reason: EndReason::Checkmate,
                winner: Some(Color::Black),
                elo_change: Some(10),
                new_elo: Some(1510),
            }
        );
        let white_over = drain(&mut white.rx).pop().unwrap();
        assert!(matches!(
            white_over,
            ServerMessage::GameOver {
                elo_change: Some(-10),
                new_elo: Some(1490),
                ..
            }
        ));

        assert_eq!(h.orch.game_of(white.conn), None);
        assert_eq!(h.orch.active_count(), 0);
        assert_eq!(*h.orch.active_sessions().borrow(), 0);

        assert!(h.persistence.flush(Duration::from_secs(1)).await);
        let games = h.store.games().await;
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].moves, vec!["f3", "e5", "g4", "Qh4#"]);
        assert_eq!(games[0].black.rating_after, Some(1510));
    }

    #[tokio::test]
    async fn test_resign_opponent_wins() {
        let mut h = harness();
        let (game_id, white, mut black) = start_game(&mut h);
        h.orch
            .handle_message(white.conn, ClientMessage::Resign { game_id }, h.t0);
        match last(&mut black.rx) {
            ServerMessage::GameOver { result, reason, .. } => {
                assert_eq!(result, GameResult::BlackWins);
                assert_eq!(reason, EndReason::Resignation);
            }
            other => panic!("expected game_over, got {other:?}"),
        }

        // A finished game refuses further actions.
        h.orch
            .handle_message(black.conn, ClientMessage::Resign { game_id }, h.t0);
        assert_eq!(error_code(&last(&mut black.rx)), ErrorCode::InvalidAction);
    }

    #[tokio::test]
    async fn test_offer_then_decline_draw() {
        let mut h = harness();
        let (game_id, mut white, mut black) = start_game(&mut h);

        h.orch
            .handle_message(white.conn, ClientMessage::OfferDraw { game_id }, h.t0);
        assert_eq!(
            last(&mut black.rx),
            ServerMessage::DrawOffer {
                game_id,
                from: Color::White
            }
        );

        h.orch
            .handle_message(black.conn, ClientMessage::DeclineDraw { game_id }, h.t0);
        assert_eq!(last(&mut white.rx), ServerMessage::DrawDeclined { game_id });

        h.orch
            .handle_message(black.conn, ClientMessage::AcceptDraw { game_id }, h.t0);
        assert_eq!(error_code(&last(&mut black.rx)), ErrorCode::InvalidAction);
        assert!(!h.orch.session(game_id).unwrap().is_finished());
    }

    #[tokio::test]
    async fn test_accept_draw_ends_game_by_agreement() {
        let mut h = harness();
        let (game_id, mut white, black) = start_game(&mut h);
        h.orch
            .handle_message(black.conn, ClientMessage::OfferDraw { game_id }, h.t0);
        h.orch
            .handle_message(white.conn, ClientMessage::AcceptDraw { game_id }, h.t0);
        match last(&mut white.rx) {
            ServerMessage::GameOver {
                result,
                reason,
                winner,
                elo_change,
                ..
            } => {
                assert_eq!(result, GameResult::Draw);
                assert_eq!(reason, EndReason::Agreement);
                assert_eq!(winner, None);
                assert_eq!(elo_change, Some(0));
            }
            other => panic!("expected game_over, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnect_notifies_opponent_then_forfeits() {
        let mut h = harness();
        let (game_id, white, mut black) = start_game(&mut h);
        h.orch.handle_disconnect(white.conn, h.t0);
        assert_eq!(
            last(&mut black.rx),
            ServerMessage::OpponentDisconnected {
                game_id,
                grace_secs: 60
            }
        );

        h.orch.session_tick(h.t0 + Duration::from_secs(60));
        assert!(!h.orch.session(game_id).unwrap().is_finished());

        h.orch.session_tick(h.t0 + Duration::from_secs(61));
        match last(&mut black.rx) {
            ServerMessage::GameOver { result, reason, .. } => {
                assert_eq!(result, GameResult::BlackWins);
                assert_eq!(reason, EndReason::DisconnectTimeout);
            }
            other => panic!("expected game_over, got {other:?}"),
        }
        assert_eq!(h.orch.game_of(black.conn), None);
    }

    #[tokio::test]
    async fn test_disconnect_withdraws_from_queue_and_lobby() {
        let mut h = harness();
        let (a, _rx_a) = connect(&mut h, 1);
        let (b, mut rx_b) = connect(&mut h, 2);
        h.orch.handle_message(a, join_queue("ada", 1500), h.t0);
        create_table(&mut h, b, &mut rx_b);

        h.orch.handle_disconnect(a, h.t0);
        h.orch.handle_disconnect(b, h.t0);
        assert!(h.orch.queue().is_empty());
        assert!(h.orch.lobby().is_empty());
        assert_eq!(h.orch.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_resumes_game_on_new_connection() {
        let mut h = harness();
        let (game_id, white, mut black) = start_game(&mut h);
        play(&mut h, game_id, &white, "e2e4");
        h.orch.handle_disconnect(white.conn, h.t0);
        drain(&mut black.rx);

        let (fresh, mut rx) = connect(&mut h, 9);
        h.orch.handle_message(
            fresh,
            ClientMessage::Reconnect {
                game_id,
                player_token: white.token.clone(),
            },
            h.t0 + Duration::from_secs(5),
        );
        match last(&mut rx) {
            ServerMessage::Reconnected {
                color,
                moves,
                finished,
                ..
            } => {
                assert_eq!(color, Color::White);
                assert_eq!(moves, vec!["e4"]);
                assert!(!finished);
            }
            other => panic!("expected reconnected, got {other:?}"),
        }
        assert_eq!(last(&mut black.rx), ServerMessage::OpponentReconnected { game_id });
        assert_eq!(h.orch.game_of(fresh), Some(game_id));

        // The grace period no longer runs.
        h.orch.session_tick(h.t0 + Duration::from_secs(120));
        assert!(!h.orch.session(game_id).unwrap().is_finished());

        // And the new connection plays on.
        play(&mut h, game_id, &black, "e7e5");
        h.orch.handle_message(
            fresh,
            ClientMessage::MakeMove {
                game_id,
                mv: "g1f3".into(),
            },
            h.t0,
        );
        assert!(matches!(last(&mut rx), ServerMessage::MoveAck { .. }));
    }

    #[tokio::test]
    async fn test_reconnect_with_opponent_token_refused() {
        let mut h = harness();
        let (game_id, mut white, black) = start_game(&mut h);
        h.orch.handle_disconnect(black.conn, h.t0);
        drain(&mut white.rx);

        h.orch.handle_message(
            white.conn,
            ClientMessage::Reconnect {
                game_id,
                player_token: black.token.clone(),
            },
            h.t0,
        );
        assert_eq!(error_code(&last(&mut white.rx)), ErrorCode::InvalidToken);

        let session = h.orch.session(game_id).unwrap();
        assert_eq!(session.color_of(white.conn), Some(Color::White));
        assert!(!session.player(Color::Black).connected);

        // The real owner can still take the seat back.
        let (fresh, mut rx) = connect(&mut h, 9);
        h.orch.handle_message(
            fresh,
            ClientMessage::Reconnect {
                game_id,
                player_token: black.token.clone(),
            },
            h.t0,
        );
        assert!(matches!(
            last(&mut rx),
            ServerMessage::Reconnected {
                color: Color::Black,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_reconnect_wrong_token_invalid() {
        let mut h = harness();
        let (game_id, white, _) = start_game(&mut h);
        h.orch.handle_disconnect(white.conn, h.t0);
        let (fresh, mut rx) = connect(&mut h, 9);
        h.orch.handle_message(
            fresh,
            ClientMessage::Reconnect {
                game_id,
                player_token: "0".repeat(32),
            },
            h.t0,
        );
        assert_eq!(error_code(&last(&mut rx)), ErrorCode::InvalidToken);
        assert_eq!(h.orch.game_of(fresh), None);
    }

    #[tokio::test]
    async fn test_reconnect_finished_game_for_review_then_purged() {
        let mut h = harness();
        let (game_id, white, black) = start_game(&mut h);
        h.orch.handle_disconnect(white.conn, h.t0);
        h.orch
            .handle_message(black.conn, ClientMessage::Resign { game_id }, h.t0);

        let (fresh, mut rx) = connect(&mut h, 9);
        h.orch.handle_message(
            fresh,
            ClientMessage::Reconnect {
                game_id,
                player_token: white.token.clone(),
            },
            h.t0 + Duration::from_secs(30),
        );
        assert!(matches!(
            last(&mut rx),
            ServerMessage::Reconnected { finished: true, .. }
        ));
        // Reviewing does not seat the connection in a game.
        assert_eq!(h.orch.game_of(fresh), None);

        h.orch.session_tick(h.t0 + Duration::from_secs(120));
        assert!(h.orch.session(game_id).is_some());
        h.orch.session_tick(h.t0 + Duration::from_secs(121));
        assert!(h.orch.session(game_id).is_none());
    }

    #[tokio::test]
    async fn test_session_tick_flag_fall_ends_game() {
        let mut h = harness();
        let (a, _rx_a) = connect(&mut h, 1);
        let (b, mut rx_b) = connect(&mut h, 2);
        for (conn, name) in [(a, "ada"), (b, "bob")] {
            h.orch.handle_message(
                conn,
                ClientMessage::JoinQueue {
                    name: name.into(),
                    rating: Some(1500),
                    games_played: None,
                    time_control: TimeControl::new(60, 0),
                },
                h.t0,
            );
        }
        h.orch.session_tick(h.t0 + Duration::from_secs(61));
        match last(&mut rx_b) {
            ServerMessage::GameOver { result, reason, .. } => {
                // White never moved.
                assert_eq!(result, GameResult::BlackWins);
                assert_eq!(reason, EndReason::Timeout);
            }
            other => panic!("expected game_over, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let mut h = harness();
        let (_, mut rx_a) = connect(&mut h, 1);
        let (_, mut rx_b) = connect(&mut h, 2);
        let notice = ServerMessage::ShuttingDown {
            drain_timeout_ms: 30_000,
        };
        h.orch.broadcast(&notice);
        assert_eq!(last(&mut rx_a), notice);
        assert_eq!(last(&mut rx_b), notice);
    }

    #[test]
    fn test_validate_identity_defaults_rating() {
        assert_eq!(
            validate_identity("  ada ", None).unwrap(),
            ("ada".to_string(), DEFAULT_RATING)
        );
        assert!(validate_identity("ada", Some(-1)).is_err());
        assert!(validate_identity(&"é".repeat(32), Some(0)).is_ok());
    }

    #[test]
    fn test_ceil_secs_rounds_up() {
        assert_eq!(ceil_secs(Duration::ZERO), 0);
        assert_eq!(ceil_secs(Duration::from_millis(14_001)), 15);
        assert_eq!(ceil_secs(Duration::from_secs(15)), 15);
    }
}
