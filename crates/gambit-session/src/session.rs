//! The per-match state machine.

use std::time::{Duration, Instant};

use gambit_matchmaking::MatchResult;
use gambit_protocol::{ClockSnapshot, Color, ConnectionId, EndReason, GameId, GameResult, TimeControl};
use tracing::{debug, info, warn};

use crate::clock::GameClock;
use crate::error::SessionError;
use crate::player::Player;
use crate::rules::{ChessRules, MoveRequest, PieceKind};

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration shared by every session on a server.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a disconnected player has to come back before forfeiting.
    ///
    /// Default: 60 seconds.
    pub disconnect_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            disconnect_grace: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// How and when a game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameEnd {
    pub result: GameResult,
    pub reason: EndReason,
    pub finished_at: Instant,
}

impl GameEnd {
    pub fn winner(&self) -> Option<Color> {
        self.result.winner()
    }
}

/// Lifecycle of a session.
///
/// ```text
///   Playing ──(mate, draw, resignation, flag, forfeit)──→ Finished
/// ```
///
/// `Finished` is terminal. A finished session lingers for a while so a
/// player who dropped can reconnect and see the final position, but it
/// accepts no further game actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Playing,
    Finished(GameEnd),
}

/// A move the session accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveAck {
    pub color: Color,
    /// SAN, as broadcast to both players.
    pub notation: String,
    pub fen: String,
    pub clocks: Option<ClockSnapshot>,
    pub captured: Option<PieceKind>,
    /// Set when this move ended the game.
    pub end: Option<GameEnd>,
}

/// A seat that was taken back with a reconnect token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconnection {
    pub color: Color,
    /// The connection the seat was bound to before.
    pub previous_connection: ConnectionId,
}

// ---------------------------------------------------------------------------
// MatchSession
// ---------------------------------------------------------------------------

/// One game between two paired players.
///
/// Every operation is safe to call at any time: on a finished session, or
/// with a connection that is not seated here, operations return
/// `None`/`false`/an error and change nothing.
///
/// The session does not know which connections exist on the server. The
/// orchestrator keeps the connection → game index and is the only one that
/// removes sessions.
#[derive(Debug)]
pub struct MatchSession {
    id: GameId,
    white: Player,
    black: Player,
    state: SessionState,
    /// Every position reached, oldest first. The last entry is the
    /// current position.
    positions: Vec<String>,
    moves: Vec<String>,
    time_control: Option<TimeControl>,
    clock: Option<GameClock>,
    rated: bool,
    piece_bank: Option<String>,
    pending_draw: Option<Color>,
    created_at: Instant,
    last_activity_at: Instant,
    config: SessionConfig,
}

impl MatchSession {
    /// Builds a session from a pairing, choosing colours by coin flip.
    pub fn new(
        id: GameId,
        pairing: MatchResult,
        rules: &dyn ChessRules,
        config: SessionConfig,
        now: Instant,
    ) -> Self {
        let first_is_white = rand::random::<bool>();
        Self::with_colors(id, pairing, first_is_white, rules, config, now)
    }

    /// Builds a session with `player1` as White when `first_is_white`.
    pub fn with_colors(
        id: GameId,
        pairing: MatchResult,
        first_is_white: bool,
        rules: &dyn ChessRules,
        config: SessionConfig,
        now: Instant,
    ) -> Self {
        let MatchResult {
            player1,
            player2,
            time_control,
            rated,
            piece_bank,
            ..
        } = pairing;
        let (white, black) = if first_is_white {
            (player1, player2)
        } else {
            (player2, player1)
        };

        info!(
            game = %id,
            white = %white.connection_id,
            black = %black.connection_id,
            rated,
            "match session created"
        );

        Self {
            id,
            white: Player::seat(white, Color::White),
            black: Player::seat(black, Color::Black),
            state: SessionState::Playing,
            positions: vec![rules.initial_position()],
            moves: Vec::new(),
            time_control,
            clock: time_control.map(|tc| GameClock::start(tc, now)),
            rated,
            piece_bank,
            pending_draw: None,
            created_at: now,
            last_activity_at: now,
            config,
        }
    }

    // -- Lookups ------------------------------------------------------------

    pub fn id(&self) -> GameId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, SessionState::Finished(_))
    }

    /// How the game ended, once it has.
    pub fn end(&self) -> Option<GameEnd> {
        match self.state {
            SessionState::Finished(end) => Some(end),
            SessionState::Playing => None,
        }
    }

    /// Current position as FEN.
    pub fn position(&self) -> &str {
        self.positions.last().map(String::as_str).unwrap_or_default()
    }

    /// Moves played so far, in SAN.
    pub fn moves(&self) -> &[String] {
        &self.moves
    }

    pub fn time_control(&self) -> Option<TimeControl> {
        self.time_control
    }

    pub fn is_rated(&self) -> bool {
        self.rated
    }

    pub fn piece_bank(&self) -> Option<&str> {
        self.piece_bank.as_deref()
    }

    /// Colour with an unanswered draw offer.
    pub fn pending_draw(&self) -> Option<Color> {
        self.pending_draw
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_activity_at(&self) -> Instant {
        self.last_activity_at
    }

    /// Games always start from the standard position, so White moves on
    /// even plies.
    pub fn side_to_move(&self) -> Color {
        if self.moves.len() % 2 == 0 {
            Color::White
        } else {
            Color::Black
        }
    }

    pub fn player(&self, color: Color) -> &Player {
        match color {
            Color::White => &self.white,
            Color::Black => &self.black,
        }
    }

    fn player_mut(&mut self, color: Color) -> &mut Player {
        match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        }
    }

    pub fn players(&self) -> [&Player; 2] {
        [&self.white, &self.black]
    }

    pub fn color_of(&self, connection_id: ConnectionId) -> Option<Color> {
        self.players()
            .into_iter()
            .find(|p| p.connection_id == connection_id)
            .map(|p| p.color)
    }

    pub fn player_by_connection(&self, connection_id: ConnectionId) -> Option<&Player> {
        self.color_of(connection_id).map(|c| self.player(c))
    }

    pub fn opponent_of(&self, connection_id: ConnectionId) -> Option<&Player> {
        self.color_of(connection_id)
            .map(|c| self.player(c.opposite()))
    }

    /// Both clocks at `now`, for timed games.
    pub fn clocks(&self, now: Instant) -> Option<ClockSnapshot> {
        self.clock.as_ref().map(|c| c.snapshot(now))
    }

    /// Time since the game ended.
    pub fn finished_for(&self, now: Instant) -> Option<Duration> {
        self.end()
            .map(|end| now.saturating_duration_since(end.finished_at))
    }

    // -- Game actions -------------------------------------------------------

    /// Plays a move for the player on `connection_id`.
    ///
    /// On success the position and move list advance and the mover's clock
    /// is punched. If the move ended the game, the returned ack carries the
    /// [`GameEnd`] and the session is already finished.
    ///
    /// A flag fall is noticed here too: if the side to move has run out of
    /// time, the session finishes and [`SessionError::TimeExpired`] is
    /// returned instead of playing the move.
    pub fn make_move(
        &mut self,
        rules: &dyn ChessRules,
        connection_id: ConnectionId,
        mv: &str,
        now: Instant,
    ) -> Result<MoveAck, SessionError> {
        if self.is_finished() {
            return Err(SessionError::GameOver);
        }
        let color = self
            .color_of(connection_id)
            .ok_or(SessionError::NotAParticipant)?;
        if let Some(end) = self.check_flag(now) {
            return Err(SessionError::TimeExpired(end));
        }
        if color != self.side_to_move() {
            return Err(SessionError::NotYourTurn);
        }

        let request = MoveRequest::parse(mv)?;
        let outcome = rules.make_move(self.position(), &request, &self.positions)?;

        if let Some(clock) = self.clock.as_mut() {
            clock.punch(color, now);
        }
        self.moves.push(outcome.notation.clone());
        self.positions.push(outcome.new_position);
        self.last_activity_at = now;
        debug!(game = %self.id, %color, notation = %outcome.notation, "move played");

        let end = outcome.terminal.map(|reason| {
            let result = if reason == EndReason::Checkmate {
                GameResult::win_for(color)
            } else {
                GameResult::Draw
            };
            self.finish(result, reason, now)
        });

        Ok(MoveAck {
            color,
            notation: outcome.notation,
            fen: self.position().to_string(),
            clocks: self.clocks(now),
            captured: outcome.captured,
            end,
        })
    }

    /// The player on `connection_id` gives up. Their opponent wins.
    pub fn resign(&mut self, connection_id: ConnectionId, now: Instant) -> Option<GameEnd> {
        if self.is_finished() {
            return None;
        }
        let color = self.color_of(connection_id)?;
        Some(self.finish(GameResult::win_for(color.opposite()), EndReason::Resignation, now))
    }

    /// Records a draw offer. Returns the offering colour, or `None` if an
    /// offer is already pending or the game is over.
    pub fn offer_draw(&mut self, connection_id: ConnectionId) -> Option<Color> {
        if self.is_finished() || self.pending_draw.is_some() {
            return None;
        }
        let color = self.color_of(connection_id)?;
        self.pending_draw = Some(color);
        debug!(game = %self.id, %color, "draw offered");
        Some(color)
    }

    /// Accepts the pending offer. Only the side that did not make the offer
    /// can accept. The pending offer is cleared whatever happens.
    pub fn accept_draw(&mut self, connection_id: ConnectionId, now: Instant) -> Option<GameEnd> {
        if self.is_finished() {
            return None;
        }
        let color = self.color_of(connection_id)?;
        match self.pending_draw.take() {
            Some(offerer) if offerer != color => {
                Some(self.finish(GameResult::Draw, EndReason::Agreement, now))
            }
            _ => None,
        }
    }

    /// Clears the pending offer. Returns whether there was one.
    pub fn decline_draw(&mut self, connection_id: ConnectionId) -> bool {
        if self.is_finished() || self.color_of(connection_id).is_none() {
            return false;
        }
        self.pending_draw.take().is_some()
    }

    /// Ends the game on time if the side to move has no time left.
    pub fn check_flag(&mut self, now: Instant) -> Option<GameEnd> {
        if self.is_finished() {
            return None;
        }
        let flagged = self.clock.as_ref()?.flagged(now)?;
        Some(self.finish(GameResult::win_for(flagged.opposite()), EndReason::Timeout, now))
    }

    // -- Connection state ---------------------------------------------------

    /// Marks the player on `connection_id` as gone. The grace period runs
    /// from the first disconnect; repeated calls keep the original time.
    pub fn handle_disconnect(&mut self, connection_id: ConnectionId, now: Instant) -> Option<Color> {
        let color = self.color_of(connection_id)?;
        let player = self.player_mut(color);
        if player.connected {
            player.connected = false;
            player.disconnected_at = Some(now);
            debug!(game = %self.id, %color, "player disconnected");
        }
        Some(color)
    }

    /// Forfeits a player who has been gone longer than the grace period.
    ///
    /// Only while playing. If both players are gone, whoever left first
    /// forfeits.
    pub fn check_disconnect_timeout(&mut self, now: Instant) -> Option<GameEnd> {
        if self.is_finished() {
            return None;
        }
        let grace = self.config.disconnect_grace;
        let loser = self
            .players()
            .into_iter()
            .filter_map(|p| p.disconnected_at.map(|at| (at, p.color)))
            .filter(|(at, _)| now.saturating_duration_since(*at) > grace)
            .min_by_key(|(at, _)| *at)
            .map(|(_, color)| color)?;

        Some(self.finish(
            GameResult::win_for(loser.opposite()),
            EndReason::DisconnectTimeout,
            now,
        ))
    }

    /// Gives a seat back to whoever holds its reconnect token.
    ///
    /// Works on finished sessions too, so a player can come back to see
    /// how the game ended. A token that matches neither seat changes
    /// nothing, and neither does one for the seat opposite the connection
    /// presenting it: a connection holds at most one colour.
    pub fn handle_reconnect(
        &mut self,
        token: &str,
        new_connection: ConnectionId,
    ) -> Option<Reconnection> {
        let color = self
            .players()
            .into_iter()
            .find(|p| p.reconnect_token == token)
            .map(|p| p.color)?;
        if self.color_of(new_connection).is_some_and(|seat| seat != color) {
            warn!(
                game = %self.id,
                conn = %new_connection,
                %color,
                "refused reconnect into the opposite seat"
            );
            return None;
        }

        let id = self.id;
        let player = self.player_mut(color);
        let previous_connection = player.connection_id;
        player.connection_id = new_connection;
        player.connected = true;
        player.disconnected_at = None;
        info!(game = %id, %color, from = %previous_connection, to = %new_connection, "player reconnected");

        Some(Reconnection {
            color,
            previous_connection,
        })
    }

    fn finish(&mut self, result: GameResult, reason: EndReason, now: Instant) -> GameEnd {
        let end = GameEnd {
            result,
            reason,
            finished_at: now,
        };
        self.state = SessionState::Finished(end);
        self.pending_draw = None;
        self.last_activity_at = now;
        if let Some(clock) = self.clock.as_mut() {
            clock.stop(now);
        }
        info!(game = %self.id, %result, %reason, moves = self.moves.len(), "game finished");
        end
    }
}
