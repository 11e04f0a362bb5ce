//! The result type both pairing strategies converge on, and the traits
//! they share.

use gambit_protocol::{ConnectionId, TimeControl};

/// One side of a freshly formed pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contender {
    pub connection_id: ConnectionId,
    pub display_name: String,
    pub rating: i32,
    pub games_played: u32,
}

/// Which strategy produced a pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOrigin {
    RatingQueue,
    OpenTable,
}

/// Two players who should now be put into a match session.
///
/// Ephemeral: it lives from the moment a strategy gives up its waiting
/// entries until the orchestrator has built the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub player1: Contender,
    pub player2: Contender,
    /// `None` for untimed games.
    pub time_control: Option<TimeControl>,
    /// Whether the result feeds back into ratings.
    pub rated: bool,
    /// Opaque piece-set choice made by a table host.
    pub piece_bank: Option<String>,
    pub origin: MatchOrigin,
}

/// Common surface of the pairing strategies.
///
/// The orchestrator keeps one of each and treats them uniformly whenever
/// a connection leaves: it withdraws the connection from every source,
/// whichever one it happened to be waiting in.
pub trait MatchSource {
    /// Short name for logs.
    fn label(&self) -> &'static str;

    /// `true` if the connection is currently waiting here.
    fn is_waiting(&self, connection_id: ConnectionId) -> bool;

    /// Removes whatever the connection has waiting here. Idempotent;
    /// returns `true` if something was removed.
    fn withdraw(&mut self, connection_id: ConnectionId) -> bool;
}

/// A strategy that turns a player's request into a pairing.
///
/// Each strategy takes its own kind of request (a queue entry, a seat at a
/// chosen table) but answers the same way: a [`MatchResult`] when two
/// players are ready to sit down, `None` when the request is now waiting
/// or could not be honoured.
pub trait MatchStrategy: MatchSource {
    type Request;

    fn offer(&mut self, request: Self::Request) -> Option<MatchResult>;
}
