//! The chess-rules seam.
//!
//! Sessions never look inside a position. They hand the position text
//! (FEN) and the player's move to a [`ChessRules`] implementation and get
//! back the notation to broadcast, the new position, and whether the game
//! just ended.

use std::fmt;

use gambit_protocol::EndReason;

use crate::error::RulesError;

/// Piece a pawn promotes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    Queen,
    Rook,
    Bishop,
    Knight,
}

impl Promotion {
    fn from_char(c: char) -> Option<Self> {
        match c {
            'q' => Some(Self::Queen),
            'r' => Some(Self::Rook),
            'b' => Some(Self::Bishop),
            'n' => Some(Self::Knight),
            _ => None,
        }
    }

    /// Lowercase letter used in coordinate notation.
    pub fn letter(self) -> char {
        match self {
            Self::Queen => 'q',
            Self::Rook => 'r',
            Self::Bishop => 'b',
            Self::Knight => 'n',
        }
    }
}

/// Kind of piece, used to report captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceKind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

/// A move in coordinate notation, syntactically checked.
///
/// Accepts `e2e4`, `e2-e4`, and a trailing promotion letter (`e7e8q`).
/// Case-insensitive. Whether the move is legal is a separate question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRequest {
    pub from: String,
    pub to: String,
    pub promotion: Option<Promotion>,
}

impl MoveRequest {
    pub fn parse(input: &str) -> Result<Self, RulesError> {
        let malformed = || RulesError::Malformed(input.to_string());

        let compact: String = input
            .trim()
            .chars()
            .filter(|c| *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        if !compact.is_ascii() || !(4..=5).contains(&compact.len()) {
            return Err(malformed());
        }

        let (from, rest) = compact.split_at(2);
        let (to, promo) = rest.split_at(2);
        if !is_square(from) || !is_square(to) {
            return Err(malformed());
        }

        let promotion = match promo.chars().next() {
            None => None,
            Some(c) => Some(Promotion::from_char(c).ok_or_else(malformed)?),
        };

        Ok(Self {
            from: from.to_string(),
            to: to.to_string(),
            promotion,
        })
    }
}

impl fmt::Display for MoveRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(p) = self.promotion {
            write!(f, "{}", p.letter())?;
        }
        Ok(())
    }
}

fn is_square(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 2 && (b'a'..=b'h').contains(&b[0]) && (b'1'..=b'8').contains(&b[1])
}

/// What a legal move did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    /// Standard algebraic notation, with `+`/`#` suffixes.
    pub notation: String,
    /// Position after the move, as FEN.
    pub new_position: String,
    pub captured: Option<PieceKind>,
    /// Set when the move ended the game. Checkmate is a win for the mover;
    /// every other terminal reason is a draw.
    pub terminal: Option<EndReason>,
}

/// Chess rules as the session layer consumes them.
///
/// Positions are FEN strings. `history` passed to [`make_move`] holds every
/// position reached so far in the game, oldest first and including the
/// current one; implementations use it for repetition detection.
///
/// [`make_move`]: ChessRules::make_move
pub trait ChessRules: Send + Sync {
    /// The position games start from.
    fn initial_position(&self) -> String;

    fn make_move(
        &self,
        position: &str,
        mv: &MoveRequest,
        history: &[String],
    ) -> Result<MoveOutcome, RulesError>;

    /// Every legal move in coordinate notation.
    fn legal_moves(&self, position: &str) -> Result<Vec<String>, RulesError>;

    fn is_check(&self, position: &str) -> Result<bool, RulesError>;

    fn is_checkmate(&self, position: &str) -> Result<bool, RulesError>;

    fn is_stalemate(&self, position: &str) -> Result<bool, RulesError>;

    /// Draw decidable from this position alone: stalemate, insufficient
    /// material, or the fifty-move rule.
    fn is_draw(&self, position: &str) -> Result<bool, RulesError>;
}
