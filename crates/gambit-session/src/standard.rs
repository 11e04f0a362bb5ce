//! Standard chess on top of the `chess` crate.
//!
//! The crate handles move generation and mate/stalemate detection. What it
//! leaves out is done here: SAN, FEN move counters, insufficient material,
//! the fifty-move rule, and repetition.

use std::str::FromStr;

use chess::{Board, BoardStatus, ChessMove, Color as Side, EMPTY, MoveGen, Piece, Square};
use gambit_protocol::EndReason;

use crate::error::RulesError;
use crate::rules::{ChessRules, MoveOutcome, MoveRequest, PieceKind, Promotion};

/// Halfmove clock value at which the fifty-move rule ends the game.
const FIFTY_MOVE_PLIES: u32 = 100;

/// Orthodox chess from the standard starting position.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRules;

impl StandardRules {
    pub fn new() -> Self {
        Self
    }
}

impl ChessRules for StandardRules {
    fn initial_position(&self) -> String {
        format!("{} 0 1", position_key(&Board::default()))
    }

    fn make_move(
        &self,
        position: &str,
        mv: &MoveRequest,
        history: &[String],
    ) -> Result<MoveOutcome, RulesError> {
        let board = load(position)?;
        let (halfmove, fullmove) = counters(position);

        let from = Square::from_str(&mv.from).map_err(|_| RulesError::Malformed(mv.to_string()))?;
        let to = Square::from_str(&mv.to).map_err(|_| RulesError::Malformed(mv.to_string()))?;
        let chess_move = ChessMove::new(from, to, mv.promotion.map(promotion_piece));

        if !MoveGen::new_legal(&board).any(|m| m == chess_move) {
            return Err(RulesError::Illegal(mv.to_string()));
        }

        let mover = board.side_to_move();
        let moved = board.piece_on(from).unwrap_or(Piece::Pawn);
        let captured = match board.piece_on(to) {
            Some(piece) => Some(piece),
            // Diagonal pawn move onto an empty square: en passant.
            None if moved == Piece::Pawn && from.get_file() != to.get_file() => Some(Piece::Pawn),
            None => None,
        };

        let after = board.make_move_new(chess_move);
        let notation = san(&board, chess_move, moved, captured.is_some(), &after);

        let halfmove = if moved == Piece::Pawn || captured.is_some() {
            0
        } else {
            halfmove + 1
        };
        let fullmove = if mover == Side::Black { fullmove + 1 } else { fullmove };

        let key = position_key(&after);
        let terminal = match after.status() {
            BoardStatus::Checkmate => Some(EndReason::Checkmate),
            BoardStatus::Stalemate => Some(EndReason::Stalemate),
            BoardStatus::Ongoing if insufficient_material(&after) => {
                Some(EndReason::InsufficientMaterial)
            }
            BoardStatus::Ongoing if halfmove >= FIFTY_MOVE_PLIES => Some(EndReason::FiftyMoveRule),
            BoardStatus::Ongoing => {
                let seen = history.iter().filter(|fen| fen_key(fen) == key).count();
                (seen + 1 >= 3).then_some(EndReason::ThreefoldRepetition)
            }
        };

        Ok(MoveOutcome {
            notation,
            new_position: format!("{key} {halfmove} {fullmove}"),
            captured: captured.map(piece_kind),
            terminal,
        })
    }

    fn legal_moves(&self, position: &str) -> Result<Vec<String>, RulesError> {
        let board = load(position)?;
        Ok(MoveGen::new_legal(&board).map(coordinate).collect())
    }

    fn is_check(&self, position: &str) -> Result<bool, RulesError> {
        Ok(load(position)?.checkers().popcnt() > 0)
    }

    fn is_checkmate(&self, position: &str) -> Result<bool, RulesError> {
        Ok(load(position)?.status() == BoardStatus::Checkmate)
    }

    fn is_stalemate(&self, position: &str) -> Result<bool, RulesError> {
        Ok(load(position)?.status() == BoardStatus::Stalemate)
    }

    fn is_draw(&self, position: &str) -> Result<bool, RulesError> {
        let board = load(position)?;
        let (halfmove, _) = counters(position);
        Ok(board.status() == BoardStatus::Stalemate
            || insufficient_material(&board)
            || halfmove >= FIFTY_MOVE_PLIES)
    }
}

// ---------------------------------------------------------------------------
// FEN helpers
// ---------------------------------------------------------------------------

fn load(position: &str) -> Result<Board, RulesError> {
    Board::from_str(position).map_err(|_| RulesError::InvalidPosition(position.to_string()))
}

/// Placement, side to move, castling and en passant. Two positions with the
/// same key are the same position for repetition purposes.
fn fen_key(fen: &str) -> String {
    fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
}

/// The board's own FEN output always ends in `0 1`; only the first four
/// fields are trusted.
fn position_key(board: &Board) -> String {
    fen_key(&board.to_string())
}

/// Halfmove clock and fullmove number, defaulting like a bare FEN would.
fn counters(fen: &str) -> (u32, u32) {
    let mut fields = fen.split_whitespace().skip(4);
    let halfmove = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
    let fullmove = fields.next().and_then(|f| f.parse().ok()).unwrap_or(1);
    (halfmove, fullmove)
}

// ---------------------------------------------------------------------------
// Notation
// ---------------------------------------------------------------------------

fn san(before: &Board, mv: ChessMove, moved: Piece, capture: bool, after: &Board) -> String {
    let from = mv.get_source();
    let to = mv.get_dest();
    let mut out = String::new();

    let (from_file, to_file) = (from.get_file().to_index(), to.get_file().to_index());
    if moved == Piece::King && from_file.abs_diff(to_file) == 2 {
        out.push_str(if to_file > from_file { "O-O" } else { "O-O-O" });
    } else {
        if moved == Piece::Pawn {
            if capture {
                out.push(file_char(from));
            }
        } else {
            out.push(piece_letter(moved));
            out.push_str(&disambiguation(before, mv, moved));
        }
        if capture {
            out.push('x');
        }
        out.push_str(&to.to_string());
        if let Some(promoted) = mv.get_promotion() {
            out.push('=');
            out.push(piece_letter(promoted));
        }
    }

    if after.status() == BoardStatus::Checkmate {
        out.push('#');
    } else if after.checkers().popcnt() > 0 {
        out.push('+');
    }
    out
}

/// Extra source file/rank needed when another piece of the same kind could
/// also reach the destination.
fn disambiguation(board: &Board, mv: ChessMove, moved: Piece) -> String {
    let from = mv.get_source();
    let rivals: Vec<Square> = MoveGen::new_legal(board)
        .filter(|m| {
            m.get_dest() == mv.get_dest()
                && m.get_source() != from
                && board.piece_on(m.get_source()) == Some(moved)
        })
        .map(|m| m.get_source())
        .collect();

    if rivals.is_empty() {
        String::new()
    } else if rivals.iter().all(|sq| sq.get_file() != from.get_file()) {
        file_char(from).to_string()
    } else if rivals.iter().all(|sq| sq.get_rank() != from.get_rank()) {
        rank_char(from).to_string()
    } else {
        from.to_string()
    }
}

fn coordinate(mv: ChessMove) -> String {
    let mut out = format!("{}{}", mv.get_source(), mv.get_dest());
    if let Some(piece) = mv.get_promotion() {
        out.push(piece_letter(piece).to_ascii_lowercase());
    }
    out
}

fn file_char(sq: Square) -> char {
    char::from(b'a' + sq.get_file().to_index() as u8)
}

fn rank_char(sq: Square) -> char {
    char::from(b'1' + sq.get_rank().to_index() as u8)
}

fn piece_letter(piece: Piece) -> char {
    match piece {
        Piece::Pawn => 'P',
        Piece::Knight => 'N',
        Piece::Bishop => 'B',
        Piece::Rook => 'R',
        Piece::Queen => 'Q',
        Piece::King => 'K',
    }
}

fn promotion_piece(promotion: Promotion) -> Piece {
    match promotion {
        Promotion::Queen => Piece::Queen,
        Promotion::Rook => Piece::Rook,
        Promotion::Bishop => Piece::Bishop,
        Promotion::Knight => Piece::Knight,
    }
}

fn piece_kind(piece: Piece) -> PieceKind {
    match piece {
        Piece::Pawn => PieceKind::Pawn,
        Piece::Knight => PieceKind::Knight,
        Piece::Bishop => PieceKind::Bishop,
        Piece::Rook => PieceKind::Rook,
        Piece::Queen => PieceKind::Queen,
        Piece::King => PieceKind::King,
    }
}

// ---------------------------------------------------------------------------
// Material
// ---------------------------------------------------------------------------

/// Neither side can ever mate: bare kings, a single minor piece, or only
/// bishops that all stand on one square colour.
fn insufficient_material(board: &Board) -> bool {
    let heavy = *board.pieces(Piece::Pawn) | *board.pieces(Piece::Rook) | *board.pieces(Piece::Queen);
    if heavy != EMPTY {
        return false;
    }

    let knights = board.pieces(Piece::Knight).popcnt();
    let bishops = *board.pieces(Piece::Bishop);
    if knights + bishops.popcnt() <= 1 {
        return true;
    }
    if knights > 0 {
        return false;
    }

    let mut shades = bishops.map(|sq| (sq.get_file().to_index() + sq.get_rank().to_index()) % 2);
    match shades.next() {
        Some(first) => shades.all(|shade| shade == first),
        None => true,
    }
}
