//! ELO rating updates for rated games.
//!
//! Standard logistic ELO: the expected score of A against B is
//! `1 / (1 + 10^((Rb - Ra) / 400))`, and A's rating moves by
//! `K * (actual - expected)`, rounded to the nearest point. `K` depends on
//! the player, so the two sides of one game need not move by the same
//! amount:
//!
//! | Player | K |
//! |---|---|
//! | fewer than 30 games | 40 |
//! | rated 2400 or more | 10 |
//! | everyone else | 20 |

/// Provisional players move faster until they have this many games.
const PROVISIONAL_GAMES: u32 = 30;
const MASTER_RATING: i32 = 2400;

/// One player's rating change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EloChange {
    pub new_rating: i32,
    pub change: i32,
}

/// Rating changes for both sides of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchElo {
    pub a: EloChange,
    pub b: EloChange,
}

fn k_factor(rating: i32, games_played: u32) -> f64 {
    if games_played < PROVISIONAL_GAMES {
        40.0
    } else if rating >= MASTER_RATING {
        10.0
    } else {
        20.0
    }
}

/// Expected score of a player rated `rating` against `opponent`.
pub fn expected_score(rating: i32, opponent: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf(f64::from(opponent - rating) / 400.0))
}

fn update(rating: i32, opponent: i32, score: f64, games_played: u32) -> EloChange {
    let delta = k_factor(rating, games_played) * (score - expected_score(rating, opponent));
    // Ratings are bounded to a few thousand, so the cast cannot overflow.
    let new_rating = (rating + delta.round() as i32).max(0);
    EloChange {
        new_rating,
        change: new_rating - rating,
    }
}

/// New ratings after A scored `score_a` (1.0 win, 0.5 draw, 0.0 loss)
/// against B. Ratings never drop below zero.
pub fn calculate_match_elo(
    rating_a: i32,
    rating_b: i32,
    score_a: f64,
    games_played_a: u32,
    games_played_b: u32,
) -> MatchElo {
    MatchElo {
        a: update(rating_a, rating_b, score_a, games_played_a),
        b: update(rating_b, rating_a, 1.0 - score_a, games_played_b),
    }
}
