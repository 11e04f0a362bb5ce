//! Integration tests driving both pairing strategies through the shared
//! `MatchStrategy` and `MatchSource` interfaces.

use std::time::{Duration, Instant};

use gambit_matchmaking::{
    Contender, JoinTable, MatchOrigin, MatchResult, MatchSource, MatchStrategy, OpenTableLobby,
    QueueConfig, QueueEntry, RatingQueue, TableConfig,
};
use gambit_protocol::{ConnectionId, TimeControl};

// =========================================================================
// Helpers
// =========================================================================

fn entry(id: u64, rating: i32, joined_at: Instant) -> QueueEntry {
    QueueEntry {
        connection_id: ConnectionId::new(id),
        display_name: format!("player-{id}"),
        rating,
        games_played: 40,
        time_control: TimeControl::new(600, 0),
        joined_at,
    }
}

fn contender(id: u64, rating: i32) -> Contender {
    Contender {
        connection_id: ConnectionId::new(id),
        display_name: format!("player-{id}"),
        rating,
        games_played: 0,
    }
}

/// Offers every request in turn and collects whatever pairings form.
fn pair_all<S: MatchStrategy>(strategy: &mut S, requests: Vec<S::Request>) -> Vec<MatchResult> {
    requests
        .into_iter()
        .filter_map(|request| strategy.offer(request))
        .collect()
}

// =========================================================================
// Tests
// =========================================================================

#[test]
fn test_wide_gap_times_out_instead_of_matching() {
    let t0 = Instant::now();
    let mut queue = RatingQueue::new(QueueConfig::default());
    assert!(queue.add_player(entry(1, 1200, t0)).is_none());
    assert!(queue.add_player(entry(2, 1650, t0)).is_none());

    // 450 apart: beyond every window the queue opens before the timeout.
    for secs in [16, 31, 46] {
        let now = t0 + Duration::from_secs(secs);
        assert!(queue.check_timeouts(now).is_empty());
        assert!(queue.scan_for_matches(now).is_empty(), "matched at {secs}s");
    }

    let now = t0 + Duration::from_secs(61);
    let expired = queue.check_timeouts(now);
    assert_eq!(expired.len(), 2);
    assert!(queue.is_empty());
    assert!(queue.scan_for_matches(now).is_empty());
}

#[test]
fn test_both_strategies_produce_the_same_match_shape() {
    let t0 = Instant::now();

    let mut queue = RatingQueue::new(QueueConfig::default());
    let queued = pair_all(&mut queue, vec![entry(1, 1500, t0), entry(2, 1540, t0)]);
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].origin, MatchOrigin::RatingQueue);
    assert!(queued[0].rated);
    assert_eq!(queued[0].time_control, Some(TimeControl::new(600, 0)));
    assert!(queue.is_empty());

    let mut lobby = OpenTableLobby::new(TableConfig::default());
    let table_id = lobby
        .create_table(contender(3, 900), Some("wooden".into()), t0)
        .expect("first table");
    let seated = pair_all(
        &mut lobby,
        vec![
            JoinTable {
                table_id,
                guest: contender(4, 2100),
            },
            // Already taken by the time this one arrives.
            JoinTable {
                table_id,
                guest: contender(5, 1500),
            },
        ],
    );
    assert_eq!(seated.len(), 1);
    assert_eq!(seated[0].origin, MatchOrigin::OpenTable);
    assert!(!seated[0].rated);
    assert_eq!(seated[0].time_control, None);
    assert_eq!(seated[0].piece_bank.as_deref(), Some("wooden"));
    assert_eq!(seated[0].player1.connection_id, ConnectionId::new(3));
    assert_eq!(seated[0].player2.connection_id, ConnectionId::new(4));
    assert!(lobby.is_empty());
}

#[test]
fn test_withdraw_through_match_source_clears_either_strategy() {
    let t0 = Instant::now();
    let mut queue = RatingQueue::new(QueueConfig::default());
    let mut lobby = OpenTableLobby::new(TableConfig::default());
    queue.add_player(entry(1, 1500, t0));
    lobby.create_table(contender(2, 1500), None, t0);

    let mut sources: [&mut dyn MatchSource; 2] = [&mut queue, &mut lobby];
    for id in [1, 2] {
        let conn = ConnectionId::new(id);
        let withdrawn = sources
            .iter_mut()
            .filter(|source| source.is_waiting(conn))
            .map(|source| source.withdraw(conn))
            .filter(|removed| *removed)
            .count();
        assert_eq!(withdrawn, 1);
    }
    for source in &sources {
        assert!(!source.is_waiting(ConnectionId::new(1)));
        assert!(!source.is_waiting(ConnectionId::new(2)));
    }

    assert!(queue.is_empty());
    assert!(lobby.is_empty());
}

#[test]
fn test_stale_tables_leave_fresh_ones_listed() {
    let t0 = Instant::now();
    let mut lobby = OpenTableLobby::new(TableConfig::default());
    let old = lobby.create_table(contender(1, 1500), None, t0).unwrap();
    let fresh = lobby
        .create_table(contender(2, 1500), None, t0 + Duration::from_secs(300))
        .unwrap();

    let removed = lobby.remove_stale(t0 + Duration::from_secs(601));
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].table_id, old);

    let listed: Vec<_> = lobby.list_tables().map(|t| t.table_id).collect();
    assert_eq!(listed, vec![fresh]);
    assert_eq!(lobby.player_table_id(ConnectionId::new(1)), None);
}
