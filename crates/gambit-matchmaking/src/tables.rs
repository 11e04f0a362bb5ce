//! Open-table lobby.
//!
//! A host puts a table up, anyone browsing the listing may sit down at it.
//! There is no rating check and no time control: table games are casual
//! and untimed. A table nobody joins is swept away after its TTL.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use gambit_protocol::{ConnectionId, TableId, TableSummary};
use tracing::debug;

use crate::source::{Contender, MatchOrigin, MatchResult, MatchSource, MatchStrategy};

/// Tuning for the lobby.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Tables older than this are removed by [`OpenTableLobby::remove_stale`].
    pub ttl: Duration,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
        }
    }
}

/// A table waiting for an opponent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenTable {
    pub table_id: TableId,
    pub host_connection_id: ConnectionId,
    pub host_name: String,
    pub host_rating: i32,
    pub host_games_played: u32,
    pub piece_bank: Option<String>,
    pub created_at: Instant,
}

impl OpenTable {
    /// What the listing shows for this table.
    pub fn summary(&self, now: Instant) -> TableSummary {
        TableSummary {
            table_id: self.table_id,
            host_name: self.host_name.clone(),
            host_rating: self.host_rating,
            piece_bank: self.piece_bank.clone(),
            waiting_secs: now.saturating_duration_since(self.created_at).as_secs(),
        }
    }

    /// Seats `guest` opposite the host. The table is consumed.
    pub fn seat(self, guest: Contender) -> MatchResult {
        MatchResult {
            player1: Contender {
                connection_id: self.host_connection_id,
                display_name: self.host_name,
                rating: self.host_rating,
                games_played: self.host_games_played,
            },
            player2: guest,
            time_control: None,
            rated: false,
            piece_bank: self.piece_bank,
            origin: MatchOrigin::OpenTable,
        }
    }
}

/// A guest asking for the seat at one particular table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTable {
    pub table_id: TableId,
    pub guest: Contender,
}

/// Every open table, plus an index from host connection to table.
///
/// Ids come from a counter owned by the lobby and increase with creation,
/// so iterating the map lists tables oldest first.
#[derive(Debug, Default)]
pub struct OpenTableLobby {
    config: TableConfig,
    tables: BTreeMap<TableId, OpenTable>,
    by_host: HashMap<ConnectionId, TableId>,
    next_id: u64,
}

impl OpenTableLobby {
    pub fn new(config: TableConfig) -> Self {
        Self {
            config,
            tables: BTreeMap::new(),
            by_host: HashMap::new(),
            next_id: 0,
        }
    }

    /// Number of open tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Opens a table for `host`.
    ///
    /// A connection hosts at most one table; if it already has one, nothing
    /// changes and `None` is returned.
    pub fn create_table(
        &mut self,
        host: Contender,
        piece_bank: Option<String>,
        now: Instant,
    ) -> Option<TableId> {
        if self.by_host.contains_key(&host.connection_id) {
            return None;
        }

        self.next_id += 1;
        let table_id = TableId(self.next_id);
        debug!(table = %table_id, host = %host.connection_id, "table opened");

        self.by_host.insert(host.connection_id, table_id);
        self.tables.insert(
            table_id,
            OpenTable {
                table_id,
                host_connection_id: host.connection_id,
                host_name: host.display_name,
                host_rating: host.rating,
                host_games_played: host.games_played,
                piece_bank,
                created_at: now,
            },
        );
        Some(table_id)
    }

    /// Tables in creation order.
    pub fn list_tables(&self) -> impl Iterator<Item = &OpenTable> {
        self.tables.values()
    }

    pub fn get_table(&self, table_id: TableId) -> Option<&OpenTable> {
        self.tables.get(&table_id)
    }

    /// Removes a table by id.
    pub fn remove_table(&mut self, table_id: TableId) -> Option<OpenTable> {
        let table = self.tables.remove(&table_id)?;
        self.by_host.remove(&table.host_connection_id);
        Some(table)
    }

    /// The table hosted by `connection_id`, if any.
    pub fn player_table_id(&self, connection_id: ConnectionId) -> Option<TableId> {
        self.by_host.get(&connection_id).copied()
    }

    /// Removes whatever table `connection_id` hosts.
    pub fn remove_player_table(&mut self, connection_id: ConnectionId) -> Option<OpenTable> {
        let table_id = self.by_host.remove(&connection_id)?;
        self.tables.remove(&table_id)
    }

    /// Removes and returns tables older than the TTL.
    pub fn remove_stale(&mut self, now: Instant) -> Vec<OpenTable> {
        let ttl = self.config.ttl;
        let stale: Vec<TableId> = self
            .tables
            .values()
            .filter(|t| now.saturating_duration_since(t.created_at) > ttl)
            .map(|t| t.table_id)
            .collect();

        stale
            .into_iter()
            .filter_map(|id| self.remove_table(id))
            .collect()
    }
}

impl MatchSource for OpenTableLobby {
    fn label(&self) -> &'static str {
        "open-tables"
    }

    fn is_waiting(&self, connection_id: ConnectionId) -> bool {
        self.by_host.contains_key(&connection_id)
    }

    fn withdraw(&mut self, connection_id: ConnectionId) -> bool {
        self.remove_player_table(connection_id).is_some()
    }
}

impl MatchStrategy for OpenTableLobby {
    type Request = JoinTable;

    /// Closes the table and seats the guest opposite its host. A missing
    /// table, or a host trying to join their own, leaves the lobby as it
    /// was.
    fn offer(&mut self, request: JoinTable) -> Option<MatchResult> {
        let JoinTable { table_id, guest } = request;
        if self.get_table(table_id)?.host_connection_id == guest.connection_id {
            return None;
        }
        let table = self.remove_table(table_id)?;
        debug!(table = %table_id, guest = %guest.connection_id, "table taken");
        Some(table.seat(guest))
    }
}
