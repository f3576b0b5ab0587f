// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! An in-memory, multi-version table engine.
//!
//! Each [`Table`] keeps every historical version of every row, and serves snapshot reads
//! against a [`Transaction`]'s logical time without taking any lock. Writers are serialized per
//! table and publish whole new copy-on-write snapshots; conflicts between concurrent writers are
//! detected optimistically, once at write time and again at commit time (first committer wins).

mod config;
mod table;
mod transaction;
mod tuple;
mod version;


pub use config::TableConfig;
pub use table::{IndexEntry, Table, WriteEntry};
pub use transaction::{
    Committer, IsolationPolicy, LocalOracle, ReadPolicy, TimestampOracle, Transaction, TxId,
    TxState,
};
pub use tuple::{Datum, Tuple};
pub use version::{PhysicalRow, Version, VersionId};

use std::fmt::{Display, Formatter};

/// A logical instant, as handed out by whatever timestamp oracle drives the transactions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Ord, PartialOrd, Hash, Default)]
pub struct Timestamp(pub u64);

/// A position on a transaction's logical clock: the oracle timestamp, plus the number of
/// statements (successful mutations) performed at that timestamp.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Ord, PartialOrd, Hash, Default)]
pub struct Time {
    pub timestamp: Timestamp,
    pub statement: u64,
}

impl Time {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            statement: 0,
        }
    }

    pub fn tick(&mut self) {
        self.statement += 1;
    }
}

impl Display for Time {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.timestamp.0, self.statement)
    }
}

/// What a caller-supplied row has to provide to be stored in a [`Table`].
pub trait Row<K, V> {
    fn key(&self) -> K;
    fn value(&self) -> V;
    /// The secondary index tuples this row should be findable under.
    fn indexes(&self) -> Vec<Tuple>;
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Duplicate key")]
    Duplicate,
    #[error("No visible version")]
    NotFound,
    #[error("Row is locked by another transaction")]
    WriteConflict,
    #[error("Transaction {id} is {state:?}, not active")]
    TransactionNotActive { id: TxId, state: TxState },
    #[error("Commit time was not assigned before commit")]
    CommitTimeUnset,
    #[error("Internal table error: {0}")]
    Internal(String),
}
