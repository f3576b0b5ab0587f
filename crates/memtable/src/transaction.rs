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

use crate::{Error, Time, Timestamp};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Ord, PartialOrd, Hash)]
pub struct TxId(pub u64);

impl Display for TxId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TxState {
    Active = 0,
    Committed = 1,
    Aborted = 2,
}

impl TxState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TxState::Active,
            1 => TxState::Committed,
            _ => TxState::Aborted,
        }
    }
}

/// How a transaction decides which committed versions of other transactions it can see.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ReadPolicy {
    /// See what was committed at or before the reader's own time.
    #[default]
    Snapshot,
    /// See whatever is committed at the moment of the read.
    ReadCommitted,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct IsolationPolicy {
    pub read: ReadPolicy,
}

impl IsolationPolicy {
    pub const SNAPSHOT_ISOLATION: IsolationPolicy = IsolationPolicy {
        read: ReadPolicy::Snapshot,
    };
    pub const READ_COMMITTED: IsolationPolicy = IsolationPolicy {
        read: ReadPolicy::ReadCommitted,
    };
}

/// Something a transaction has written to, and must therefore finalize or roll back when the
/// transaction completes.
pub trait Committer: Send + Sync {
    fn commit_tx(&self, tx: &Arc<Transaction>) -> Result<(), Error>;
    fn abort_tx(&self, tx: &Arc<Transaction>);
}

/// Issues the timestamps transactions begin and commit at.
///
/// Implementations must not hand out a begin timestamp while a commit at a lower timestamp is
/// still being applied, and must apply commits one at a time in timestamp order; readers rely on
/// every transaction committed at or before their begin timestamp being fully visible.
pub trait TimestampOracle {
    fn begin(&self, isolation: IsolationPolicy) -> Arc<Transaction>;
    fn commit(&self, tx: &Arc<Transaction>) -> Result<(), Error>;
}

/// A process-local oracle: a strictly increasing counter, with begins and commits serialized
/// behind one lock.
#[derive(Debug, Default)]
pub struct LocalOracle {
    last: Mutex<u64>,
}

impl LocalOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the counter after `last`; the first timestamp issued will be `last + 1`.
    pub fn starting_after(last: Timestamp) -> Self {
        Self {
            last: Mutex::new(last.0),
        }
    }

    /// Issue a bare timestamp.
    pub fn next_timestamp(&self) -> Timestamp {
        let mut last = self.last.lock();
        *last += 1;
        Timestamp(*last)
    }
}

impl TimestampOracle for LocalOracle {
    /// Start a transaction at the next timestamp, identified by that same timestamp.
    fn begin(&self, isolation: IsolationPolicy) -> Arc<Transaction> {
        let mut last = self.last.lock();
        *last += 1;
        Transaction::new(TxId(*last), Timestamp(*last), isolation)
    }

    fn commit(&self, tx: &Arc<Transaction>) -> Result<(), Error> {
        let mut last = self.last.lock();
        *last += 1;
        tx.commit(Timestamp(*last))
    }
}

pub struct Transaction {
    id: TxId,
    begin_time: Time,
    isolation: IsolationPolicy,
    state: AtomicU8,
    /// Statements performed so far; together with the begin timestamp this is the
    /// transaction's current logical time.
    statement: AtomicU64,
    commit_time: OnceLock<Time>,
    committers: Mutex<Committers>,
}

/// The tables a transaction has written to, keyed by table identity, in first-write order.
/// Once `completing` is set no further table may join.
#[derive(Default)]
struct Committers {
    completing: bool,
    tables: IndexMap<usize, Arc<dyn Committer>>,
}

impl Debug for Transaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("begin_time", &self.begin_time)
            .field("time", &self.time())
            .field("commit_time", &self.commit_time.get())
            .field("isolation", &self.isolation)
            .field("state", &self.state())
            .finish()
    }
}

impl Transaction {
    pub fn new(id: TxId, begin_ts: Timestamp, isolation: IsolationPolicy) -> Arc<Self> {
        Arc::new(Self {
            id,
            begin_time: Time::new(begin_ts),
            isolation,
            state: AtomicU8::new(TxState::Active as u8),
            statement: AtomicU64::new(0),
            commit_time: OnceLock::new(),
            committers: Mutex::new(Committers::default()),
        })
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn begin_time(&self) -> Time {
        self.begin_time
    }

    pub fn isolation(&self) -> IsolationPolicy {
        self.isolation
    }

    pub fn state(&self) -> TxState {
        TxState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_committed(&self) -> bool {
        self.state() == TxState::Committed
    }

    /// The transaction's current logical time.
    pub fn time(&self) -> Time {
        Time {
            timestamp: self.begin_time.timestamp,
            statement: self.statement.load(Ordering::Acquire),
        }
    }

    pub fn commit_time(&self) -> Option<Time> {
        self.commit_time.get().copied()
    }

    /// Fix the time this transaction commits at. May only be done once, while active.
    pub fn set_commit_time(&self, commit_ts: Timestamp) -> Result<(), Error> {
        self.ensure_active()?;
        let commit_time = Time::new(commit_ts);
        if *self.commit_time.get_or_init(|| commit_time) != commit_time {
            return Err(Error::Internal(format!(
                "commit time for {} already assigned",
                self.id
            )));
        }
        Ok(())
    }

    pub(crate) fn ensure_active(&self) -> Result<(), Error> {
        match self.state() {
            TxState::Active => Ok(()),
            state => Err(Error::TransactionNotActive { id: self.id, state }),
        }
    }

    pub(crate) fn tick(&self) {
        self.statement.fetch_add(1, Ordering::AcqRel);
    }

    /// Record that `committer` holds writes of this transaction. Fails once the transaction has
    /// started to commit or abort.
    pub(crate) fn register_committer(
        &self,
        identity: usize,
        committer: Arc<dyn Committer>,
    ) -> Result<(), Error> {
        let mut committers = self.committers.lock();
        if committers.completing {
            return Err(Error::TransactionNotActive {
                id: self.id,
                state: self.state(),
            });
        }
        committers.tables.entry(identity).or_insert(committer);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn has_committer(&self, identity: usize) -> bool {
        self.committers.lock().tables.contains_key(&identity)
    }

    /// Close the committer list to new tables and return a snapshot of it.
    fn complete(&self) -> Result<Vec<Arc<dyn Committer>>, Error> {
        let mut committers = self.committers.lock();
        if committers.completing {
            return Err(Error::TransactionNotActive {
                id: self.id,
                state: self.state(),
            });
        }
        committers.completing = true;
        Ok(committers.tables.values().cloned().collect())
    }

    /// Commit at `commit_ts` across every table this transaction wrote to.
    ///
    /// If any table rejects the commit the transaction stays active and the error is returned;
    /// the caller is then expected to `abort`.
    pub fn commit(self: &Arc<Self>, commit_ts: Timestamp) -> Result<(), Error> {
        self.set_commit_time(commit_ts)?;
        let committers = self.complete()?;
        for committer in &committers {
            if let Err(e) = committer.commit_tx(self) {
                // Still active; reopen so the caller can abort.
                self.committers.lock().completing = false;
                return Err(e);
            }
        }
        if self
            .state
            .compare_exchange(
                TxState::Active as u8,
                TxState::Committed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(Error::TransactionNotActive {
                id: self.id,
                state: self.state(),
            });
        }
        self.committers.lock().tables.clear();
        debug!(tx = %self.id, commit_ts = commit_ts.0, tables = committers.len(), "committed");
        Ok(())
    }

    /// Discard this transaction's pending writes in every table it wrote to.
    pub fn abort(self: &Arc<Self>) {
        let state = self.state();
        if state != TxState::Active {
            warn!(tx = %self.id, ?state, "abort of a transaction which is no longer active");
            return;
        }
        let committers = {
            let mut committers = self.committers.lock();
            committers.completing = true;
            std::mem::take(&mut committers.tables)
        };
        for committer in committers.values() {
            committer.abort_tx(self);
        }
        self.state.store(TxState::Aborted as u8, Ordering::Release);
        debug!(tx = %self.id, tables = committers.len(), "aborted");
    }
}
