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

use crate::config::TableConfig;
use crate::transaction::{Committer, Transaction, TxId};
use crate::tuple::Tuple;
use crate::version::{PhysicalRow, VersionId};
use crate::{Error, Row};
use arc_swap::ArcSwap;
use imbl::OrdMap;
use minstant::Instant;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::io::Write;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// A row as found through a secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry<K, V> {
    pub index: Tuple,
    pub key: K,
    pub version_id: VersionId,
    pub value: V,
}

/// A version created or locked by a transaction which has not yet committed or aborted.
#[derive(Debug, Clone)]
pub struct WriteEntry<K> {
    pub transaction: Arc<Transaction>,
    pub key: K,
    pub version_id: VersionId,
}

/// Per index tuple, the (key, version) pairs that were indexed under it and the value written.
type Indexes<K, V> = OrdMap<Tuple, OrdMap<(K, VersionId), V>>;
/// Per transaction, its pending writes in key order.
type Writes<K> = OrdMap<TxId, OrdMap<(K, VersionId), WriteEntry<K>>>;

/// One immutable, published state of a table. Cloning is O(1); all three maps share structure
/// with the state they were cloned from.
#[derive(Clone)]
struct TableState<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    rows: OrdMap<K, Arc<PhysicalRow<K, V>>>,
    indexes: Indexes<K, V>,
    writes: Writes<K>,
}

impl<K, V> TableState<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    fn empty() -> Self {
        Self {
            rows: OrdMap::new(),
            indexes: OrdMap::new(),
            writes: OrdMap::new(),
        }
    }

    fn row_or_new(&self, key: &K) -> Arc<PhysicalRow<K, V>> {
        self.rows
            .get(key)
            .cloned()
            .unwrap_or_else(|| Arc::new(PhysicalRow::new(key.clone())))
    }

    fn index_version(&mut self, key: &K, version_id: VersionId, value: &V, indexes: Vec<Tuple>) {
        for index in indexes {
            self.indexes
                .entry(index)
                .or_insert_with(OrdMap::new)
                .insert((key.clone(), version_id), value.clone());
        }
    }

    fn record_write(&mut self, tx: &Arc<Transaction>, key: &K, version_id: VersionId) {
        self.writes.entry(tx.id()).or_insert_with(OrdMap::new).insert(
            (key.clone(), version_id),
            WriteEntry {
                transaction: tx.clone(),
                key: key.clone(),
                version_id,
            },
        );
    }
}

struct Inner<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    config: TableConfig,
    /// Serializes all mutation of the table.
    write_lock: Mutex<()>,
    state: ArcSwap<TableState<K, V>>,
}

impl<K, V> Inner<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Apply `f` to a private copy of the current state, and publish the copy if `f` succeeds and
    /// reports a change (`Some`). On error or `None` the copy is discarded.
    fn update<T>(
        &self,
        f: impl FnOnce(&mut TableState<K, V>) -> Result<Option<T>, Error>,
    ) -> Result<Option<T>, Error> {
        let _guard = self.write_lock.lock();
        let mut next = TableState::clone(&self.state.load());
        let result = f(&mut next)?;
        if result.is_some() {
            self.state.store(Arc::new(next));
        }
        Ok(result)
    }

    fn commit_writes(&self, tx: &Arc<Transaction>) -> Result<(), Error> {
        tx.ensure_active()?;
        let commit_time = tx.commit_time().ok_or(Error::CommitTimeUnset)?;
        let start_time = Instant::now();
        let committed = self.update(|state| {
            let Some(entries) = state.writes.remove(&tx.id()) else {
                return Ok(None);
            };
            if entries.len() > self.config.large_commit_threshold {
                warn!(
                    table = self.config.display_name(),
                    tx = %tx.id(),
                    "Potential large batch @ commit... finalizing {} write entries",
                    entries.len()
                );
            }
            for (key, version_id) in entries.keys() {
                let Some(mut row) = state.rows.get(key).cloned() else {
                    return Err(Error::Internal(format!(
                        "write entry of {} has no row",
                        tx.id()
                    )));
                };
                row.validate(tx)?;
                Arc::make_mut(&mut row).finalize(*version_id, tx, commit_time);
                state.rows.insert(key.clone(), row);
            }
            Ok(Some(entries.len()))
        })?;

        if let Some(num_entries) = committed {
            let elapsed = start_time.elapsed();
            if elapsed >= self.config.slow_commit_threshold {
                warn!(
                    table = self.config.display_name(),
                    tx = %tx.id(),
                    "Long running commit; finalizing {num_entries} write entries took {}s",
                    elapsed.as_secs_f32()
                );
            }
            debug!(
                table = self.config.display_name(),
                tx = %tx.id(),
                commit_time = %commit_time,
                num_entries,
                "commit_tx"
            );
        }
        Ok(())
    }

    fn abort_writes(&self, tx: &Arc<Transaction>) {
        // Dropping write entries cannot fail.
        let removed = self
            .update(|state| Ok(state.writes.remove(&tx.id()).map(|w| w.len())))
            .ok()
            .flatten();
        if let Some(num_entries) = removed {
            debug!(
                table = self.config.display_name(),
                tx = %tx.id(),
                num_entries,
                "abort_tx"
            );
        }
    }
}

impl<K, V> Committer for Inner<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn commit_tx(&self, tx: &Arc<Transaction>) -> Result<(), Error> {
        self.commit_writes(tx)
    }

    fn abort_tx(&self, tx: &Arc<Transaction>) {
        self.abort_writes(tx)
    }
}

/// A multi-versioned table of rows of type `R`, keyed by `K`, holding values of type `V`.
///
/// Reads (`get`, `index`) work against whichever snapshot was current when they started and never
/// block. Mutations (`insert`, `update`, `delete`, `commit_tx`, `abort_tx`) are serialized; each
/// builds a new snapshot and publishes it atomically, or leaves the table untouched on error.
///
/// Clones share the same underlying table.
pub struct Table<K, V, R>
where
    K: Ord + Clone,
    V: Clone,
{
    inner: Arc<Inner<K, V>>,
    _row: PhantomData<fn(R)>,
}

impl<K, V, R> Clone for Table<K, V, R>
where
    K: Ord + Clone,
    V: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _row: PhantomData,
        }
    }
}

impl<K, V, R> Default for Table<K, V, R>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    R: Row<K, V>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, R> Table<K, V, R>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    R: Row<K, V>,
{
    pub fn new() -> Self {
        Self::with_config(TableConfig::default())
    }

    pub fn with_config(config: TableConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                write_lock: Mutex::new(()),
                state: ArcSwap::new(Arc::new(TableState::empty())),
            }),
            _row: PhantomData,
        }
    }

    pub fn config(&self) -> &TableConfig {
        &self.inner.config
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    fn register(&self, tx: &Transaction) -> Result<(), Error> {
        let committer: Arc<dyn Committer> = self.inner.clone();
        tx.register_committer(self.identity(), committer)
    }

    #[cfg(test)]
    pub(crate) fn is_registered_with(&self, tx: &Transaction) -> bool {
        tx.has_committer(self.identity())
    }

    /// Insert a new row, failing with `Error::Duplicate` if `tx` can already see a row under the
    /// same key, or if someone else has written that key since `tx` began.
    pub fn insert(&self, tx: &Arc<Transaction>, row: R) -> Result<(), Error> {
        tx.ensure_active()?;
        let key = row.key();
        self.inner.update(|state| {
            let mut physical_row = state.row_or_new(&key);
            physical_row.validate(tx)?;
            if physical_row.has_visible(tx) {
                return Err(Error::Duplicate);
            }

            let value = row.value();
            let version_id = Arc::make_mut(&mut physical_row).insert(tx, value.clone());
            state.index_version(&key, version_id, &value, row.indexes());
            state.record_write(tx, &key, version_id);
            state.rows.insert(key.clone(), physical_row);

            self.register(tx)?;
            trace!(table = self.inner.config.display_name(), tx = %tx.id(), time = %tx.time(), version = version_id.0, "insert");
            tx.tick();
            Ok(Some(()))
        })?;
        Ok(())
    }

    /// Write a new version of the row, superseding whatever version `tx` sees under its key. No
    /// duplicate check is made; if there was nothing there, a fresh row is created.
    pub fn update(&self, tx: &Arc<Transaction>, row: R) -> Result<(), Error> {
        tx.ensure_active()?;
        let key = row.key();
        self.inner.update(|state| {
            let mut physical_row = state.row_or_new(&key);
            let value = row.value();
            let (locked, born) = Arc::make_mut(&mut physical_row).update(tx, value.clone())?;
            state.index_version(&key, born, &value, row.indexes());
            state.record_write(tx, &key, born);
            if let Some(locked) = locked {
                state.record_write(tx, &key, locked);
            }
            state.rows.insert(key.clone(), physical_row);

            self.register(tx)?;
            trace!(table = self.inner.config.display_name(), tx = %tx.id(), time = %tx.time(), version = born.0, "update");
            tx.tick();
            Ok(Some(()))
        })?;
        Ok(())
    }

    /// Delete the row under `key` as `tx` sees it.
    ///
    /// Succeeds without effect when there is no row under `key`, and likewise when the row exists
    /// but none of its versions is visible to `tx` (never committed, or deleted before `tx`'s
    /// snapshot). In both cases no write is recorded and the table does not join `tx`.
    pub fn delete(&self, tx: &Arc<Transaction>, key: &K) -> Result<(), Error> {
        tx.ensure_active()?;
        self.inner.update(|state| {
            let Some(mut physical_row) = state.rows.get(key).cloned() else {
                return Ok(None);
            };
            let Some(locked) = Arc::make_mut(&mut physical_row).lock_visible(tx)? else {
                return Ok(None);
            };
            state.record_write(tx, key, locked);
            state.rows.insert(key.clone(), physical_row);

            self.register(tx)?;
            trace!(table = self.inner.config.display_name(), tx = %tx.id(), time = %tx.time(), version = locked.0, "delete");
            tx.tick();
            Ok(Some(()))
        })?;
        Ok(())
    }

    /// The value `tx` sees under `key`.
    pub fn get(&self, tx: &Transaction, key: &K) -> Result<V, Error> {
        let state = self.inner.state.load();
        let physical_row = state.rows.get(key).ok_or(Error::NotFound)?;
        physical_row.read(tx)
    }

    /// All rows `tx` sees which were indexed under exactly `index`, in key order.
    pub fn index(&self, tx: &Transaction, index: &Tuple) -> Result<Vec<IndexEntry<K, V>>, Error> {
        let state = self.inner.state.load_full();
        let Some(candidates) = state.indexes.get(index) else {
            return Ok(vec![]);
        };
        let mut entries = vec![];
        for ((key, version_id), value) in candidates.iter() {
            let Some(physical_row) = state.rows.get(key) else {
                continue;
            };
            let current = match physical_row.read_version(tx) {
                Ok(current) => current,
                Err(Error::NotFound) => continue,
                Err(e) => return Err(e),
            };
            // Entries for superseded versions are left in place and skipped here.
            if current.id() == *version_id {
                entries.push(IndexEntry {
                    index: index.clone(),
                    key: key.clone(),
                    version_id: *version_id,
                    value: value.clone(),
                });
            }
        }
        Ok(entries)
    }

    /// Validate and finalize every pending write of `tx` in this table. The commit time must
    /// already have been assigned. On failure nothing changes, and the caller must abort `tx`.
    pub fn commit_tx(&self, tx: &Arc<Transaction>) -> Result<(), Error> {
        self.inner.commit_writes(tx)
    }

    /// Forget every pending write of `tx` in this table.
    pub fn abort_tx(&self, tx: &Arc<Transaction>) {
        self.inner.abort_writes(tx)
    }

    /// The writes `tx` has pending against this table, in key order.
    pub fn pending_writes(&self, tx: &Transaction) -> Vec<WriteEntry<K>> {
        self.inner
            .state
            .load()
            .writes
            .get(&tx.id())
            .map(|w| w.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of physical rows, including rows whose every version is deleted or orphaned.
    pub fn len(&self) -> usize {
        self.inner.state.load().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.load().rows.is_empty()
    }

    /// Write every row and its complete version history to `out`.
    pub fn dump(&self, out: &mut impl Write) -> std::io::Result<()>
    where
        K: Debug,
        V: Debug,
    {
        let state = self.inner.state.load_full();
        for (key, physical_row) in state.rows.iter() {
            writeln!(out, "key: {key:?}")?;
            for version in physical_row.versions() {
                writeln!(out, "\tversion: {version:?}")?;
            }
        }
        Ok(())
    }
}
