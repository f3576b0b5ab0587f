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

use crate::transaction::{ReadPolicy, Transaction, TxId, TxState};
use crate::{Error, Time};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Identifies a version within its physical row. Increases with every version appended.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Ord, PartialOrd, Hash)]
pub struct VersionId(pub u64);

/// One historical value of a row, stamped with the transaction that created it and, once
/// superseded or deleted, the transaction that locked it.
#[derive(Clone)]
pub struct Version<V> {
    id: VersionId,
    value: V,
    born_tx: Arc<Transaction>,
    born_time: Time,
    lock_tx: Option<Arc<Transaction>>,
    lock_time: Option<Time>,
}

impl<V: Debug> Debug for Version<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Version")
            .field("id", &self.id.0)
            .field("value", &self.value)
            .field("born_tx", &self.born_tx.id())
            .field("born_time", &self.born_time)
            .field("lock_tx", &self.lock_tx.as_ref().map(|t| t.id()))
            .field("lock_time", &self.lock_time)
            .finish()
    }
}

/// When `tx` became visible to others, if it has.
fn committed_at(tx: &Transaction) -> Option<Time> {
    match tx.state() {
        TxState::Committed => tx.commit_time(),
        _ => None,
    }
}

fn admits(policy: ReadPolicy, commit_time: Time, now: Time) -> bool {
    match policy {
        ReadPolicy::Snapshot => commit_time <= now,
        ReadPolicy::ReadCommitted => true,
    }
}

impl<V> Version<V> {
    pub fn id(&self) -> VersionId {
        self.id
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn born_tx(&self) -> TxId {
        self.born_tx.id()
    }

    pub fn born_time(&self) -> Time {
        self.born_time
    }

    pub fn lock_tx(&self) -> Option<TxId> {
        self.lock_tx.as_ref().map(|t| t.id())
    }

    pub fn lock_time(&self) -> Option<Time> {
        self.lock_time
    }

    /// Whether a reader `tx_id` at `now` sees this version.
    ///
    /// Committed creators and lockers are judged by their transaction's commit time rather than
    /// the stamp on the version, since a reader may hold a snapshot taken just before the stamps
    /// were finalized.
    pub fn visible(&self, now: Time, tx_id: TxId, policy: ReadPolicy) -> bool {
        if self.born_tx.id() != tx_id {
            match committed_at(&self.born_tx) {
                Some(commit_time) if admits(policy, commit_time, now) => {}
                _ => return false,
            }
        }
        match &self.lock_tx {
            None => true,
            Some(locker) if locker.id() == tx_id => false,
            Some(locker) => match committed_at(locker) {
                Some(commit_time) => !admits(policy, commit_time, now),
                None => true,
            },
        }
    }
}

/// The full version history of one key.
#[derive(Clone)]
pub struct PhysicalRow<K, V> {
    key: K,
    versions: imbl::Vector<Version<V>>,
    next_version: u64,
}

impl<K: Debug, V: Debug + Clone> Debug for PhysicalRow<K, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalRow")
            .field("key", &self.key)
            .field("versions", &self.versions)
            .finish()
    }
}

impl<K, V: Clone> PhysicalRow<K, V> {
    pub fn new(key: K) -> Self {
        Self {
            key,
            versions: imbl::Vector::new(),
            next_version: 0,
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// Versions, oldest first.
    pub fn versions(&self) -> impl DoubleEndedIterator<Item = &Version<V>> {
        self.versions.iter()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    fn newest_visible(&self, now: Time, tx_id: TxId, policy: ReadPolicy) -> Option<usize> {
        (0..self.versions.len())
            .rev()
            .find(|&i| self.versions[i].visible(now, tx_id, policy))
    }

    /// The version `tx` currently sees, newest first.
    pub fn read_version(&self, tx: &Transaction) -> Result<&Version<V>, Error> {
        self.newest_visible(tx.time(), tx.id(), tx.isolation().read)
            .map(|i| &self.versions[i])
            .ok_or(Error::NotFound)
    }

    pub fn read(&self, tx: &Transaction) -> Result<V, Error> {
        self.read_version(tx).map(|v| v.value.clone())
    }

    /// Whether any version is visible to `tx`.
    pub fn has_visible(&self, tx: &Transaction) -> bool {
        self.read_version(tx).is_ok()
    }

    /// Append a new version born by `tx` at its current time.
    pub(crate) fn insert(&mut self, tx: &Arc<Transaction>, value: V) -> VersionId {
        let id = VersionId(self.next_version);
        self.next_version += 1;
        self.versions.push_back(Version {
            id,
            value,
            born_tx: tx.clone(),
            born_time: tx.time(),
            lock_tx: None,
            lock_time: None,
        });
        id
    }

    /// Lock the version `tx` currently sees, marking it superseded or deleted as of `tx`'s
    /// current time. Returns `None` if `tx` sees nothing to lock.
    pub(crate) fn lock_visible(&mut self, tx: &Arc<Transaction>) -> Result<Option<VersionId>, Error> {
        let now = tx.time();
        let Some(i) = self.newest_visible(now, tx.id(), tx.isolation().read) else {
            return Ok(None);
        };
        let version = &mut self.versions[i];
        if let Some(locker) = &version.lock_tx
            && locker.state() != TxState::Aborted
        {
            return Err(Error::WriteConflict);
        }
        version.lock_tx = Some(tx.clone());
        version.lock_time = Some(now);
        Ok(Some(version.id))
    }

    /// Supersede whatever `tx` currently sees with `value`. Returns the id of the locked version
    /// (if there was one) and of the new version.
    pub(crate) fn update(
        &mut self,
        tx: &Arc<Transaction>,
        value: V,
    ) -> Result<(Option<VersionId>, VersionId), Error> {
        let locked = self.lock_visible(tx)?;
        let born = self.insert(tx, value);
        Ok((locked, born))
    }

    /// Stamp the version with `commit_time` wherever `tx` created or locked it.
    pub(crate) fn finalize(&mut self, version_id: VersionId, tx: &Transaction, commit_time: Time) {
        for version in self.versions.iter_mut() {
            if version.id != version_id {
                continue;
            }
            if version.born_tx.id() == tx.id() {
                version.born_time = commit_time;
            }
            if version.lock_tx.as_ref().is_some_and(|l| l.id() == tx.id()) {
                version.lock_time = Some(commit_time);
            }
        }
    }

    /// Write-write conflict check: fail if some other transaction which has committed since `tx`
    /// began created or locked any version of this row.
    pub fn validate(&self, tx: &Transaction) -> Result<(), Error> {
        let begin = tx.begin_time();
        for version in self.versions.iter().rev() {
            if let (Some(locker), Some(lock_time)) = (&version.lock_tx, version.lock_time)
                && locker.id() != tx.id()
                && locker.is_committed()
                && lock_time > begin
            {
                return Err(Error::Duplicate);
            }
            if version.born_tx.id() != tx.id()
                && version.born_tx.is_committed()
                && version.born_time > begin
            {
                return Err(Error::Duplicate);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Timestamp;
    use crate::transaction::IsolationPolicy;
    use test_case::test_case;

    fn begin(id: u64) -> Arc<Transaction> {
        Transaction::new(TxId(id), Timestamp(id), IsolationPolicy::default())
    }

    fn commit(tx: &Arc<Transaction>, ts: u64, row: &mut PhysicalRow<&'static str, i64>) {
        tx.set_commit_time(Timestamp(ts)).unwrap();
        let ids: Vec<_> = row.versions().map(|v| v.id()).collect();
        for id in ids {
            row.finalize(id, tx, Time::new(Timestamp(ts)));
        }
        tx.commit(Timestamp(ts)).unwrap();
    }

    #[test]
    fn test_own_writes_are_visible() {
        let writer = begin(1);
        let mut row = PhysicalRow::new("a");
        assert!(row.is_empty());
        writer.tick();
        row.insert(&writer, 1);
        assert_eq!(row.read(&writer), Ok(1));

        let other = begin(2);
        assert_eq!(row.read(&other), Err(Error::NotFound));
    }

    // (reader begin ts, commit ts of the writer, visible?)
    #[test_case(5, 3, true ; "committed before reader began")]
    #[test_case(5, 5, true ; "committed at reader's timestamp")]
    #[test_case(2, 3, false ; "committed after reader began")]
    fn test_snapshot_born_visibility(reader_ts: u64, commit_ts: u64, visible: bool) {
        let writer = begin(1);
        let mut row = PhysicalRow::new("a");
        row.insert(&writer, 1);
        commit(&writer, commit_ts, &mut row);

        let reader = Transaction::new(TxId(100), Timestamp(reader_ts), IsolationPolicy::default());
        assert_eq!(row.has_visible(&reader), visible);
    }

    #[test_case(IsolationPolicy::SNAPSHOT_ISOLATION, Ok(1) ; "snapshot keeps the old value")]
    #[test_case(IsolationPolicy::READ_COMMITTED, Err(Error::NotFound) ; "read committed sees the delete")]
    fn test_lock_visibility_by_policy(isolation: IsolationPolicy, expected: Result<i64, Error>) {
        let writer = begin(1);
        let mut row = PhysicalRow::new("a");
        row.insert(&writer, 1);
        commit(&writer, 2, &mut row);

        let reader = Transaction::new(TxId(3), Timestamp(3), isolation);
        let deleter = begin(4);
        assert!(row.lock_visible(&deleter).unwrap().is_some());
        commit(&deleter, 5, &mut row);

        assert_eq!(row.read(&reader), expected);
    }

    #[test]
    fn test_own_lock_hides_version() {
        let writer = begin(1);
        let mut row = PhysicalRow::new("a");
        row.insert(&writer, 1);
        commit(&writer, 2, &mut row);

        let deleter = begin(3);
        let observer = begin(4);
        row.lock_visible(&deleter).unwrap();
        deleter.tick();
        assert_eq!(row.read(&deleter), Err(Error::NotFound));
        // An uncommitted lock doesn't hide anything from anyone else.
        assert_eq!(row.read(&observer), Ok(1));
    }

    #[test]
    fn test_lock_conflicts_with_live_locker() {
        let writer = begin(1);
        let mut row = PhysicalRow::new("a");
        row.insert(&writer, 1);
        commit(&writer, 2, &mut row);

        let first = begin(3);
        let second = begin(4);
        row.lock_visible(&first).unwrap();
        assert_eq!(row.lock_visible(&second), Err(Error::WriteConflict));

        first.abort();
        assert!(row.lock_visible(&second).unwrap().is_some());
    }

    #[test]
    fn test_update_supersedes() {
        let writer = begin(1);
        let mut row = PhysicalRow::new("a");
        row.insert(&writer, 1);
        commit(&writer, 2, &mut row);

        let updater = begin(3);
        let (locked, born) = row.update(&updater, 2).unwrap();
        assert_eq!(locked, Some(VersionId(0)));
        assert_eq!(born, VersionId(1));
        updater.tick();
        assert_eq!(row.read(&updater), Ok(2));
        commit(&updater, 4, &mut row);

        let late = begin(5);
        assert_eq!(row.read(&late), Ok(2));
        assert_eq!(row.len(), 2);
        assert!(!row.is_empty());
        let versions: Vec<_> = row.versions().collect();
        assert_eq!(versions[0].born_tx(), TxId(1));
        assert_eq!(versions[0].lock_tx(), Some(TxId(3)));
        assert_eq!(versions[0].lock_time(), Some(Time::new(Timestamp(4))));
        assert_eq!(versions[1].born_tx(), TxId(3));
        assert_eq!(versions[1].lock_tx(), None);
        assert_eq!(versions[1].born_time(), Time::new(Timestamp(4)));
    }

    #[test]
    fn test_validate_first_committer_wins() {
        let mut row = PhysicalRow::new("k");
        let t1 = begin(1);
        let t2 = begin(2);
        row.insert(&t1, 1);
        row.insert(&t2, 2);
        assert_eq!(row.validate(&t1), Ok(()));
        assert_eq!(row.validate(&t2), Ok(()));

        row.finalize(VersionId(0), &t1, Time::new(Timestamp(3)));
        t1.commit(Timestamp(3)).unwrap();

        assert_eq!(row.validate(&t2), Err(Error::Duplicate));
        // A transaction which began after the commit has nothing to fear from it.
        assert_eq!(row.validate(&begin(4)), Ok(()));
    }

    #[test]
    fn test_aborted_versions_never_conflict_or_show() {
        let mut row = PhysicalRow::new("k");
        let t1 = begin(1);
        row.insert(&t1, 1);
        t1.abort();

        let t2 = begin(2);
        assert_eq!(row.validate(&t2), Ok(()));
        assert_eq!(row.read(&t2), Err(Error::NotFound));
    }
}
