//! In-memory MVCC relationship store.
//!
//! Every write commits a transaction with the next revision and the
//! clock's current time. Relationships and namespace definitions are never
//! updated in place. A write closes the live version at the new revision
//! and opens a new one, so any retained revision can still be read.
//! Garbage collection drops versions closed before the watermark together
//! with the transaction records preceding it, after which reads below the
//! watermark are rejected.

use super::clock::{Clock, SystemClock};
use super::{RepairOperation, RepairReport, Repairable};
use crate::gc::{DeletionCounts, GcCompletion, GcTarget, ReadyState};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

const REPAIR_TRANSACTION_IDS: &str = "transaction-ids";

/// Transaction identifier. Higher revisions committed later.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `resource#relation@subject` tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Relationship {
    /// Object the relation is defined on, e.g. `document:readme`.
    pub resource: String,
    /// Relation name, e.g. `viewer`.
    pub relation: String,
    /// Subject holding the relation, e.g. `user:alice`.
    pub subject: String,
}

impl Relationship {
    /// Creates a relationship.
    pub fn new(
        resource: impl Into<String>,
        relation: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            relation: relation.into(),
            subject: subject.into(),
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.resource, self.relation, self.subject)
    }
}

/// One stored version of a row, visible in `[created, deleted)`.
#[derive(Debug, Clone)]
struct Version<T> {
    value: T,
    created: Revision,
    deleted: Option<Revision>,
}

impl<T> Version<T> {
    const fn is_live(&self) -> bool {
        self.deleted.is_none()
    }

    fn visible_at(&self, revision: Revision) -> bool {
        self.created <= revision && self.deleted.is_none_or(|deleted| deleted > revision)
    }

    fn deleted_before(&self, watermark: Revision) -> bool {
        self.deleted.is_some_and(|deleted| deleted < watermark)
    }
}

#[derive(Debug)]
struct State {
    transactions: BTreeMap<Revision, DateTime<Utc>>,
    relationships: Vec<Version<Relationship>>,
    namespaces: Vec<Version<(String, String)>>,
    next_revision: u64,
    head: Revision,
    gc_floor: Revision,
}

impl State {
    const fn new() -> Self {
        Self {
            transactions: BTreeMap::new(),
            relationships: Vec::new(),
            namespaces: Vec::new(),
            next_revision: 1,
            head: Revision(0),
            gc_floor: Revision(0),
        }
    }

    fn begin(&mut self, committed_at: DateTime<Utc>) -> Result<Revision> {
        let revision = Revision(self.next_revision);
        if self.transactions.contains_key(&revision) {
            return Err(Error::backend(
                "write",
                format!(
                    "transaction id {revision} already exists, run the \
                     '{REPAIR_TRANSACTION_IDS}' repair"
                ),
            ));
        }
        self.next_revision = self.next_revision.saturating_add(1);
        self.transactions.insert(revision, committed_at);
        self.head = self.head.max(revision);
        Ok(revision)
    }
}

/// MVCC relationship store held in memory.
///
/// Cheap to share behind an [`Arc`]; every method takes `&self`.
#[derive(Debug)]
pub struct MemoryDatastore {
    clock: Arc<dyn Clock>,
    state: RwLock<State>,
    ready: AtomicBool,
    completion: GcCompletion,
}

impl MemoryDatastore {
    /// Creates an empty, ready store on the wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty, ready store on `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: RwLock::new(State::new()),
            ready: AtomicBool::new(true),
            completion: GcCompletion::new(),
        }
    }

    /// Completion marker shared with health checks.
    #[must_use]
    pub fn completion(&self) -> GcCompletion {
        self.completion.clone()
    }

    /// Toggles the readiness probe.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    /// Writes `relationships` in one transaction, replacing live copies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the next transaction id is already
    /// taken, which happens after [`MemoryDatastore::restore_transactions`]
    /// until the `transaction-ids` repair runs.
    pub fn write_relationships(&self, relationships: &[Relationship]) -> Result<Revision> {
        let committed_at = self.clock.now();
        let mut state = self.write_state("write_relationships")?;
        let revision = state.begin(committed_at)?;

        for relationship in relationships {
            close_live(&mut state.relationships, revision, |r| r == relationship);
            state.relationships.push(Version {
                value: relationship.clone(),
                created: revision,
                deleted: None,
            });
        }
        Ok(revision)
    }

    /// Deletes `relationships` in one transaction.
    ///
    /// Relationships that are not live are ignored; the transaction is
    /// committed either way.
    ///
    /// # Errors
    ///
    /// Same as [`MemoryDatastore::write_relationships`].
    pub fn delete_relationships(&self, relationships: &[Relationship]) -> Result<Revision> {
        let committed_at = self.clock.now();
        let mut state = self.write_state("delete_relationships")?;
        let revision = state.begin(committed_at)?;

        for relationship in relationships {
            close_live(&mut state.relationships, revision, |r| r == relationship);
        }
        Ok(revision)
    }

    /// Writes a namespace definition, superseding the previous one.
    ///
    /// # Errors
    ///
    /// Same as [`MemoryDatastore::write_relationships`].
    pub fn write_namespace(&self, name: &str, definition: &str) -> Result<Revision> {
        let committed_at = self.clock.now();
        let mut state = self.write_state("write_namespace")?;
        let revision = state.begin(committed_at)?;

        close_live(&mut state.namespaces, revision, |(n, _)| n == name);
        state.namespaces.push(Version {
            value: (name.to_string(), definition.to_string()),
            created: revision,
            deleted: None,
        });
        Ok(revision)
    }

    /// Latest committed revision, `Revision(0)` before the first write.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the store's lock is poisoned.
    pub fn head_revision(&self) -> Result<Revision> {
        Ok(self.read_state("head_revision")?.head)
    }

    /// Oldest revision that can still be read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the store's lock is poisoned.
    pub fn gc_floor(&self) -> Result<Revision> {
        Ok(self.read_state("gc_floor")?.gc_floor)
    }

    /// Relationships visible at `revision`, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `revision` was garbage collected
    /// or has not been committed yet.
    pub fn relationships_at(&self, revision: Revision) -> Result<Vec<Relationship>> {
        let state = self.read_state("relationships_at")?;
        check_readable(&state, revision)?;

        let mut visible: Vec<Relationship> = state
            .relationships
            .iter()
            .filter(|version| version.visible_at(revision))
            .map(|version| version.value.clone())
            .collect();
        visible.sort();
        Ok(visible)
    }

    /// Namespace definition visible at `revision`.
    ///
    /// # Errors
    ///
    /// Same as [`MemoryDatastore::relationships_at`].
    pub fn namespace_at(&self, name: &str, revision: Revision) -> Result<Option<String>> {
        let state = self.read_state("namespace_at")?;
        check_readable(&state, revision)?;

        Ok(state
            .namespaces
            .iter()
            .find(|version| version.value.0 == name && version.visible_at(revision))
            .map(|version| version.value.1.clone()))
    }

    /// Stored row counts, superseded versions included.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the store's lock is poisoned.
    pub fn stored_counts(&self) -> Result<DeletionCounts> {
        let state = self.read_state("stored_counts")?;
        Ok(DeletionCounts {
            relationships: count(state.relationships.len()),
            transactions: count(state.transactions.len()),
            namespaces: count(state.namespaces.len()),
        })
    }

    /// Loads transaction records from a backup.
    ///
    /// The id sequence is left untouched, as a raw table restore would
    /// leave it, so new writes can collide with restored ids until the
    /// `transaction-ids` repair runs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the store's lock is poisoned.
    pub fn restore_transactions(
        &self,
        records: impl IntoIterator<Item = (Revision, DateTime<Utc>)>,
    ) -> Result<u64> {
        let mut state = self.write_state("restore_transactions")?;
        let mut restored = 0_u64;
        for (revision, committed_at) in records {
            state.transactions.insert(revision, committed_at);
            state.head = state.head.max(revision);
            restored = restored.saturating_add(1);
        }
        Ok(restored)
    }

    fn read_state(&self, operation: &str) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| Error::backend(operation, "datastore lock poisoned"))
    }

    fn write_state(&self, operation: &str) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| Error::backend(operation, "datastore lock poisoned"))
    }

    fn repair_transaction_ids(&self, output_progress: bool) -> Result<u64> {
        let mut state = self.write_state(REPAIR_TRANSACTION_IDS)?;
        let Some(max) = state.transactions.keys().next_back().copied() else {
            return Ok(0);
        };

        let required = max.0.saturating_add(1);
        if state.next_revision >= required {
            if output_progress {
                info!(next_revision = state.next_revision, "transaction ids already in order");
            }
            return Ok(0);
        }

        let skipped = required - state.next_revision;
        if output_progress {
            info!(
                from = state.next_revision,
                to = required,
                "advancing transaction id sequence"
            );
        }
        state.next_revision = required;
        Ok(skipped)
    }
}

impl Default for MemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

fn close_live<T>(versions: &mut [Version<T>], at: Revision, matches: impl Fn(&T) -> bool) {
    for version in versions
        .iter_mut()
        .filter(|version| version.is_live() && matches(&version.value))
    {
        version.deleted = Some(at);
    }
}

fn check_readable(state: &State, revision: Revision) -> Result<()> {
    if revision < state.gc_floor {
        return Err(Error::InvalidInput(format!(
            "revision {revision} has been garbage collected, oldest readable is {}",
            state.gc_floor
        )));
    }
    if revision > state.head {
        return Err(Error::InvalidInput(format!(
            "revision {revision} is newer than head revision {}",
            state.head
        )));
    }
    Ok(())
}

fn count(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

#[async_trait]
impl GcTarget for MemoryDatastore {
    type Revision = Revision;

    async fn ready_state(&self) -> Result<ReadyState> {
        if self.ready.load(Ordering::Acquire) {
            Ok(ReadyState::ready())
        } else {
            Ok(ReadyState::not_ready("memory datastore is not ready"))
        }
    }

    async fn now(&self) -> Result<DateTime<Utc>> {
        Ok(self.clock.now())
    }

    async fn tx_id_before(&self, threshold: DateTime<Utc>) -> Result<Revision> {
        let state = self.read_state("tx_id_before")?;
        Ok(state
            .transactions
            .iter()
            .filter(|(_, committed_at)| **committed_at <= threshold)
            .map(|(revision, _)| *revision)
            .max()
            .unwrap_or(state.gc_floor))
    }

    #[instrument(name = "revgc.datastore.memory.delete_before_tx", skip(self))]
    async fn delete_before_tx(&self, watermark: &Revision) -> Result<DeletionCounts> {
        let watermark = *watermark;
        let mut state = self.write_state("delete_before_tx")?;

        let before = state.relationships.len();
        state
            .relationships
            .retain(|version| !version.deleted_before(watermark));
        let relationships = count(before - state.relationships.len());

        let before = state.namespaces.len();
        state
            .namespaces
            .retain(|version| !version.deleted_before(watermark));
        let namespaces = count(before - state.namespaces.len());

        let retained = state.transactions.split_off(&watermark);
        let transactions = count(state.transactions.len());
        state.transactions = retained;

        state.gc_floor = state.gc_floor.max(watermark);

        let counts = DeletionCounts {
            relationships,
            transactions,
            namespaces,
        };
        debug!(collected = %counts, gc_floor = %state.gc_floor, "deleted superseded data");
        Ok(counts)
    }

    fn has_gc_run(&self) -> bool {
        self.completion.has_run()
    }

    fn mark_gc_completed(&self) {
        self.completion.mark(self.clock.now());
    }

    fn reset_gc_completed(&self) {
        self.completion.reset();
    }
}

#[async_trait]
impl Repairable for MemoryDatastore {
    fn repair_operations(&self) -> Vec<RepairOperation> {
        vec![RepairOperation {
            name: REPAIR_TRANSACTION_IDS,
            description: "Advances the transaction id sequence past restored transaction records",
        }]
    }

    async fn repair(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        output_progress: bool,
    ) -> Result<RepairReport> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let repaired = match operation {
            REPAIR_TRANSACTION_IDS => self.repair_transaction_ids(output_progress)?,
            unknown => {
                return Err(Error::InvalidInput(format!(
                    "unknown repair operation '{unknown}'"
                )));
            },
        };

        Ok(RepairReport {
            operation: operation.to_string(),
            repaired,
        })
    }
}
