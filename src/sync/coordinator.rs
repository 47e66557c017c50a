//! Sync coordinator: decides for every read and write whether to go to the
//! network or fall back to local state, and replays queued writes once
//! connectivity returns.
//!
//! The queue and the cache are owned exclusively by the coordinator; callers
//! only ever go through its methods.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::auth::CredentialProvider;
use crate::cache::{CacheEntry, CacheSource, RecordCache, ScopeKey, Snapshot};
use crate::db::Database;
use crate::error::{RemoteError, SyncError};
use crate::event::{EventBus, SyncEvent};
use crate::finance::{MutationKind, Record, RecordType, RemoteStore};
use crate::queue::{MutationQueue, QueuedMutation};

use super::connectivity::Connectivity;

/// Outcome of a refresh: `None` when the result arrived after going offline
/// and was discarded.
type RefreshResult = Result<Option<CacheEntry>, SyncError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

/// Result of an additive write.
#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
  /// The remote store accepted the record
  Confirmed(Record),
  /// Stored locally; will be sent on the next drain
  Queued(Record),
}

impl AddOutcome {
  pub fn record(&self) -> &Record {
    match self {
      AddOutcome::Confirmed(record) | AddOutcome::Queued(record) => record,
    }
  }

  pub fn is_queued(&self) -> bool {
    matches!(self, AddOutcome::Queued(_))
  }
}

/// Summary of one drain call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Mutations sent to the remote store
  pub attempted: usize,
  /// Mutations confirmed and removed from the queue
  pub synced: usize,
  /// Mutations that failed and stay queued
  pub failed: usize,
  /// Mutations not attempted because connectivity dropped mid-drain
  pub deferred: usize,
  /// Cache scopes re-fetched from the server afterwards
  pub refreshed: usize,
  /// Another drain was already running; this trigger was folded into it
  pub coalesced: bool,
}

impl DrainReport {
  fn coalesced() -> Self {
    Self {
      coalesced: true,
      ..Self::default()
    }
  }

  fn merge(&mut self, other: DrainReport) {
    self.attempted += other.attempted;
    self.synced += other.synced;
    self.failed += other.failed;
    self.deferred = other.deferred;
    self.refreshed += other.refreshed;
  }
}

enum FetchStep {
  Cache,
  Refresh(Option<CacheEntry>),
  Done,
}

struct Inner {
  owner: String,
  remote: Arc<dyn RemoteStore>,
  credentials: Arc<dyn CredentialProvider>,
  queue: MutationQueue,
  cache: RecordCache,
  online: AtomicBool,
  /// At most one network refresh per scope at a time
  inflight: Mutex<HashMap<ScopeKey, SharedRefresh>>,
  /// Scopes the front end has asked for; re-fetched after every drain
  observed: Mutex<HashSet<ScopeKey>>,
  /// Records appended to a scope while its refresh is in flight. Holding this
  /// lock makes a caller the only writer of cache entries.
  local_writes: Mutex<HashMap<ScopeKey, Vec<Record>>>,
  draining: AtomicBool,
  drain_requested: AtomicBool,
  events: EventBus,
}

/// Clears the draining flag when a drain ends, including on error.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

/// Coordinator handle. Clone is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct SyncCoordinator {
  inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  // The guarded maps hold no invariants a panicking holder could break
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SyncCoordinator {
  /// `initial` is the connectivity the host observed at startup.
  pub fn new(
    db: Arc<Database>,
    remote: Arc<dyn RemoteStore>,
    credentials: Arc<dyn CredentialProvider>,
    owner: impl Into<String>,
    initial: Connectivity,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        owner: owner.into(),
        remote,
        credentials,
        queue: MutationQueue::new(db.clone()),
        cache: RecordCache::new(db),
        online: AtomicBool::new(initial.is_online()),
        inflight: Mutex::new(HashMap::new()),
        observed: Mutex::new(HashSet::new()),
        local_writes: Mutex::new(HashMap::new()),
        draining: AtomicBool::new(false),
        drain_requested: AtomicBool::new(false),
        events: EventBus::new(),
      }),
    }
  }

  pub fn owner(&self) -> &str {
    &self.inner.owner
  }

  /// Cache scope for one record type and partition of this owner.
  pub fn scope(&self, record_type: RecordType, partition: i32) -> ScopeKey {
    ScopeKey::new(self.inner.owner.clone(), partition, record_type)
  }

  pub fn connectivity(&self) -> Connectivity {
    Connectivity::from_online(self.is_online())
  }

  fn is_online(&self) -> bool {
    self.inner.online.load(Ordering::Acquire)
  }

  pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
    self.inner.events.subscribe()
  }

  // ===== Connectivity =====

  /// Record a connectivity report from the host. Returns true on an
  /// OFFLINE -> ONLINE transition, the only event that should trigger a drain.
  pub fn set_connectivity(&self, state: Connectivity) -> bool {
    let was_online = self.inner.online.swap(state.is_online(), Ordering::AcqRel);
    if was_online == state.is_online() {
      return false;
    }

    info!(state = %state, "Connectivity changed");
    self
      .inner
      .events
      .emit(SyncEvent::ConnectivityChanged(state));
    state.is_online()
  }

  /// Apply a connectivity report and, on reconnect, drain the queue.
  pub async fn handle_connectivity(
    &self,
    state: Connectivity,
  ) -> Result<Option<DrainReport>, SyncError> {
    if self.set_connectivity(state) {
      return self.drain().await.map(Some);
    }
    Ok(None)
  }

  /// Follow the host's connectivity signal until its sender is dropped.
  /// Each reconnect starts a drain in the background so that a later
  /// OFFLINE report is seen while the drain is still running.
  pub fn spawn_listener(&self, mut rx: watch::Receiver<Connectivity>) -> JoinHandle<()> {
    let this = self.clone();
    tokio::spawn(async move {
      while rx.changed().await.is_ok() {
        let state = *rx.borrow_and_update();
        if !this.set_connectivity(state) {
          continue;
        }

        let drainer = this.clone();
        tokio::spawn(async move {
          if let Err(e) = drainer.drain().await {
            error!(error = %e, "Drain after reconnect failed");
          }
        });
      }
      debug!("Connectivity signal closed");
    })
  }

  fn require_credential(&self) -> Result<(), SyncError> {
    if self.inner.credentials.has_valid_credential() {
      Ok(())
    } else {
      Err(SyncError::Auth("no valid credential".to_string()))
    }
  }

  // ===== Reads =====

  /// Records for one scope, as a stream of up to two snapshots: the cached
  /// list straight away, then the server's list once a refresh lands.
  ///
  /// Offline, the cached list (possibly absent) is the only emission. A
  /// transient network failure yields a second `Stale` snapshot of the cached
  /// list; auth and storage failures yield an `Err` item.
  pub fn fetch_records(&self, scope: ScopeKey) -> BoxStream<'static, Result<Snapshot, SyncError>> {
    lock(&self.inner.observed).insert(scope.clone());

    let this = self.clone();
    stream::unfold(FetchStep::Cache, move |step| {
      let this = this.clone();
      let scope = scope.clone();
      async move {
        match step {
          FetchStep::Done => None,
          FetchStep::Cache => {
            let cached = match this.inner.cache.read(&scope) {
              Ok(cached) => cached,
              Err(e) => return Some((Err(SyncError::from(e)), FetchStep::Done)),
            };

            if !this.is_online() {
              let snapshot = Snapshot::new(scope, cached, CacheSource::Offline);
              return Some((Ok(snapshot), FetchStep::Done));
            }

            match cached {
              Some(entry) => {
                let snapshot = Snapshot::new(scope, Some(entry.clone()), CacheSource::Cache);
                Some((Ok(snapshot), FetchStep::Refresh(Some(entry))))
              }
              None => this
                .refreshed_snapshot(scope, None, false)
                .await
                .map(|item| (item, FetchStep::Done)),
            }
          }
          FetchStep::Refresh(cached) => this
            .refreshed_snapshot(scope, cached, true)
            .await
            .map(|item| (item, FetchStep::Done)),
        }
      }
    })
    .boxed()
  }

  async fn refreshed_snapshot(
    &self,
    scope: ScopeKey,
    cached: Option<CacheEntry>,
    already_emitted: bool,
  ) -> Option<Result<Snapshot, SyncError>> {
    match self.refresh(&scope).await {
      Ok(Some(fresh)) => Some(Ok(Snapshot::new(scope, Some(fresh), CacheSource::Network))),
      Ok(None) if already_emitted => None,
      Ok(None) => Some(Ok(Snapshot::new(scope, cached, CacheSource::Offline))),
      Err(SyncError::Network(e)) if e.is_transient() => {
        warn!(scope = %scope, error = %e, "Refresh failed, serving cached records");
        Some(Ok(Snapshot::new(scope, cached, CacheSource::Stale)))
      }
      Err(e) => Some(Err(e)),
    }
  }

  /// Join the in-flight refresh for a scope, or start one.
  fn refresh(&self, scope: &ScopeKey) -> SharedRefresh {
    let mut inflight = lock(&self.inner.inflight);
    if let Some(pending) = inflight.get(scope) {
      debug!(scope = %scope, "Joining in-flight refresh");
      return pending.clone();
    }

    let this = self.clone();
    let key = scope.clone();
    let refresh = async move {
      let result = this.refresh_uncoalesced(&key).await;
      lock(&this.inner.inflight).remove(&key);
      result
    }
    .boxed()
    .shared();

    inflight.insert(scope.clone(), refresh.clone());
    refresh
  }

  async fn refresh_uncoalesced(&self, scope: &ScopeKey) -> RefreshResult {
    self.require_credential()?;

    lock(&self.inner.local_writes).insert(scope.clone(), Vec::new());
    let listed = self
      .inner
      .remote
      .list(&scope.owner, scope.record_type, scope.partition)
      .await;

    let mut local_writes = lock(&self.inner.local_writes);
    let appended = local_writes.remove(scope).unwrap_or_default();
    let records = listed?;

    // The call may have outlived an OFFLINE transition
    if !self.is_online() {
      debug!(scope = %scope, "Went offline during refresh, discarding result");
      return Ok(None);
    }

    let records = self.with_local_records(scope, records, appended)?;
    let entry = self.inner.cache.write(scope, &records)?;
    drop(local_writes);

    debug!(scope = %scope, count = entry.records.len(), "Cache refreshed");
    Ok(Some(entry))
  }

  /// Server list plus what the server cannot know about yet: adds still in
  /// the queue, and adds confirmed after the list was fetched.
  fn with_local_records(
    &self,
    scope: &ScopeKey,
    mut records: Vec<Record>,
    appended: Vec<Record>,
  ) -> Result<Vec<Record>, SyncError> {
    let queued = self
      .inner
      .queue
      .list_pending()?
      .into_iter()
      .filter(|m| {
        m.kind.record_type() == scope.record_type
          && m.payload.partition().ok() == Some(scope.partition)
      })
      .map(|m| m.payload);

    for record in queued.chain(appended) {
      let known = record
        .id()
        .is_some_and(|id| records.iter().any(|r| r.id() == Some(id)));
      if !known {
        records.push(record);
      }
    }
    Ok(records)
  }

  /// Append a record to a scope's cached list. Best effort: the record is
  /// already durable elsewhere (queue or server), so a cache failure is only
  /// logged.
  fn append_local(
    &self,
    local_writes: &mut HashMap<ScopeKey, Vec<Record>>,
    scope: &ScopeKey,
    record: Record,
  ) {
    if let Some(during_refresh) = local_writes.get_mut(scope) {
      during_refresh.push(record.clone());
    }
    if let Err(e) = self.inner.cache.append(scope, record) {
      warn!(scope = %scope, error = %e, "Failed to add record to cached list");
    }
  }

  // ===== Writes =====

  /// Create a record. Online, the remote store is tried first and a transient
  /// failure falls back to the queue; offline, the record is queued directly.
  /// Either way the record shows up in its scope's cached list at once.
  pub async fn add_record(
    &self,
    kind: MutationKind,
    mut payload: Record,
  ) -> Result<AddOutcome, SyncError> {
    let record_type = kind.record_type();
    let partition = payload.partition()?;
    let id = payload.ensure_id();
    let scope = self.scope(record_type, partition);

    if !self.is_online() {
      debug!(id = %id, "Offline, queueing new record");
      return self.enqueue(kind, &scope, payload);
    }

    self.require_credential()?;

    match self
      .inner
      .remote
      .create(&self.inner.owner, record_type, &payload)
      .await
    {
      Ok(mut confirmed) => {
        if confirmed.id().is_none() {
          confirmed.set_id(&id);
        }
        let scope = match confirmed.partition() {
          Ok(p) if p != partition => self.scope(record_type, p),
          _ => scope,
        };
        let mut local_writes = lock(&self.inner.local_writes);
        self.append_local(&mut local_writes, &scope, confirmed.clone());
        Ok(AddOutcome::Confirmed(confirmed))
      }
      Err(e) if e.is_transient() => {
        warn!(id = %id, error = %e, "Create failed, queueing record for later");
        self.enqueue(kind, &scope, payload)
      }
      Err(e) => Err(e.into()),
    }
  }

  fn enqueue(
    &self,
    kind: MutationKind,
    scope: &ScopeKey,
    payload: Record,
  ) -> Result<AddOutcome, SyncError> {
    let mut local_writes = lock(&self.inner.local_writes);
    let queued = self.inner.queue.enqueue(kind, payload)?;
    self.append_local(&mut local_writes, scope, queued.payload.clone());
    drop(local_writes);

    self.inner.events.emit(SyncEvent::MutationQueued {
      id: queued.id.clone(),
      kind,
    });
    Ok(AddOutcome::Queued(queued.payload))
  }

  /// Update a record on the server. Never queued: fails immediately while
  /// offline.
  pub async fn update_record(
    &self,
    record_type: RecordType,
    payload: Record,
  ) -> Result<Record, SyncError> {
    if !self.is_online() {
      return Err(SyncError::OfflineUnavailable {
        operation: "update",
      });
    }
    self.require_credential()?;

    let Some(id) = payload.id().map(String::from) else {
      return Err(SyncError::InvalidRecord("update requires an id".to_string()));
    };

    let mut confirmed = self
      .inner
      .remote
      .update(&self.inner.owner, record_type, &payload)
      .await?;
    if confirmed.id().is_none() {
      confirmed.set_id(&id);
    }

    if self.is_online() {
      let partition = confirmed.partition().or_else(|_| payload.partition())?;
      self
        .inner
        .cache
        .apply_update(&self.inner.owner, record_type, partition, &confirmed)?;
    } else {
      debug!(id = %id, "Went offline during update, leaving cache untouched");
    }

    Ok(confirmed)
  }

  /// Delete a record on the server. Never queued: fails immediately while
  /// offline.
  pub async fn delete_record(&self, record_type: RecordType, id: &str) -> Result<(), SyncError> {
    if !self.is_online() {
      return Err(SyncError::OfflineUnavailable {
        operation: "delete",
      });
    }
    self.require_credential()?;

    self
      .inner
      .remote
      .delete(&self.inner.owner, record_type, id)
      .await?;

    if self.is_online() {
      self
        .inner
        .cache
        .remove_record(&self.inner.owner, record_type, id)?;
    } else {
      debug!(id = %id, "Went offline during delete, leaving cache untouched");
    }
    Ok(())
  }

  // ===== Queue =====

  pub fn pending_count(&self) -> Result<u64, SyncError> {
    Ok(self.inner.queue.count()?)
  }

  pub fn pending(&self) -> Result<Vec<QueuedMutation>, SyncError> {
    Ok(self.inner.queue.list_pending()?)
  }

  /// Replay queued additive writes in order, then re-fetch every observed
  /// scope so local state matches the server.
  ///
  /// Not re-entrant: a call made while a drain is running only asks the
  /// running drain for one more pass and returns a `coalesced` report.
  pub async fn drain(&self) -> Result<DrainReport, SyncError> {
    if self.inner.draining.swap(true, Ordering::AcqRel) {
      self.inner.drain_requested.store(true, Ordering::Release);
      debug!("Drain already running, coalescing trigger");
      return Ok(DrainReport::coalesced());
    }

    let mut report = DrainReport::default();
    loop {
      {
        let _guard = DrainGuard(&self.inner.draining);
        loop {
          self.inner.drain_requested.store(false, Ordering::Release);
          report.merge(self.drain_pass().await?);

          let again = self.inner.drain_requested.swap(false, Ordering::AcqRel);
          if !again || !self.is_online() {
            break;
          }
          debug!("Running requested drain pass");
        }
      }

      // A trigger may have been coalesced after the last check but before
      // the draining flag was cleared
      if !self.reclaim_drain() {
        break;
      }
      debug!("Running drain pass requested during hand-off");
    }

    info!(
      synced = report.synced,
      failed = report.failed,
      deferred = report.deferred,
      refreshed = report.refreshed,
      "Drain finished"
    );
    self
      .inner
      .events
      .emit(SyncEvent::DrainCompleted(report.clone()));
    Ok(report)
  }

  /// Take the draining flag back if a pass was requested and nobody else
  /// holds it.
  fn reclaim_drain(&self) -> bool {
    self.inner.drain_requested.load(Ordering::Acquire)
      && self.is_online()
      && !self.inner.draining.swap(true, Ordering::AcqRel)
  }

  /// Drain at startup when already online with writes left over from an
  /// earlier offline session; no connectivity transition will trigger it.
  pub async fn drain_if_pending(&self) -> Result<Option<DrainReport>, SyncError> {
    if !self.is_online() || self.pending_count()? == 0 {
      return Ok(None);
    }
    self.drain().await.map(Some)
  }

  async fn drain_pass(&self) -> Result<DrainReport, SyncError> {
    // Fixed snapshot: anything queued from here on waits for the next pass
    let pending = self.inner.queue.list_pending()?;
    let mut report = DrainReport::default();
    let mut touched = BTreeSet::new();

    if !pending.is_empty() {
      self.require_credential()?;
      info!(count = pending.len(), "Draining mutation queue");
    }

    let total = pending.len();
    for (index, mutation) in pending.into_iter().enumerate() {
      if !self.is_online() {
        report.deferred = total - index;
        info!(
          remaining = report.deferred,
          "Connection lost during drain, leaving the rest queued"
        );
        break;
      }

      let record_type = mutation.kind.record_type();
      if let Ok(partition) = mutation.payload.partition() {
        touched.insert(self.scope(record_type, partition));
      }

      report.attempted += 1;
      match self
        .inner
        .remote
        .create(&self.inner.owner, record_type, &mutation.payload)
        .await
      {
        Ok(_) => {
          self.inner.queue.remove(&mutation.id)?;
          report.synced += 1;
          debug!(id = %mutation.id, "Queued mutation synced");
        }
        Err(RemoteError::Unauthorized) => {
          return Err(RemoteError::Unauthorized.into());
        }
        Err(e) => {
          report.failed += 1;
          warn!(
            id = %mutation.id,
            kind = mutation.kind.as_str(),
            error = %e,
            "Queued mutation failed, keeping it for the next reconnect"
          );
        }
      }
    }

    if !self.is_online() {
      return Ok(report);
    }

    // Reconciliation: server truth replaces optimistic local state
    let mut scopes: BTreeSet<ScopeKey> = lock(&self.inner.observed).iter().cloned().collect();
    scopes.append(&mut touched);

    for scope in scopes {
      match self.refresh(&scope).await {
        Ok(Some(_)) => report.refreshed += 1,
        Ok(None) => {}
        Err(SyncError::Network(e)) => {
          warn!(scope = %scope, error = %e, "Refresh after drain failed");
        }
        Err(e) => return Err(e),
      }
    }

    Ok(report)
  }
}
