//! Scripted in-memory remote store for coordinator tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::auth::StaticToken;
use crate::db::Database;
use crate::error::RemoteError;
use crate::finance::{Record, RecordType, RemoteStore};

use super::{Connectivity, SyncCoordinator};

pub const OWNER: &str = "owner-1";

/// A call as observed by the remote store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
  Create(String),
  List(RecordType, i32),
  Update(String),
  Delete(String),
}

#[derive(Default)]
struct State {
  server: BTreeMap<(String, RecordType, i32), Vec<Record>>,
  calls: Vec<Call>,
  fail_all: Option<RemoteError>,
  fail_ids: HashSet<String>,
}

#[derive(Default)]
pub struct ScriptedRemote {
  state: Mutex<State>,
  /// When set, every list call waits for a permit before answering
  list_gate: Mutex<Option<Arc<Semaphore>>>,
  /// Same for creates that are not scripted to fail
  create_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl ScriptedRemote {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn calls(&self) -> Vec<Call> {
    self.state.lock().unwrap().calls.clone()
  }

  pub fn created_ids(&self) -> Vec<String> {
    self
      .calls()
      .into_iter()
      .filter_map(|call| match call {
        Call::Create(id) => Some(id),
        _ => None,
      })
      .collect()
  }

  pub fn list_calls(&self) -> usize {
    self
      .calls()
      .iter()
      .filter(|call| matches!(call, Call::List(..)))
      .count()
  }

  pub fn clear_calls(&self) {
    self.state.lock().unwrap().calls.clear();
  }

  /// Make every call fail with `error` until cleared with `None`.
  pub fn fail_all(&self, error: Option<RemoteError>) {
    self.state.lock().unwrap().fail_all = error;
  }

  /// Make creates of one record id fail with a server error.
  pub fn fail_id(&self, id: &str) {
    self.state.lock().unwrap().fail_ids.insert(id.to_string());
  }

  pub fn seed(&self, record_type: RecordType, partition: i32, records: Vec<Record>) {
    self
      .state
      .lock()
      .unwrap()
      .server
      .insert((OWNER.to_string(), record_type, partition), records);
  }

  pub fn server_records(&self, record_type: RecordType, partition: i32) -> Vec<Record> {
    self
      .state
      .lock()
      .unwrap()
      .server
      .get(&(OWNER.to_string(), record_type, partition))
      .cloned()
      .unwrap_or_default()
  }

  /// Hold list calls until permits are added to the returned semaphore.
  pub fn gate_lists(&self) -> Arc<Semaphore> {
    let gate = Arc::new(Semaphore::new(0));
    *self.list_gate.lock().unwrap() = Some(gate.clone());
    gate
  }

  /// Hold successful creates until permits are added to the returned
  /// semaphore.
  pub fn gate_creates(&self) -> Arc<Semaphore> {
    let gate = Arc::new(Semaphore::new(0));
    *self.create_gate.lock().unwrap() = Some(gate.clone());
    gate
  }

  async fn pass_gate(gate: &Mutex<Option<Arc<Semaphore>>>) -> Result<(), RemoteError> {
    let gate = gate.lock().unwrap().clone();
    if let Some(gate) = gate {
      gate
        .acquire()
        .await
        .map_err(|e| RemoteError::Unavailable(e.to_string()))?
        .forget();
    }
    Ok(())
  }

  fn record(&self, call: Call) -> Result<(), RemoteError> {
    let mut state = self.state.lock().unwrap();
    state.calls.push(call);
    match &state.fail_all {
      Some(error) => Err(error.clone()),
      None => Ok(()),
    }
  }
}

#[async_trait]
impl RemoteStore for ScriptedRemote {
  async fn create(
    &self,
    owner: &str,
    record_type: RecordType,
    record: &Record,
  ) -> Result<Record, RemoteError> {
    let id = record.id().unwrap_or_default().to_string();
    self.record(Call::Create(id.clone()))?;
    let failing = self.state.lock().unwrap().fail_ids.contains(&id);
    if failing {
      return Err(RemoteError::Server("500 Internal Server Error: boom".to_string()));
    }
    Self::pass_gate(&self.create_gate).await?;

    let mut state = self.state.lock().unwrap();

    let partition = record
      .partition()
      .map_err(|e| RemoteError::Rejected {
        status: 400,
        body: e.to_string(),
      })?;
    let mut confirmed = record.clone();
    confirmed.insert("ownerId", serde_json::Value::String(owner.to_string()));
    state
      .server
      .entry((owner.to_string(), record_type, partition))
      .or_default()
      .push(confirmed.clone());
    Ok(confirmed)
  }

  async fn list(
    &self,
    owner: &str,
    record_type: RecordType,
    partition: i32,
  ) -> Result<Vec<Record>, RemoteError> {
    self.record(Call::List(record_type, partition))?;
    Self::pass_gate(&self.list_gate).await?;

    Ok(
      self
        .state
        .lock()
        .unwrap()
        .server
        .get(&(owner.to_string(), record_type, partition))
        .cloned()
        .unwrap_or_default(),
    )
  }

  async fn update(
    &self,
    owner: &str,
    record_type: RecordType,
    record: &Record,
  ) -> Result<Record, RemoteError> {
    let id = record.id().unwrap_or_default().to_string();
    self.record(Call::Update(id.clone()))?;

    let mut state = self.state.lock().unwrap();
    for ((o, t, _), records) in state.server.iter_mut() {
      if o == owner && *t == record_type {
        records.retain(|r| r.id() != Some(id.as_str()));
      }
    }
    let partition = record.partition().unwrap_or_default();
    state
      .server
      .entry((owner.to_string(), record_type, partition))
      .or_default()
      .push(record.clone());
    Ok(record.clone())
  }

  async fn delete(&self, owner: &str, record_type: RecordType, id: &str) -> Result<(), RemoteError> {
    self.record(Call::Delete(id.to_string()))?;

    let mut state = self.state.lock().unwrap();
    for ((o, t, _), records) in state.server.iter_mut() {
      if o == owner && *t == record_type {
        records.retain(|r| r.id() != Some(id));
      }
    }
    Ok(())
  }
}

pub fn coordinator_with(
  db: Arc<Database>,
  remote: Arc<ScriptedRemote>,
  initial: Connectivity,
) -> SyncCoordinator {
  SyncCoordinator::new(
    db,
    remote,
    Arc::new(StaticToken::new(Some("token".to_string()))),
    OWNER,
    initial,
  )
}

pub fn coordinator(remote: Arc<ScriptedRemote>, initial: Connectivity) -> SyncCoordinator {
  coordinator_with(
    Arc::new(Database::open_in_memory().unwrap()),
    remote,
    initial,
  )
}
