use crate::auth::StaticToken;
use crate::cache::{CacheSource, Snapshot};
use crate::commands::{self, Command};
use crate::config::Config;
use crate::db::Database;
use crate::finance::{Donation, Expense, HttpRemoteStore, Record, RecordType};
use crate::queue::QueuedMutation;
use crate::sync::{self, AddOutcome, Connectivity, ConnectivitySignal, SyncCoordinator};
use chrono::{Datelike, Local};
use color_eyre::{eyre::eyre, Result};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How often the API host is re-probed to follow connectivity changes
const PROBE_INTERVAL: Duration = Duration::from_secs(15);

/// Host application: owns the connectivity signal and runs one command
/// against the coordinator.
pub struct App {
  coordinator: SyncCoordinator,

  /// Re-probes the API and feeds the connectivity signal; absent when
  /// started with `--offline`
  monitor: Option<JoinHandle<()>>,

  listener: JoinHandle<()>,

  /// Partition override from `--year`
  year: Option<i32>,
}

impl App {
  pub async fn new(config: Config, force_offline: bool, year: Option<i32>) -> Result<Self> {
    let data_dir = config.data_dir()?;
    let db = Arc::new(Database::open(&data_dir)?);

    let credentials = Arc::new(StaticToken::new(Config::get_api_token()));
    let remote = Arc::new(HttpRemoteStore::new(
      &config.api.url,
      config.api.timeout(),
      credentials.clone(),
    )?);

    let initial = if force_offline {
      Connectivity::Offline
    } else {
      Connectivity::from_online(remote.probe().await)
    };
    info!(state = %initial, url = %config.api.url, "Starting");

    let coordinator = SyncCoordinator::new(
      db,
      remote.clone(),
      credentials,
      config.api.owner.clone(),
      initial,
    );
    let (signal, rx) = sync::channel(initial);
    let listener = coordinator.spawn_listener(rx);
    let monitor = if force_offline {
      // Forced offline: no transitions will ever be reported
      drop(signal);
      None
    } else {
      Some(spawn_monitor(remote, signal, PROBE_INTERVAL))
    };

    Ok(Self {
      coordinator,
      monitor,
      listener,
      year,
    })
  }

  pub async fn run(self, command: Command) -> Result<()> {
    let result = match self.catch_up(&command).await {
      Ok(()) => self.execute(command).await,
      Err(e) => Err(e),
    };

    // Stopping the monitor drops the signal, which ends the listener
    if let Some(monitor) = self.monitor {
      monitor.abort();
    }
    if let Err(e) = self.listener.await {
      warn!(error = %e, "Connectivity listener ended abnormally");
    }
    result
  }

  /// Send writes queued by an earlier offline run. Starting online is not a
  /// transition, so the listener would never trigger this drain.
  async fn catch_up(&self, command: &Command) -> Result<()> {
    if *command == Command::Sync {
      return Ok(());
    }
    if let Some(report) = self.coordinator.drain_if_pending().await? {
      if report.synced > 0 {
        println!("Sent {} change(s) queued while offline", report.synced);
      }
    }
    Ok(())
  }

  async fn execute(&self, command: Command) -> Result<()> {
    match command {
      Command::List { record_type } => self.list(record_type).await,
      Command::Add(add) => {
        let today = Local::now().date_naive();
        let (kind, payload) = add.into_mutation(today, self.year)?;
        match self.coordinator.add_record(kind, payload).await? {
          AddOutcome::Confirmed(record) => {
            println!("Saved {} {}", kind.record_type(), record.id().unwrap_or_default())
          }
          AddOutcome::Queued(record) => println!(
            "Queued {} {}; it will be sent when the connection returns",
            kind.record_type(),
            record.id().unwrap_or_default()
          ),
        }
        Ok(())
      }
      Command::Update { record_type, json } => {
        let record = commands::parse_record(&json)?;
        let updated = self.coordinator.update_record(record_type, record).await?;
        println!("Updated {} {}", record_type, updated.id().unwrap_or_default());
        Ok(())
      }
      Command::Delete { record_type, id } => {
        self.coordinator.delete_record(record_type, &id).await?;
        println!("Deleted {} {}", record_type, id);
        Ok(())
      }
      Command::Pending => {
        let pending = self.coordinator.pending()?;
        if pending.is_empty() {
          println!("No pending changes");
        }
        for mutation in &pending {
          println!("{}", format_pending(mutation));
        }
        Ok(())
      }
      Command::Sync => {
        if !self.coordinator.connectivity().is_online() {
          return Err(eyre!(
            "Offline: {} change(s) stay queued",
            self.coordinator.pending_count()?
          ));
        }
        let report = self.coordinator.drain().await?;
        println!(
          "Synced {} change(s), {} failed, {} list(s) refreshed",
          report.synced, report.failed, report.refreshed
        );
        Ok(())
      }
    }
  }

  async fn list(&self, record_type: RecordType) -> Result<()> {
    let year = self.year.unwrap_or_else(|| Local::now().year());
    let scope = self.coordinator.scope(record_type, year);
    let mut snapshots = self.coordinator.fetch_records(scope);

    // The cached list comes first; only print the network list if it differs
    let mut shown: Option<Vec<Record>> = None;
    while let Some(snapshot) = snapshots.next().await {
      let snapshot = snapshot?;
      if snapshot.source == CacheSource::Network && shown == snapshot.records {
        continue;
      }
      println!("{}", format_header(&snapshot));
      for record in snapshot.records.iter().flatten() {
        println!("  {}", format_record(record_type, record));
      }
      shown = snapshot.records;
    }
    Ok(())
  }
}

/// Re-probe the API host periodically and report the result to the signal.
fn spawn_monitor(
  remote: Arc<HttpRemoteStore>,
  signal: ConnectivitySignal,
  every: Duration,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(every);
    // The first tick fires at once and startup already probed
    ticker.tick().await;
    loop {
      ticker.tick().await;
      let state = Connectivity::from_online(remote.probe().await);
      debug!(state = %state, "Connectivity probe");
      signal.set(state);
    }
  })
}

fn format_header(snapshot: &Snapshot) -> String {
  let age = snapshot.age_display().unwrap_or_else(|| "never".to_string());

  match snapshot.source {
    CacheSource::Network => format!("{} ({} records)", snapshot.scope, snapshot.len()),
    CacheSource::Cache => format!("{} (cached {}, refreshing)", snapshot.scope, age),
    CacheSource::Stale => format!("{} (server unreachable, cached {})", snapshot.scope, age),
    CacheSource::Offline if snapshot.records.is_none() => {
      format!("{} (offline, nothing cached)", snapshot.scope)
    }
    CacheSource::Offline => format!("{} (offline, cached {})", snapshot.scope, age),
  }
}

fn format_record(record_type: RecordType, record: &Record) -> String {
  let id = record.id().unwrap_or("-");
  match record_type {
    RecordType::Donation => match record.decode::<Donation>() {
      Ok(d) => format!(
        "{} {} {:<20} pledged {:>10.2} paid {:>10.2} outstanding {:>10.2}",
        id,
        d.date,
        d.donor_name,
        d.pledged_amount,
        d.paid_amount,
        d.outstanding()
      ),
      Err(_) => format!("{} {}", id, record.clone().into_value()),
    },
    RecordType::Expense => match record.decode::<Expense>() {
      Ok(e) => format!(
        "{} {} {:<20} {:>10.2} [{}]",
        id, e.date, e.description, e.amount, e.category
      ),
      Err(_) => format!("{} {}", id, record.clone().into_value()),
    },
  }
}

fn format_pending(mutation: &QueuedMutation) -> String {
  format!(
    "{} {} {} {}",
    mutation.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
    mutation.kind.as_str(),
    mutation.id,
    mutation.payload.clone().into_value()
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::ScopeKey;
  use serde_json::json;

  fn record(value: serde_json::Value) -> Record {
    Record::from_value(value).unwrap()
  }

  #[test]
  fn test_format_donation_shows_outstanding() {
    let line = format_record(
      RecordType::Donation,
      &record(json!({
        "id": "a1",
        "donorName": "Ali",
        "pledgedAmount": 100,
        "paidAmount": 40,
        "date": "2026-03-01",
        "year": 2026
      })),
    );
    assert!(line.starts_with("a1 2026-03-01 Ali"));
    assert!(line.contains("outstanding      60.00"));
  }

  #[test]
  fn test_format_falls_back_to_raw_json() {
    let line = format_record(RecordType::Expense, &record(json!({"id": "e1", "year": 2026})));
    assert!(line.starts_with("e1 {"));
  }

  #[tokio::test]
  async fn test_monitor_reports_unreachable_host() {
    let remote = Arc::new(
      HttpRemoteStore::new(
        "http://127.0.0.1:1/api",
        Duration::from_secs(1),
        Arc::new(StaticToken::default()),
      )
      .unwrap(),
    );
    let (signal, mut rx) = sync::channel(Connectivity::Online);
    let monitor = spawn_monitor(remote, signal, Duration::from_millis(10));

    tokio::time::timeout(Duration::from_secs(10), rx.changed())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(*rx.borrow(), Connectivity::Offline);

    monitor.abort();
    assert!(rx.changed().await.is_err());
  }

  #[test]
  fn test_offline_header_without_cache() {
    let scope = ScopeKey::new("o", 2026, RecordType::Donation);
    let snapshot = Snapshot::new(scope, None, CacheSource::Offline);
    assert!(format_header(&snapshot).ends_with("(offline, nothing cached)"));
  }
}
