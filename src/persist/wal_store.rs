use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::model::*;
use crate::observability;
use crate::wal::Wal;

use super::{PersistError, Persistence, Snapshot};

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Load {
        response: oneshot::Sender<io::Result<Snapshot>>,
    },
    Compact {
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the batch result. A failed batch is
///    discarded whole, so it never reappears on replay.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
    tracing::debug!("WAL writer for {} stopped", wal.path().display());
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::warn!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let result = append_and_sync(wal, batch);
    if result.is_err() {
        // Every sender hears the batch failed, so none of it may stay on disk.
        if let Err(e) = wal.discard_unsynced() {
            tracing::error!("WAL {}: could not discard failed batch: {e}", wal.path().display());
        }
    }
    result
}

fn append_and_sync(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    for (event, _) in batch {
        wal.append_buffered(event)?;
    }
    wal.flush_sync()
}

fn load_snapshot(wal: &mut Wal) -> io::Result<Snapshot> {
    wal.flush_sync()?;
    let events = Wal::replay(wal.path())?;
    Ok(Snapshot::from_events(&events))
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Load { response } => {
            let _ = response.send(load_snapshot(wal));
        }
        WalCommand::Compact { response } => {
            let result = load_snapshot(wal).and_then(|snapshot| wal.compact(&snapshot.to_events()));
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// File-backed persistence: every change becomes one WAL record.
/// Loads fold the whole log, so the latest record for an id wins.
pub struct WalStore {
    wal_tx: mpsc::Sender<WalCommand>,
    path: PathBuf,
}

impl WalStore {
    /// Open (or create) the log at `path` and start its writer task.
    /// Must be called from within a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));
        tracing::info!("WAL opened at {}", path.display());
        Ok(Self {
            wal_tx,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> WalCommand,
    ) -> Result<T, PersistError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(make(tx))
            .await
            .map_err(|_| PersistError::WriterClosed)?;
        rx.await.map_err(|_| PersistError::WriterClosed)
    }

    async fn append(&self, event: Event) -> Result<(), PersistError> {
        self.request(|response| WalCommand::Append { event, response })
            .await?
            .map_err(PersistError::from)
    }

    async fn load(&self) -> Result<Snapshot, PersistError> {
        self.request(|response| WalCommand::Load { response })
            .await?
            .map_err(PersistError::from)
    }

    /// Rewrite the log with only the records needed to recreate the current state.
    pub async fn compact(&self) -> Result<(), PersistError> {
        self.request(|response| WalCommand::Compact { response })
            .await?
            .map_err(PersistError::from)
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.request(|response| WalCommand::AppendsSinceCompact { response })
            .await
            .unwrap_or(0)
    }
}

#[async_trait]
impl Persistence for WalStore {
    async fn save_resource(&self, resource: &ResourceInfo) -> Result<(), PersistError> {
        self.append(Event::ResourceRegistered {
            id: resource.id,
            name: resource.name.clone(),
        })
        .await
    }

    async fn rename_resource(&self, id: ResourceId, name: &str) -> Result<(), PersistError> {
        self.append(Event::ResourceRenamed {
            id,
            name: name.to_string(),
        })
        .await
    }

    async fn load_resources(&self) -> Result<Vec<ResourceInfo>, PersistError> {
        Ok(self.load().await?.resources().to_vec())
    }

    async fn save_reservation(&self, reservation: &Reservation) -> Result<(), PersistError> {
        self.append(Event::ReservationSaved {
            reservation: reservation.clone(),
        })
        .await
    }

    async fn load_active_reservations(&self, as_of: Ms) -> Result<Vec<Reservation>, PersistError> {
        Ok(self.load().await?.reservations_ending_after(as_of))
    }

    async fn update_status(&self, id: ReservationId, status: Status) -> Result<(), PersistError> {
        self.append(Event::StatusUpdated { id, status }).await
    }

    async fn update_notes(&self, id: ReservationId, notes: &str) -> Result<(), PersistError> {
        self.append(Event::NotesUpdated {
            id,
            notes: notes.to_string(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("spacebook_test_wal_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn reservation(resource_id: ResourceId, start: Ms, end: Ms) -> Reservation {
        Reservation {
            id: Ulid::new(),
            resource_id,
            span: Span::new(start, end),
            holder: "dave".into(),
            notes: String::new(),
            status: Status::Confirmed,
            priority: None,
        }
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let path = test_wal_path("reopen.wal");
        let rid = Ulid::new();
        let r = reservation(rid, 1000, 2000);
        {
            let store = WalStore::open(&path).unwrap();
            store
                .save_resource(&ResourceInfo { id: rid, name: "Room C".into() })
                .await
                .unwrap();
            store.save_reservation(&r).await.unwrap();
            store.update_notes(r.id, "bring keys").await.unwrap();
        }

        let store = WalStore::open(&path).unwrap();
        let resources = store.load_resources().await.unwrap();
        assert_eq!(resources, vec![ResourceInfo { id: rid, name: "Room C".into() }]);
        let loaded = store.load_active_reservations(0).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].notes, "bring keys");
    }

    #[tokio::test]
    async fn concurrent_appends_all_land() {
        let path = test_wal_path("concurrent.wal");
        let store = std::sync::Arc::new(WalStore::open(&path).unwrap());
        let rid = Ulid::new();

        let mut handles = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.save_reservation(&reservation(rid, i * 10, i * 10 + 5)).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(store.load_active_reservations(0).await.unwrap().len(), 50);
        assert_eq!(store.appends_since_compact().await, 50);
    }

    #[tokio::test]
    async fn compact_keeps_state_and_resets_counter() {
        let path = test_wal_path("compact.wal");
        let store = WalStore::open(&path).unwrap();
        let rid = Ulid::new();
        let r = reservation(rid, 1000, 2000);
        store
            .save_resource(&ResourceInfo { id: rid, name: "Room A".into() })
            .await
            .unwrap();
        store.save_reservation(&r).await.unwrap();
        for i in 0..20 {
            store.update_notes(r.id, &format!("rev {i}")).await.unwrap();
        }
        store.update_status(r.id, Status::Cancelled).await.unwrap();

        let before = std::fs::metadata(&path).unwrap().len();
        store.compact().await.unwrap();
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before);
        assert_eq!(store.appends_since_compact().await, 0);

        let loaded = store.load_active_reservations(0).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].notes, "rev 19");
        assert_eq!(loaded[0].status, Status::Cancelled);
        assert_eq!(Wal::replay(&path).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn load_filters_by_end() {
        let path = test_wal_path("as_of.wal");
        let store = WalStore::open(&path).unwrap();
        let rid = Ulid::new();
        store.save_reservation(&reservation(rid, 0, 100)).await.unwrap();
        store.save_reservation(&reservation(rid, 100, 200)).await.unwrap();

        let loaded = store.load_active_reservations(150).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].span, Span::new(100, 200));
    }

    #[test]
    fn failed_batch_is_discarded_whole() {
        let path = test_wal_path("failed_batch.wal");
        let rid = Ulid::new();
        let registered = Event::ResourceRegistered { id: rid, name: "Room A".into() };
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&registered).unwrap();

        let (mut batch, mut receivers): (Vec<_>, Vec<_>) = (0..5i64)
            .map(|i| {
                let (tx, rx) = oneshot::channel();
                let event = Event::ReservationSaved {
                    reservation: reservation(rid, i * 10, i * 10 + 5),
                };
                ((event, tx), rx)
            })
            .unzip();
        // Third record of the batch.
        wal.fail_append_at(3);
        commit_batch(&mut wal, &mut batch);

        for rx in &mut receivers {
            assert!(rx.try_recv().unwrap().is_err());
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![registered.clone()]);
        assert_eq!(wal.appends_since_compact(), 1);

        let renamed = Event::ResourceRenamed { id: rid, name: "Room B".into() };
        wal.append(&renamed).unwrap();
        drop(wal);
        assert_eq!(Wal::replay(&path).unwrap(), vec![registered, renamed]);
    }

    #[tokio::test]
    async fn reopen_counts_inherited_records() {
        let path = test_wal_path("inherited.wal");
        {
            let store = WalStore::open(&path).unwrap();
            for i in 0..4 {
                store.save_reservation(&reservation(Ulid::new(), i, i + 1)).await.unwrap();
            }
        }

        let store = WalStore::open(&path).unwrap();
        assert_eq!(store.appends_since_compact().await, 4);
    }
}
