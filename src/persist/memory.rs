use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::model::*;

use super::{PersistError, Persistence, Snapshot};

/// Volatile store. Keeps the same event fold as the WAL store so both
/// answer loads identically. `fail_next` makes upcoming writes fail.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<Snapshot>,
    failures_pending: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` write calls with [`PersistError::Rejected`].
    pub fn fail_next(&self, n: usize) {
        self.failures_pending.store(n, Ordering::SeqCst);
    }

    fn take_failure(&self) -> Result<(), PersistError> {
        let took = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took {
            return Err(PersistError::Rejected("injected failure".into()));
        }
        Ok(())
    }

    async fn record(&self, event: Event) -> Result<(), PersistError> {
        self.take_failure()?;
        self.snapshot.lock().await.apply(&event);
        Ok(())
    }

    async fn record_for_reservation(&self, id: ReservationId, event: Event) -> Result<(), PersistError> {
        self.take_failure()?;
        let mut snapshot = self.snapshot.lock().await;
        if !snapshot.has_reservation(&id) {
            return Err(PersistError::Rejected(format!("unknown reservation {id}")));
        }
        snapshot.apply(&event);
        Ok(())
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn save_resource(&self, resource: &ResourceInfo) -> Result<(), PersistError> {
        self.record(Event::ResourceRegistered {
            id: resource.id,
            name: resource.name.clone(),
        })
        .await
    }

    async fn rename_resource(&self, id: ResourceId, name: &str) -> Result<(), PersistError> {
        self.record(Event::ResourceRenamed {
            id,
            name: name.to_string(),
        })
        .await
    }

    async fn load_resources(&self) -> Result<Vec<ResourceInfo>, PersistError> {
        Ok(self.snapshot.lock().await.resources().to_vec())
    }

    async fn save_reservation(&self, reservation: &Reservation) -> Result<(), PersistError> {
        self.record(Event::ReservationSaved {
            reservation: reservation.clone(),
        })
        .await
    }

    async fn load_active_reservations(&self, as_of: Ms) -> Result<Vec<Reservation>, PersistError> {
        Ok(self.snapshot.lock().await.reservations_ending_after(as_of))
    }

    async fn update_status(&self, id: ReservationId, status: Status) -> Result<(), PersistError> {
        self.record_for_reservation(id, Event::StatusUpdated { id, status })
            .await
    }

    async fn update_notes(&self, id: ReservationId, notes: &str) -> Result<(), PersistError> {
        self.record_for_reservation(
            id,
            Event::NotesUpdated {
                id,
                notes: notes.to_string(),
            },
        )
        .await
    }
}
