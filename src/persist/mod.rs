//! Durable persistence collaborator.
//!
//! The engine applies a change in memory first, then hands it to a
//! [`Persistence`] implementation while still holding the resource lock.
//! Any error from here makes the engine undo the in-memory change.

mod memory;
mod wal_store;

pub use memory::MemoryStore;
pub use wal_store::WalStore;

use std::collections::HashMap;
use std::io;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::*;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("WAL writer shut down")]
    WriterClosed,
    #[error("rejected by store: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Persistence: Send + Sync {
    async fn save_resource(&self, resource: &ResourceInfo) -> Result<(), PersistError>;

    async fn rename_resource(&self, id: ResourceId, name: &str) -> Result<(), PersistError>;

    /// All registered resources, in registration order.
    async fn load_resources(&self) -> Result<Vec<ResourceInfo>, PersistError>;

    async fn save_reservation(&self, reservation: &Reservation) -> Result<(), PersistError>;

    /// Reservations of any status whose end is at or after `as_of`, ordered by start.
    async fn load_active_reservations(&self, as_of: Ms) -> Result<Vec<Reservation>, PersistError>;

    async fn update_status(&self, id: ReservationId, status: Status) -> Result<(), PersistError>;

    async fn update_notes(&self, id: ReservationId, notes: &str) -> Result<(), PersistError>;
}

/// Durable state folded from a stream of events.
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    resources: Vec<ResourceInfo>,
    resource_pos: HashMap<ResourceId, usize>,
    reservations: Vec<Reservation>,
    reservation_pos: HashMap<ReservationId, usize>,
}

impl Snapshot {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut snapshot = Self::default();
        for event in events {
            snapshot.apply(event);
        }
        snapshot
    }

    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::ResourceRegistered { id, name } => {
                if let Some(&pos) = self.resource_pos.get(id) {
                    self.resources[pos].name = name.clone();
                } else {
                    self.resource_pos.insert(*id, self.resources.len());
                    self.resources.push(ResourceInfo {
                        id: *id,
                        name: name.clone(),
                    });
                }
            }
            Event::ResourceRenamed { id, name } => match self.resource_pos.get(id) {
                Some(&pos) => self.resources[pos].name = name.clone(),
                None => tracing::debug!("rename for unknown resource {id} skipped"),
            },
            Event::ReservationSaved { reservation } => {
                if let Some(&pos) = self.reservation_pos.get(&reservation.id) {
                    self.reservations[pos] = reservation.clone();
                } else {
                    self.reservation_pos
                        .insert(reservation.id, self.reservations.len());
                    self.reservations.push(reservation.clone());
                }
            }
            Event::StatusUpdated { id, status } => match self.reservation_pos.get(id) {
                Some(&pos) => self.reservations[pos].status = *status,
                None => tracing::debug!("status update for unknown reservation {id} skipped"),
            },
            Event::NotesUpdated { id, notes } => match self.reservation_pos.get(id) {
                Some(&pos) => self.reservations[pos].notes = notes.clone(),
                None => tracing::debug!("notes update for unknown reservation {id} skipped"),
            },
        }
    }

    pub fn resources(&self) -> &[ResourceInfo] {
        &self.resources
    }

    pub fn has_reservation(&self, id: &ReservationId) -> bool {
        self.reservation_pos.contains_key(id)
    }

    pub fn reservations_ending_after(&self, as_of: Ms) -> Vec<Reservation> {
        let mut out: Vec<Reservation> = self
            .reservations
            .iter()
            .filter(|r| r.span.end >= as_of)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.span.start);
        out
    }

    /// Minimal event list that recreates this snapshot.
    pub fn to_events(&self) -> Vec<Event> {
        let resources = self.resources.iter().map(|r| Event::ResourceRegistered {
            id: r.id,
            name: r.name.clone(),
        });
        let reservations = self.reservations.iter().map(|r| Event::ReservationSaved {
            reservation: r.clone(),
        });
        resources.chain(reservations).collect()
    }
}
