mod conflict;
mod error;
mod mutations;
mod queries;
mod registry;

pub use conflict::{conflicts, find_conflict, now_ms};
pub use error::EngineError;
pub use mutations::Proposal;
pub use registry::Registry;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::persist::Persistence;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

/// Reservation store and resource registry for one scheduling session.
///
/// Each resource's reservations sit behind their own `RwLock`: proposals,
/// cancellations and note edits hold the write lock from conflict check
/// through persistence, so check-then-insert is atomic per resource while
/// different resources proceed in parallel.
pub struct Engine {
    pub(super) state: DashMap<ResourceId, SharedResourceState>,
    pub(super) registry: RwLock<Registry>,
    /// Reverse lookup: reservation id → resource id
    pub(super) reservation_to_resource: DashMap<ReservationId, ResourceId>,
    pub(super) store: Arc<dyn Persistence>,
    pub notify: Arc<NotifyHub>,
}

/// How to take back an applied event if persisting it fails.
enum Undo {
    Remove(ReservationId),
    Restore(Event),
}

/// Apply a reservation event to a ResourceState. The caller holds its lock.
fn apply_to_resource(
    rs: &mut ResourceState,
    event: &Event,
    index: &DashMap<ReservationId, ResourceId>,
) {
    match event {
        Event::ReservationSaved { reservation } => {
            index.insert(reservation.id, rs.id);
            rs.insert_reservation(reservation.clone());
        }
        Event::StatusUpdated { id, status } => {
            if let Some(r) = rs.get_mut(*id) {
                r.status = *status;
            }
        }
        Event::NotesUpdated { id, notes } => {
            if let Some(r) = rs.get_mut(*id) {
                r.notes = notes.clone();
            }
        }
        // Registry events never reach a single resource's state.
        Event::ResourceRegistered { .. } | Event::ResourceRenamed { .. } => {}
    }
}

fn undo_for(rs: &ResourceState, event: &Event) -> Option<Undo> {
    match event {
        Event::ReservationSaved { reservation } => Some(Undo::Remove(reservation.id)),
        Event::StatusUpdated { id, .. } => rs.get(*id).map(|r| {
            Undo::Restore(Event::StatusUpdated {
                id: *id,
                status: r.status,
            })
        }),
        Event::NotesUpdated { id, .. } => rs.get(*id).map(|r| {
            Undo::Restore(Event::NotesUpdated {
                id: *id,
                notes: r.notes.clone(),
            })
        }),
        Event::ResourceRegistered { .. } | Event::ResourceRenamed { .. } => None,
    }
}

impl Engine {
    /// Empty engine over `store`. Nothing is loaded.
    pub fn new(store: Arc<dyn Persistence>, notify: Arc<NotifyHub>) -> Self {
        Self {
            state: DashMap::new(),
            registry: RwLock::new(Registry::new()),
            reservation_to_resource: DashMap::new(),
            store,
            notify,
        }
    }

    /// Rebuild an engine from the store: every registered resource, plus the
    /// reservations whose end is at or after `as_of`.
    pub async fn load(
        store: Arc<dyn Persistence>,
        notify: Arc<NotifyHub>,
        as_of: Ms,
    ) -> Result<Self, EngineError> {
        let engine = Self::new(store, notify);
        let resources = engine.store.load_resources().await?;
        let reservations = engine.store.load_active_reservations(as_of).await?;

        {
            let mut registry = engine.registry.write().await;
            for info in resources {
                let id = info.id;
                if let Err(e) = registry.insert(info) {
                    warn!("skipping resource {id} on load: {e}");
                    continue;
                }
                engine
                    .state
                    .insert(id, Arc::new(RwLock::new(ResourceState::new(id))));
            }
        }

        let mut loaded = 0usize;
        for reservation in reservations {
            let Some(entry) = engine.state.get(&reservation.resource_id) else {
                warn!(
                    "skipping reservation {} for unknown resource {}",
                    reservation.id, reservation.resource_id
                );
                continue;
            };
            // Sole owner during load: the lock is uncontended.
            let rs_arc = entry.clone();
            drop(entry);
            let mut guard = rs_arc.write().await;
            apply_to_resource(
                &mut guard,
                &Event::ReservationSaved { reservation },
                &engine.reservation_to_resource,
            );
            loaded += 1;
        }

        metrics::gauge!(observability::RESOURCES_REGISTERED).set(engine.state.len() as f64);
        info!(
            "loaded {} resources and {loaded} reservations",
            engine.state.len()
        );
        Ok(engine)
    }

    pub fn get_resource(&self, id: &ResourceId) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_resource_for_reservation(&self, id: &ReservationId) -> Option<ResourceId> {
        self.reservation_to_resource.get(id).map(|e| *e.value())
    }

    async fn persist(&self, event: &Event) -> Result<(), EngineError> {
        match event {
            Event::ReservationSaved { reservation } => self.store.save_reservation(reservation).await?,
            Event::StatusUpdated { id, status } => self.store.update_status(*id, *status).await?,
            Event::NotesUpdated { id, notes } => self.store.update_notes(*id, notes).await?,
            Event::ResourceRegistered { id, name } => {
                self.store
                    .save_resource(&ResourceInfo {
                        id: *id,
                        name: name.clone(),
                    })
                    .await?
            }
            Event::ResourceRenamed { id, name } => self.store.rename_resource(*id, name).await?,
        }
        Ok(())
    }

    /// Apply + persist + notify in one call. A persistence failure undoes the
    /// in-memory change before the caller's lock is released.
    pub(super) async fn apply_and_persist(
        &self,
        rs: &mut ResourceState,
        event: Event,
    ) -> Result<(), EngineError> {
        let undo = undo_for(rs, &event);
        apply_to_resource(rs, &event, &self.reservation_to_resource);

        if let Err(e) = self.persist(&event).await {
            match undo {
                Some(Undo::Remove(id)) => {
                    rs.remove_reservation(id);
                    self.reservation_to_resource.remove(&id);
                }
                Some(Undo::Restore(previous)) => {
                    apply_to_resource(rs, &previous, &self.reservation_to_resource);
                }
                None => {}
            }
            metrics::counter!(observability::ROLLBACKS_TOTAL).increment(1);
            warn!("rolled back change on resource {}: {e}", rs.id);
            return Err(e);
        }

        self.notify.send(rs.id, &event);
        Ok(())
    }

    /// Lookup reservation → resource, get resource, acquire write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        id: &ReservationId,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<ResourceState>, EngineError> {
        let resource_id = self
            .get_resource_for_reservation(id)
            .ok_or(EngineError::NotFound(*id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(*id))?;
        let guard = rs.write_owned().await;
        if guard.get(*id).is_none() {
            return Err(EngineError::NotFound(*id));
        }
        Ok(guard)
    }

    /// Resource states in registration order.
    pub(super) async fn ordered_states(&self) -> Vec<SharedResourceState> {
        let registry = self.registry.read().await;
        registry
            .ids()
            .filter_map(|id| self.get_resource(&id))
            .collect()
    }
}
