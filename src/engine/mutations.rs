use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, validate_span};
use super::{Engine, EngineError};

/// A candidate booking on a known resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub start: Ms,
    pub end: Ms,
    pub holder: String,
    pub notes: String,
    pub priority: Option<Priority>,
}

fn validate_text(holder: &str, notes: &str) -> Result<(), EngineError> {
    if holder.len() > MAX_HOLDER_LEN {
        return Err(EngineError::LimitExceeded("holder too long"));
    }
    if notes.len() > MAX_NOTES_LEN {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

impl Engine {
    pub async fn register_resource(&self, name: &str) -> Result<ResourceId, EngineError> {
        let mut registry = self.registry.write().await;
        let info = registry.prepare(name)?;
        let id = info.id;
        registry.insert(info.clone())?;

        if let Err(e) = self.store.save_resource(&info).await {
            registry.remove_last(id);
            metrics::counter!(observability::ROLLBACKS_TOTAL).increment(1);
            return Err(e.into());
        }

        self.state
            .insert(id, Arc::new(RwLock::new(ResourceState::new(id))));
        metrics::gauge!(observability::RESOURCES_REGISTERED).set(self.state.len() as f64);
        self.notify.send(
            id,
            &Event::ResourceRegistered {
                id,
                name: info.name.clone(),
            },
        );
        info!("registered resource {:?} as {id}", info.name);
        Ok(id)
    }

    pub async fn rename_resource(&self, id: ResourceId, new_name: &str) -> Result<(), EngineError> {
        let mut registry = self.registry.write().await;
        let old = registry.rename(id, new_name)?;
        if old == new_name {
            return Ok(());
        }

        if let Err(e) = self.store.rename_resource(id, new_name).await {
            // Restoring the previous name cannot collide: the registry lock is still held.
            let _ = registry.rename(id, &old);
            metrics::counter!(observability::ROLLBACKS_TOTAL).increment(1);
            return Err(e.into());
        }

        self.notify.send(
            id,
            &Event::ResourceRenamed {
                id,
                name: new_name.to_string(),
            },
        );
        info!("renamed resource {id} from {old:?} to {new_name:?}");
        Ok(())
    }

    /// Admit a reservation if its span is free on `resource_id`.
    pub async fn propose(
        &self,
        resource_id: ResourceId,
        proposal: Proposal,
    ) -> Result<ReservationId, EngineError> {
        let result = self.propose_inner(resource_id, proposal).await;
        metrics::counter!(
            observability::PROPOSALS_TOTAL,
            "outcome" => observability::outcome_label(&result)
        )
        .increment(1);
        result
    }

    async fn propose_inner(
        &self,
        resource_id: ResourceId,
        proposal: Proposal,
    ) -> Result<ReservationId, EngineError> {
        let span = validate_span(proposal.start, proposal.end)?;
        validate_text(&proposal.holder, &proposal.notes)?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or_else(|| EngineError::UnknownResource(resource_id.to_string()))?;
        let mut guard = rs.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many reservations on resource"));
        }

        check_no_conflict(&guard, &span)?;

        let reservation = Reservation {
            id: Ulid::new(),
            resource_id,
            span,
            holder: proposal.holder,
            notes: proposal.notes,
            status: Status::Confirmed,
            priority: proposal.priority,
        };
        let id = reservation.id;
        self.apply_and_persist(&mut guard, Event::ReservationSaved { reservation })
            .await?;
        debug!("reservation {id} admitted on {resource_id} [{}, {})", span.start, span.end);
        Ok(id)
    }

    /// Confirmed → Cancelled. Cancelling twice is an error, not a no-op.
    pub async fn cancel(&self, id: ReservationId) -> Result<ResourceId, EngineError> {
        let result = self.cancel_inner(id).await;
        metrics::counter!(
            observability::CANCELLATIONS_TOTAL,
            "outcome" => observability::outcome_label(&result)
        )
        .increment(1);
        result
    }

    async fn cancel_inner(&self, id: ReservationId) -> Result<ResourceId, EngineError> {
        let mut guard = self.resolve_reservation_write(&id).await?;
        let current = guard.get(id).ok_or(EngineError::NotFound(id))?.status;
        let status = current.cancelled().ok_or(EngineError::AlreadyCancelled(id))?;
        self.apply_and_persist(&mut guard, Event::StatusUpdated { id, status })
            .await?;
        debug!("reservation {id} cancelled");
        Ok(guard.id)
    }

    pub async fn update_notes(&self, id: ReservationId, notes: &str) -> Result<(), EngineError> {
        validate_text("", notes)?;
        let mut guard = self.resolve_reservation_write(&id).await?;
        self.apply_and_persist(
            &mut guard,
            Event::NotesUpdated {
                id,
                notes: notes.to_string(),
            },
        )
        .await
    }
}
