//! Name-level entry point for transport and presentation layers.
//!
//! [`Scheduler`] turns space names into resource ids, applies the configured
//! day zone to calendar queries and forwards everything else to [`Engine`].

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::calendar::DayZone;
use crate::compactor;
use crate::config::Config;
use crate::engine::{Engine, EngineError, Proposal, now_ms};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::persist::{PersistError, WalStore};

/// A booking request as received from a caller: the space is named, not
/// identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub space: String,
    pub start: Ms,
    pub end: Ms,
    pub holder: String,
    pub notes: String,
    pub priority: Option<Priority>,
}

pub struct Scheduler {
    engine: Arc<Engine>,
    zone: DayZone,
    compactor: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(engine: Arc<Engine>, zone: DayZone) -> Self {
        Self {
            engine,
            zone,
            compactor: None,
        }
    }

    /// Open the WAL under `config.data_dir`, reload everything still
    /// relevant at the current time, and start the compactor.
    pub async fn open(config: &Config) -> Result<Self, EngineError> {
        std::fs::create_dir_all(&config.data_dir).map_err(PersistError::from)?;
        let store = Arc::new(WalStore::open(&config.wal_path()).map_err(PersistError::from)?);
        let notify = Arc::new(NotifyHub::new());
        let engine = Engine::load(store.clone(), notify, now_ms()).await?;

        let compactor = (config.compact_threshold > 0).then(|| {
            tokio::spawn(compactor::run_compactor(
                store,
                config.compact_threshold,
                config.compact_interval,
            ))
        });
        info!("scheduler ready, data_dir: {}", config.data_dir.display());

        Ok(Self {
            engine: Arc::new(engine),
            zone: config.day_zone,
            compactor,
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn zone(&self) -> DayZone {
        self.zone
    }

    // ── Spaces ───────────────────────────────────────────────

    pub async fn add_space(&self, name: &str) -> Result<ResourceId, EngineError> {
        self.engine.register_resource(name).await
    }

    pub async fn rename_space(&self, current: &str, new_name: &str) -> Result<(), EngineError> {
        let id = self.engine.resolve(current).await?;
        self.engine.rename_resource(id, new_name).await
    }

    pub async fn spaces(&self) -> Vec<ResourceInfo> {
        self.engine.list_resources().await
    }

    /// Each space with its number of Confirmed reservations.
    pub async fn space_usage(&self) -> Vec<(ResourceInfo, usize)> {
        self.engine.reservation_counts().await
    }

    pub async fn subscribe(&self, space: &str) -> Result<broadcast::Receiver<Event>, EngineError> {
        let id = self.engine.resolve(space).await?;
        Ok(self.engine.notify.subscribe(id))
    }

    // ── Bookings ─────────────────────────────────────────────

    pub async fn propose_booking(&self, request: BookingRequest) -> Result<ReservationId, EngineError> {
        let resource_id = self.engine.resolve(&request.space).await?;
        self.engine
            .propose(
                resource_id,
                Proposal {
                    start: request.start,
                    end: request.end,
                    holder: request.holder,
                    notes: request.notes,
                    priority: request.priority,
                },
            )
            .await
    }

    pub async fn cancel_booking(&self, id: ReservationId) -> Result<(), EngineError> {
        self.engine.cancel(id).await.map(|_| ())
    }

    pub async fn update_notes(&self, id: ReservationId, notes: &str) -> Result<(), EngineError> {
        self.engine.update_notes(id, notes).await
    }

    pub async fn booking(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        self.engine.get_reservation(id).await
    }

    /// Confirmed bookings of one space, start ascending.
    pub async fn bookings_for(&self, space: &str) -> Result<Vec<Reservation>, EngineError> {
        let id = self.engine.resolve(space).await?;
        self.engine.list_active(id).await
    }

    /// Every booking including cancelled ones.
    pub async fn history(&self) -> Vec<Reservation> {
        self.engine.list_all().await
    }

    /// Bookings not yet over whose holder or notes contain `term`.
    pub async fn search(&self, term: &str) -> Result<Vec<Reservation>, EngineError> {
        self.engine.search(term, now_ms()).await
    }

    // ── Calendar ─────────────────────────────────────────────

    pub async fn query_day(&self, date: NaiveDate) -> Result<bool, EngineError> {
        self.engine.has_reservation_on(date, &self.zone).await
    }

    pub async fn query_day_in(&self, date: NaiveDate, zone: &DayZone) -> Result<bool, EngineError> {
        self.engine.has_reservation_on(date, zone).await
    }

    pub async fn month_overview(&self, year: i32, month: u32) -> Result<BTreeSet<u32>, EngineError> {
        self.engine.days_with_reservations(year, month, &self.zone).await
    }

    pub async fn bookings_in_range(&self, start: Ms, end: Ms) -> Result<Vec<Reservation>, EngineError> {
        self.engine.bookings_in_range(start, end).await
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(task) = self.compactor.take() {
            task.abort();
        }
    }
}
