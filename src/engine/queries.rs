use std::collections::BTreeSet;

use chrono::NaiveDate;
use tokio::sync::OwnedRwLockReadGuard;

use crate::calendar::{self, DayZone};
use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn resolve(&self, name: &str) -> Result<ResourceId, EngineError> {
        self.registry.read().await.resolve(name)
    }

    pub async fn resource_name(&self, id: &ResourceId) -> Option<String> {
        self.registry.read().await.name_of(id).map(str::to_string)
    }

    /// Registered resources in registration order.
    pub async fn list_resources(&self) -> Vec<ResourceInfo> {
        self.registry.read().await.list()
    }

    /// Read guards over every resource, taken together so a multi-resource
    /// query sees one consistent state.
    async fn read_all(&self) -> Vec<OwnedRwLockReadGuard<ResourceState>> {
        let mut guards = Vec::new();
        for rs in self.ordered_states().await {
            guards.push(rs.read_owned().await);
        }
        guards
    }

    /// Confirmed reservations of one resource, start ascending, ties in insertion order.
    pub async fn list_active(&self, resource_id: ResourceId) -> Result<Vec<Reservation>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or_else(|| EngineError::UnknownResource(resource_id.to_string()))?;
        let guard = rs.read().await;
        Ok(guard.active().cloned().collect())
    }

    /// Every reservation including Cancelled ones, grouped by resource in
    /// registration order.
    pub async fn list_all(&self) -> Vec<Reservation> {
        self.read_all()
            .await
            .iter()
            .flat_map(|g| g.reservations.iter().cloned())
            .collect()
    }

    pub async fn get_reservation(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        let resource_id = self
            .get_resource_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self.get_resource(&resource_id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// True iff a Confirmed reservation on any resource starts on `date` in `zone`.
    pub async fn has_reservation_on(&self, date: NaiveDate, zone: &DayZone) -> Result<bool, EngineError> {
        let window = zone
            .day_window(date)
            .ok_or(EngineError::Validation("date outside representable range"))?;
        let guards = self.read_all().await;
        Ok(calendar::any_start_in(guards.iter().map(|g| &**g), &window))
    }

    /// Confirmed reservations intersecting `[start, end)`, ordered by start.
    pub async fn bookings_in_range(&self, start: Ms, end: Ms) -> Result<Vec<Reservation>, EngineError> {
        let window = Span::try_new(start, end).ok_or(EngineError::Validation("start must be before end"))?;
        if window.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let guards = self.read_all().await;
        Ok(calendar::intersecting(guards.iter().map(|g| &**g), &window))
    }

    /// Days of `year`-`month` on which a Confirmed reservation starts.
    pub async fn days_with_reservations(
        &self,
        year: i32,
        month: u32,
        zone: &DayZone,
    ) -> Result<BTreeSet<u32>, EngineError> {
        let window = zone
            .month_window(year, month)
            .ok_or(EngineError::Validation("invalid month"))?;
        let guards = self.read_all().await;
        Ok(calendar::days_with_starts(guards.iter().map(|g| &**g), zone, &window))
    }

    /// Case-insensitive substring match on holder or notes, over reservations
    /// of any status ending at or after `as_of`. Ordered by start.
    pub async fn search(&self, term: &str, as_of: Ms) -> Result<Vec<Reservation>, EngineError> {
        if term.len() > MAX_SEARCH_TERM_LEN {
            return Err(EngineError::LimitExceeded("search term too long"));
        }
        let needle = term.to_lowercase();
        let guards = self.read_all().await;
        let mut hits: Vec<Reservation> = guards
            .iter()
            .flat_map(|g| g.reservations.iter())
            .filter(|r| r.span.end >= as_of)
            .filter(|r| {
                r.holder.to_lowercase().contains(&needle) || r.notes.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        hits.sort_by_key(|r| r.span.start);
        Ok(hits)
    }

    /// Confirmed reservation count per resource, in registration order.
    pub async fn reservation_counts(&self) -> Vec<(ResourceInfo, usize)> {
        let resources = self.list_resources().await;
        let mut out = Vec::with_capacity(resources.len());
        for info in resources {
            let count = match self.get_resource(&info.id) {
                Some(rs) => rs.read().await.active_count(),
                None => 0,
            };
            out.push((info, count));
        }
        out
    }
}
