use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::model::*;

/// Time reference used to cut the timeline into calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DayZone {
    #[default]
    Utc,
    /// The host's local zone, chosen explicitly by the caller.
    Local,
    Fixed(FixedOffset),
}

impl DayZone {
    /// Fixed offset east of UTC, in minutes. `None` if out of range.
    pub fn fixed_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(DayZone::Fixed)
    }

    fn to_ms(&self, naive: &NaiveDateTime) -> Option<Ms> {
        match self {
            DayZone::Utc => Some(Utc.from_utc_datetime(naive).timestamp_millis()),
            DayZone::Fixed(offset) => offset
                .from_local_datetime(naive)
                .single()
                .map(|dt| dt.timestamp_millis()),
            // Ambiguous midnights take the earlier instant.
            DayZone::Local => Local
                .from_local_datetime(naive)
                .earliest()
                .map(|dt| dt.timestamp_millis()),
        }
    }

    /// First instant of `date` in this zone.
    pub fn start_of_day(&self, date: NaiveDate) -> Option<Ms> {
        let midnight = date.and_hms_opt(0, 0, 0)?;
        if let Some(ms) = self.to_ms(&midnight) {
            return Some(ms);
        }
        // DST gap swallowed local midnight; the day begins when clocks resume.
        self.to_ms(&date.and_hms_opt(1, 0, 0)?)
    }

    /// `[date 00:00, date+1 00:00)` in this zone.
    pub fn day_window(&self, date: NaiveDate) -> Option<Span> {
        let start = self.start_of_day(date)?;
        let end = self.start_of_day(date.succ_opt()?)?;
        Span::try_new(start, end)
    }

    /// Window covering a whole calendar month.
    pub fn month_window(&self, year: i32, month: u32) -> Option<Span> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year.checked_add(1)?, 1, 1)?
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)?
        };
        Span::try_new(self.start_of_day(first)?, self.start_of_day(next)?)
    }

    /// Calendar date containing instant `t` in this zone.
    pub fn date_of(&self, t: Ms) -> Option<NaiveDate> {
        let utc = DateTime::from_timestamp_millis(t)?;
        Some(match self {
            DayZone::Utc => utc.date_naive(),
            DayZone::Fixed(offset) => utc.with_timezone(offset).date_naive(),
            DayZone::Local => utc.with_timezone(&Local).date_naive(),
        })
    }
}

/// True if any Confirmed reservation starts inside `window`.
pub fn any_start_in<'a, I>(states: I, window: &Span) -> bool
where
    I: IntoIterator<Item = &'a ResourceState>,
{
    states
        .into_iter()
        .any(|rs| rs.active_starting_in(window).next().is_some())
}

/// Confirmed reservations intersecting `window`, ordered by start.
/// Equal starts keep the order of `states`, then insertion order.
pub fn intersecting<'a, I>(states: I, window: &Span) -> Vec<Reservation>
where
    I: IntoIterator<Item = &'a ResourceState>,
{
    let mut hits: Vec<Reservation> = states
        .into_iter()
        .flat_map(|rs| rs.active_overlapping(window).cloned())
        .collect();
    hits.sort_by_key(|r| r.span.start);
    hits
}

/// Days of the month (1-based) on which a Confirmed reservation starts.
pub fn days_with_starts<'a, I>(states: I, zone: &DayZone, month_window: &Span) -> BTreeSet<u32>
where
    I: IntoIterator<Item = &'a ResourceState>,
{
    states
        .into_iter()
        .flat_map(|rs| rs.active_starting_in(month_window))
        .filter_map(|r| zone.date_of(r.span.start))
        .map(|d| d.day())
        .collect()
}
