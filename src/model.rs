use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type inside the engine.
pub type Ms = i64;

pub type ResourceId = Ulid;
pub type ReservationId = Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for values coming from outside the engine.
    /// Zero-length and inverted spans are rejected.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Reservation lifecycle. `Confirmed → Cancelled`, and `Cancelled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Confirmed,
    Cancelled,
}

impl Status {
    pub fn is_confirmed(self) -> bool {
        matches!(self, Status::Confirmed)
    }

    /// The status after a cancel, or `None` if the transition is not allowed.
    pub fn cancelled(self) -> Option<Status> {
        match self {
            Status::Confirmed => Some(Status::Cancelled),
            Status::Cancelled => None,
        }
    }
}

/// Advisory ordinal in `1..=7`. Carried on reservations, never consulted
/// when admitting or ordering them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 7;

    pub fn new(level: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&level).then_some(Self(level))
    }

    pub fn level(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        Self::new(level).ok_or_else(|| {
            format!("priority {level} outside {}..={}", Self::MIN, Self::MAX)
        })
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> u8 {
        priority.0
    }
}

/// A claim on one resource for a half-open span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub resource_id: ResourceId,
    pub span: Span,
    pub holder: String,
    pub notes: String,
    pub status: Status,
    pub priority: Option<Priority>,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status.is_confirmed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub id: ResourceId,
    pub name: String,
}

/// All reservations of a single resource, sorted by `span.start`.
/// Reservations sharing a start stay in insertion order.
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: ResourceId,
    pub reservations: Vec<Reservation>,
}

impl ResourceState {
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            reservations: Vec::new(),
        }
    }

    /// Insert after every reservation starting at or before this one.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let start = reservation.span.start;
        let pos = self.reservations.partition_point(|r| r.span.start <= start);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: ReservationId) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get(&self, id: ReservationId) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: ReservationId) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Confirmed reservations in start order.
    pub fn active(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter().filter(|r| r.is_active())
    }

    /// Confirmed reservations whose span overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn active_overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.is_active() && r.span.end > query.start)
    }

    /// Confirmed reservations whose start lies inside `window`.
    pub fn active_starting_in(&self, window: &Span) -> impl Iterator<Item = &Reservation> {
        let lo = self
            .reservations
            .partition_point(|r| r.span.start < window.start);
        let hi = self
            .reservations
            .partition_point(|r| r.span.start < window.end);
        self.reservations[lo..hi].iter().filter(|r| r.is_active())
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }
}

/// Flat event records. This is the WAL record format and
/// the payload broadcast to change subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceRegistered {
        id: ResourceId,
        name: String,
    },
    ResourceRenamed {
        id: ResourceId,
        name: String,
    },
    ReservationSaved {
        reservation: Reservation,
    },
    StatusUpdated {
        id: ReservationId,
        status: Status,
    },
    NotesUpdated {
        id: ReservationId,
        notes: String,
    },
}
