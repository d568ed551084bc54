//! Interval-based booking engine for shared spaces.
//!
//! Spaces are registered under unique names and booked into half-open
//! `[start, end)` spans. Overlapping Confirmed bookings on the same space are
//! rejected; back-to-back ones are not. Every admitted change is handed to a
//! [`persist::Persistence`] collaborator and undone if that fails.

pub mod calendar;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod persist;
pub mod scheduler;
pub mod wal;

pub use calendar::DayZone;
pub use config::Config;
pub use engine::{Engine, EngineError, Proposal};
pub use model::{Event, Ms, Priority, Reservation, ReservationId, ResourceId, ResourceInfo, Span, Status};
pub use notify::NotifyHub;
pub use persist::{MemoryStore, PersistError, Persistence, WalStore};
pub use scheduler::{BookingRequest, Scheduler};
