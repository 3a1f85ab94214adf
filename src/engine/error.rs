use ulid::Ulid;

use crate::model::{AppointmentStatus, ScheduleError};

/// Why a reservation was refused. Every variant is recoverable by choosing
/// another slot; none of them is worth retrying against the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("slot_in_past")]
    SlotInPast,
    #[error("outside_business_hours")]
    OutsideBusinessHours,
    #[error("invalid_slot_alignment")]
    InvalidSlotAlignment,
    /// Lost the race (or the slot was simply taken): refresh availability.
    #[error("slot_already_taken")]
    SlotAlreadyTaken,
}

impl Rejection {
    /// Machine-readable reason.
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::SlotInPast => "slot_in_past",
            Rejection::OutsideBusinessHours => "outside_business_hours",
            Rejection::InvalidSlotAlignment => "invalid_slot_alignment",
            Rejection::SlotAlreadyTaken => "slot_already_taken",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid schedule: {0}")]
    InvalidSchedule(#[from] ScheduleError),
    #[error("rejected: {0}")]
    Rejected(#[from] Rejection),
    #[error("appointment {id}: cannot go from {current} to {requested}")]
    InvalidTransition {
        id: Ulid,
        current: AppointmentStatus,
        requested: AppointmentStatus,
    },
    #[error("cannot delete business {0}: has active appointments")]
    HasActiveAppointments(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            EngineError::Rejected(r) => Some(*r),
            _ => None,
        }
    }
}
