use thiserror::Error;
use ulid::Ulid;

use crate::model::{AppointmentStatus, Ms, Role, Span};

/// Flat classification of `EngineError`, for metrics labels and callers
/// that only branch on the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    InvalidTransition,
    LeadTimeViolation,
    SlotConflict,
    BufferConflict,
    IrrecoverableReschedule,
    SlotOutOfSync,
    InvalidInterval,
    AlreadyExists,
    LimitExceeded,
    Storage,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::LeadTimeViolation => "lead_time_violation",
            ErrorKind::SlotConflict => "slot_conflict",
            ErrorKind::BufferConflict => "buffer_conflict",
            ErrorKind::IrrecoverableReschedule => "irrecoverable_reschedule",
            ErrorKind::SlotOutOfSync => "slot_out_of_sync",
            ErrorKind::InvalidInterval => "invalid_interval",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::LimitExceeded => "limit_exceeded",
            ErrorKind::Storage => "storage",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),

    #[error("{role} may not perform this action: {reason}")]
    Forbidden { role: Role, reason: &'static str },

    #[error("cannot {attempted} an appointment that is {from}")]
    InvalidTransition {
        from: AppointmentStatus,
        attempted: &'static str,
    },

    #[error(
        "patients must act at least {required_ms} ms before the appointment starts; it starts in {remaining_ms} ms"
    )]
    LeadTimeViolation { required_ms: Ms, remaining_ms: Ms },

    #[error("slot {slot_id} {span} is no longer available")]
    SlotConflict { slot_id: Ulid, span: Span },

    #[error("slot {slot_id} {span} is too close to booked interval {conflicting}")]
    BufferConflict {
        slot_id: Ulid,
        span: Span,
        conflicting: Span,
    },

    #[error(
        "appointment {appointment_id} lost slot {old_slot_id} during reschedule and needs manual reconciliation"
    )]
    IrrecoverableReschedule {
        appointment_id: Ulid,
        old_slot_id: Ulid,
    },

    /// The appointment's own slot was not BOOKED. Needs an audit, not a retry.
    #[error("appointment {appointment_id} is bound to slot {slot_id}, which is not booked")]
    SlotOutOfSync { appointment_id: Ulid, slot_id: Ulid },

    #[error("invalid interval: start {start} must be before end {end}")]
    InvalidInterval { start: Ms, end: Ms },

    #[error("already exists: {0}")]
    AlreadyExists(Ulid),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Forbidden { .. } => ErrorKind::Forbidden,
            EngineError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            EngineError::LeadTimeViolation { .. } => ErrorKind::LeadTimeViolation,
            EngineError::SlotConflict { .. } => ErrorKind::SlotConflict,
            EngineError::BufferConflict { .. } => ErrorKind::BufferConflict,
            EngineError::IrrecoverableReschedule { .. } => ErrorKind::IrrecoverableReschedule,
            EngineError::SlotOutOfSync { .. } => ErrorKind::SlotOutOfSync,
            EngineError::InvalidInterval { .. } => ErrorKind::InvalidInterval,
            EngineError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            EngineError::LimitExceeded(_) => ErrorKind::LimitExceeded,
            EngineError::WalError(_) => ErrorKind::Storage,
        }
    }

    /// Conflicts that a caller can answer with alternative slots.
    pub fn is_slot_conflict(&self) -> bool {
        matches!(self.kind(), ErrorKind::SlotConflict | ErrorKind::BufferConflict)
    }

    pub(crate) fn forbidden(role: Role, reason: &'static str) -> Self {
        EngineError::Forbidden { role, reason }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::WalError(e.to_string())
    }
}
