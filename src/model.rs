use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

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

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The span grown by `margin` on both ends.
    pub fn widened(&self, margin: Ms) -> Span {
        Span {
            start: self.start - margin,
            end: self.end + margin,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotStatus {
    Available,
    Booked,
}

/// A fixed window on one professional's calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: Ulid,
    pub professional_id: Ulid,
    pub span: Span,
    pub status: SlotStatus,
}

impl TimeSlot {
    pub fn is_available(&self) -> bool {
        self.status == SlotStatus::Available
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    /// Cancelled and completed appointments accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::Completed)
    }

    /// Statuses under which the bound slot must stay booked.
    pub fn holds_slot(self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Patient,
    Professional,
    FrontDesk,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Professional => "professional",
            Role::FrontDesk => "front_desk",
            Role::Admin => "admin",
        }
    }

    /// Front desk and admin act on any appointment.
    pub fn is_staff(self) -> bool {
        matches!(self, Role::FrontDesk | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The caller of an engine operation. Used for authorization only; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Ulid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Ulid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn patient(id: Ulid) -> Self {
        Self::new(id, Role::Patient)
    }

    pub fn professional(id: Ulid) -> Self {
        Self::new(id, Role::Professional)
    }

    pub fn front_desk(id: Ulid) -> Self {
        Self::new(id, Role::FrontDesk)
    }

    pub fn admin(id: Ulid) -> Self {
        Self::new(id, Role::Admin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub patient_id: Ulid,
    pub professional_id: Ulid,
    /// `None` only after a failed reschedule compensation.
    pub slot_id: Option<Ulid>,
    /// Always the bound slot's interval.
    pub span: Span,
    pub status: AppointmentStatus,
    pub created_at: Ms,
    pub checked_in_at: Option<Ms>,
    pub reason: Option<String>,
    /// Set when the appointment lost its slot and needs an operator.
    pub needs_reconciliation: bool,
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SlotCreated {
        id: Ulid,
        professional_id: Ulid,
        span: Span,
    },
    SlotReserved {
        id: Ulid,
    },
    SlotReleased {
        id: Ulid,
    },
    AppointmentCreated {
        appointment: Appointment,
    },
    AppointmentStatusChanged {
        id: Ulid,
        from: AppointmentStatus,
        to: AppointmentStatus,
        at: Ms,
        checked_in_at: Option<Ms>,
    },
    /// `old_slot_id` is `None` when an unbound appointment is given a new slot.
    AppointmentRescheduled {
        id: Ulid,
        old_slot_id: Option<Ulid>,
        new_slot_id: Ulid,
        professional_id: Ulid,
        span: Span,
    },
    AppointmentFlagged {
        id: Ulid,
        old_slot_id: Ulid,
    },
}

/// Events handed to the notification collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    AppointmentStatusChanged {
        appointment_id: Ulid,
        professional_id: Ulid,
        old: AppointmentStatus,
        new: AppointmentStatus,
    },
    AppointmentRescheduled {
        appointment_id: Ulid,
        professional_id: Ulid,
        old_slot_id: Option<Ulid>,
        new_slot_id: Ulid,
        old_span: Span,
        new_span: Span,
    },
}

impl DomainEvent {
    pub fn appointment_id(&self) -> Ulid {
        match self {
            DomainEvent::AppointmentStatusChanged { appointment_id, .. }
            | DomainEvent::AppointmentRescheduled { appointment_id, .. } => *appointment_id,
        }
    }

    pub fn professional_id(&self) -> Ulid {
        match self {
            DomainEvent::AppointmentStatusChanged { professional_id, .. }
            | DomainEvent::AppointmentRescheduled { professional_id, .. } => *professional_id,
        }
    }
}
