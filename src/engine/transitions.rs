//! Appointment lifecycle rules as data.
//!
//! Every allowed edge is one row of [`TRANSITIONS`]: the statuses it connects,
//! the roles that may take it, and the extra guard it carries. Anything not in
//! the table is an invalid transition, so terminal states need no special case.

use ulid::Ulid;

use crate::model::*;

use super::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    None,
    /// A patient must act at least the configured lead time before the start.
    PatientLeadTime,
    /// A professional completing the visit stamps the check-in time if unset.
    ProfessionalCheckIn,
}

#[derive(Debug, Clone, Copy)]
pub struct TransitionRule {
    pub from: AppointmentStatus,
    pub to: AppointmentStatus,
    pub roles: &'static [Role],
    pub guard: Guard,
}

use AppointmentStatus::{Cancelled, Completed, Confirmed, Pending};
use Role::{Admin, FrontDesk, Patient, Professional};

pub const TRANSITIONS: &[TransitionRule] = &[
    TransitionRule {
        from: Pending,
        to: Confirmed,
        roles: &[Professional, FrontDesk, Admin],
        guard: Guard::None,
    },
    TransitionRule {
        from: Pending,
        to: Cancelled,
        roles: &[Patient, FrontDesk, Admin],
        guard: Guard::PatientLeadTime,
    },
    TransitionRule {
        from: Confirmed,
        to: Cancelled,
        roles: &[Patient, FrontDesk, Admin],
        guard: Guard::PatientLeadTime,
    },
    TransitionRule {
        from: Confirmed,
        to: Completed,
        roles: &[Professional, FrontDesk, Admin],
        guard: Guard::ProfessionalCheckIn,
    },
    TransitionRule {
        from: Pending,
        to: Completed,
        roles: &[Professional],
        guard: Guard::ProfessionalCheckIn,
    },
];

pub fn rule_for(from: AppointmentStatus, to: AppointmentStatus) -> Option<&'static TransitionRule> {
    TRANSITIONS.iter().find(|r| r.from == from && r.to == to)
}

fn attempted(to: AppointmentStatus) -> &'static str {
    match to {
        Pending => "reopen",
        Confirmed => "confirm",
        Cancelled => "cancel",
        Completed => "complete",
    }
}

/// What the caller must do besides flipping the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Effects {
    pub stamp_check_in: bool,
    pub release_slot: bool,
}

/// Decide whether `actor` may move `appointment` to `to` at `now`.
///
/// Checks run in a fixed order: edge, role, ownership, guard.
pub fn authorize(
    actor: &Actor,
    appointment: &Appointment,
    to: AppointmentStatus,
    now: Ms,
    lead_time_ms: Ms,
) -> Result<Effects, EngineError> {
    let rule = rule_for(appointment.status, to).ok_or(EngineError::InvalidTransition {
        from: appointment.status,
        attempted: attempted(to),
    })?;
    if !rule.roles.contains(&actor.role) {
        return Err(EngineError::forbidden(
            actor.role,
            "role is not permitted to make this status change",
        ));
    }
    check_ownership(actor, appointment)?;

    let mut effects = Effects {
        release_slot: to == Cancelled,
        ..Effects::default()
    };
    match rule.guard {
        Guard::None => {}
        Guard::PatientLeadTime => {
            if actor.role == Patient {
                check_lead_time(appointment.span.start, now, lead_time_ms)?;
            }
        }
        Guard::ProfessionalCheckIn => {
            effects.stamp_check_in =
                actor.role == Professional && appointment.checked_in_at.is_none();
        }
    }
    Ok(effects)
}

/// Guards shared by every reschedule: the appointment must still be live, the
/// actor must own it, and patients must respect the lead time on the current slot.
pub fn authorize_reschedule(
    actor: &Actor,
    appointment: &Appointment,
    now: Ms,
    lead_time_ms: Ms,
) -> Result<(), EngineError> {
    if appointment.status.is_terminal() {
        return Err(EngineError::InvalidTransition {
            from: appointment.status,
            attempted: "reschedule",
        });
    }
    check_ownership(actor, appointment)?;
    if actor.role == Patient {
        check_lead_time(appointment.span.start, now, lead_time_ms)?;
    }
    Ok(())
}

/// Who may create an appointment for `patient_id` on `professional_id`'s calendar.
pub fn authorize_booking(
    actor: &Actor,
    patient_id: Ulid,
    professional_id: Ulid,
) -> Result<(), EngineError> {
    match actor.role {
        Patient if actor.id != patient_id => Err(EngineError::forbidden(
            actor.role,
            "patients may only book for themselves",
        )),
        Professional if actor.id != professional_id => Err(EngineError::forbidden(
            actor.role,
            "professionals may only book on their own calendar",
        )),
        _ => Ok(()),
    }
}

pub fn check_ownership(actor: &Actor, appointment: &Appointment) -> Result<(), EngineError> {
    match actor.role {
        Patient if actor.id != appointment.patient_id => Err(EngineError::forbidden(
            actor.role,
            "patients may only manage their own appointments",
        )),
        Professional if actor.id != appointment.professional_id => Err(EngineError::forbidden(
            actor.role,
            "professionals may only manage appointments on their own calendar",
        )),
        _ => Ok(()),
    }
}

pub fn check_lead_time(start: Ms, now: Ms, required_ms: Ms) -> Result<(), EngineError> {
    let remaining_ms = start - now;
    if remaining_ms < required_ms {
        return Err(EngineError::LeadTimeViolation {
            required_ms,
            remaining_ms,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: Ms = 1_767_225_600_000;
    const LEAD: Ms = 24 * HOUR_MS;
    const ALL: [AppointmentStatus; 4] = [Pending, Confirmed, Cancelled, Completed];

    fn appointment(status: AppointmentStatus, starts_in: Ms) -> Appointment {
        Appointment {
            id: Ulid::new(),
            patient_id: Ulid::new(),
            professional_id: Ulid::new(),
            slot_id: Some(Ulid::new()),
            span: Span::new(NOW + starts_in, NOW + starts_in + 30 * MINUTE_MS),
            status,
            created_at: NOW,
            checked_in_at: None,
            reason: None,
            needs_reconciliation: false,
        }
    }

    fn as_role(appt: &Appointment, role: Role) -> Actor {
        match role {
            Patient => Actor::patient(appt.patient_id),
            Professional => Actor::professional(appt.professional_id),
            other => Actor::new(Ulid::new(), other),
        }
    }

    #[test]
    fn table_has_no_edges_out_of_terminal_states() {
        assert!(TRANSITIONS.iter().all(|r| !r.from.is_terminal()));
    }

    #[test]
    fn terminal_states_reject_every_transition_for_every_role() {
        for from in [Cancelled, Completed] {
            for to in ALL {
                for role in [Patient, Professional, FrontDesk, Admin] {
                    let appt = appointment(from, 3 * DAY_MS);
                    let result = authorize(&as_role(&appt, role), &appt, to, NOW, LEAD);
                    assert!(
                        matches!(result, Err(EngineError::InvalidTransition { .. })),
                        "{from} -> {to} as {role}"
                    );
                }
            }
        }
    }

    #[test]
    fn patient_cannot_confirm() {
        let appt = appointment(Pending, 3 * DAY_MS);
        let result = authorize(&as_role(&appt, Patient), &appt, Confirmed, NOW, LEAD);
        assert!(matches!(result, Err(EngineError::Forbidden { role: Patient, .. })));
    }

    #[test]
    fn front_desk_cannot_complete_pending() {
        let appt = appointment(Pending, 0);
        let result = authorize(&as_role(&appt, FrontDesk), &appt, Completed, NOW, LEAD);
        assert!(matches!(result, Err(EngineError::Forbidden { .. })));
    }

    #[test]
    fn patient_cannot_touch_someone_elses_appointment() {
        let appt = appointment(Pending, 3 * DAY_MS);
        let stranger = Actor::patient(Ulid::new());
        let result = authorize(&stranger, &appt, Cancelled, NOW, LEAD);
        assert!(matches!(result, Err(EngineError::Forbidden { .. })));
    }

    #[test]
    fn professional_limited_to_own_calendar() {
        let appt = appointment(Pending, DAY_MS);
        let other = Actor::professional(Ulid::new());
        assert!(matches!(
            authorize(&other, &appt, Confirmed, NOW, LEAD),
            Err(EngineError::Forbidden { .. })
        ));
        assert!(authorize(&as_role(&appt, Professional), &appt, Confirmed, NOW, LEAD).is_ok());
    }

    #[test]
    fn patient_cancel_lead_time_boundary() {
        let late = appointment(Confirmed, LEAD - MINUTE_MS);
        assert!(matches!(
            authorize(&as_role(&late, Patient), &late, Cancelled, NOW, LEAD),
            Err(EngineError::LeadTimeViolation { .. })
        ));

        let on_time = appointment(Confirmed, LEAD);
        let effects = authorize(&as_role(&on_time, Patient), &on_time, Cancelled, NOW, LEAD).unwrap();
        assert!(effects.release_slot);
    }

    #[test]
    fn staff_cancel_ignores_lead_time() {
        let appt = appointment(Pending, 2 * HOUR_MS);
        assert!(authorize(&as_role(&appt, FrontDesk), &appt, Cancelled, NOW, LEAD).is_ok());
        assert!(authorize(&as_role(&appt, Admin), &appt, Cancelled, NOW, LEAD).is_ok());
    }

    #[test]
    fn professional_completion_stamps_check_in_once() {
        let mut appt = appointment(Pending, 0);
        let pro = as_role(&appt, Professional);
        assert!(authorize(&pro, &appt, Completed, NOW, LEAD).unwrap().stamp_check_in);

        appt.status = Confirmed;
        appt.checked_in_at = Some(NOW - MINUTE_MS);
        assert!(!authorize(&pro, &appt, Completed, NOW, LEAD).unwrap().stamp_check_in);
    }

    #[test]
    fn admin_completion_does_not_stamp_check_in() {
        let appt = appointment(Confirmed, 0);
        let effects = authorize(&as_role(&appt, Admin), &appt, Completed, NOW, LEAD).unwrap();
        assert_eq!(effects, Effects::default());
    }

    #[test]
    fn self_transition_is_invalid() {
        let appt = appointment(Pending, DAY_MS);
        assert!(matches!(
            authorize(&as_role(&appt, Admin), &appt, Pending, NOW, LEAD),
            Err(EngineError::InvalidTransition { attempted: "reopen", .. })
        ));
    }

    #[test]
    fn reschedule_guards() {
        let appt = appointment(Confirmed, 2 * HOUR_MS);
        assert!(matches!(
            authorize_reschedule(&as_role(&appt, Patient), &appt, NOW, LEAD),
            Err(EngineError::LeadTimeViolation { .. })
        ));
        assert!(authorize_reschedule(&as_role(&appt, FrontDesk), &appt, NOW, LEAD).is_ok());

        let done = appointment(Completed, 2 * DAY_MS);
        assert!(matches!(
            authorize_reschedule(&as_role(&done, Admin), &done, NOW, LEAD),
            Err(EngineError::InvalidTransition { attempted: "reschedule", .. })
        ));
    }

    #[test]
    fn booking_on_behalf() {
        let patient = Ulid::new();
        let pro = Ulid::new();
        assert!(authorize_booking(&Actor::patient(patient), patient, pro).is_ok());
        assert!(authorize_booking(&Actor::patient(Ulid::new()), patient, pro).is_err());
        assert!(authorize_booking(&Actor::professional(pro), patient, pro).is_ok());
        assert!(authorize_booking(&Actor::professional(Ulid::new()), patient, pro).is_err());
        assert!(authorize_booking(&Actor::front_desk(Ulid::new()), patient, pro).is_ok());
    }
}
