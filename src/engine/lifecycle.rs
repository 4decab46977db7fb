use std::time::Instant;

use ulid::Ulid;

use crate::model::*;
use crate::observability::{RELEASE_MISSES_TOTAL, STATUS_TRANSITIONS_TOTAL, record_operation};

use super::transitions::authorize;
use super::{Engine, EngineError};

impl Engine {
    /// Move an appointment through its lifecycle.
    ///
    /// The status change is committed first; cancelling then releases the
    /// bound slot. A release that finds the slot already free is logged and
    /// counted but does not undo the cancellation.
    pub async fn change_status(
        &self,
        actor: &Actor,
        appointment_id: Ulid,
        to: AppointmentStatus,
    ) -> Result<Appointment, EngineError> {
        let started = Instant::now();
        let result = self.change_status_inner(actor, appointment_id, to).await;
        record_operation(op_name(to), started, &result);
        result
    }

    pub async fn confirm(&self, actor: &Actor, appointment_id: Ulid) -> Result<Appointment, EngineError> {
        self.change_status(actor, appointment_id, AppointmentStatus::Confirmed)
            .await
    }

    pub async fn cancel(&self, actor: &Actor, appointment_id: Ulid) -> Result<Appointment, EngineError> {
        self.change_status(actor, appointment_id, AppointmentStatus::Cancelled)
            .await
    }

    pub async fn complete(&self, actor: &Actor, appointment_id: Ulid) -> Result<Appointment, EngineError> {
        self.change_status(actor, appointment_id, AppointmentStatus::Completed)
            .await
    }

    async fn change_status_inner(
        &self,
        actor: &Actor,
        appointment_id: Ulid,
        to: AppointmentStatus,
    ) -> Result<Appointment, EngineError> {
        let _gate = self.gate.read().await;
        let cell = self
            .get_appointment_cell(&appointment_id)
            .ok_or(EngineError::NotFound(appointment_id))?;
        let mut appointment = cell.write().await;

        let now = self.now();
        let effects = authorize(actor, &appointment, to, now, self.policy.patient_lead_time_ms)?;
        let from = appointment.status;
        let checked_in_at = if effects.stamp_check_in {
            Some(now)
        } else {
            appointment.checked_in_at
        };

        self.persist(&Event::AppointmentStatusChanged {
            id: appointment_id,
            from,
            to,
            at: now,
            checked_in_at,
        })
        .await?;
        appointment.status = to;
        appointment.checked_in_at = checked_in_at;

        if effects.release_slot
            && let Some(slot_id) = appointment.slot_id
        {
            self.release_after_cancel(appointment_id, slot_id).await;
        }

        let updated = appointment.clone();
        drop(appointment);

        metrics::counter!(STATUS_TRANSITIONS_TOTAL, "from" => from.as_str(), "to" => to.as_str())
            .increment(1);
        tracing::debug!("appointment {appointment_id}: {from} -> {to} by {}", actor.role);
        self.emit(DomainEvent::AppointmentStatusChanged {
            appointment_id,
            professional_id: updated.professional_id,
            old: from,
            new: to,
        });
        Ok(updated)
    }

    async fn release_after_cancel(&self, appointment_id: Ulid, slot_id: Ulid) {
        match self.ledger.release(slot_id).await {
            Ok(true) => {}
            Ok(false) => {
                metrics::counter!(RELEASE_MISSES_TOTAL).increment(1);
                tracing::warn!(
                    "cancelled appointment {appointment_id}: slot {slot_id} was already available"
                );
            }
            Err(e) => {
                metrics::counter!(RELEASE_MISSES_TOTAL).increment(1);
                tracing::warn!(
                    "cancelled appointment {appointment_id}: releasing slot {slot_id} failed: {e}"
                );
            }
        }
    }
}

fn op_name(to: AppointmentStatus) -> &'static str {
    match to {
        AppointmentStatus::Pending => "reopen",
        AppointmentStatus::Confirmed => "confirm",
        AppointmentStatus::Cancelled => "cancel",
        AppointmentStatus::Completed => "complete",
    }
}
