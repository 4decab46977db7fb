use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::MAX_REASON_LEN;
use crate::model::*;
use crate::observability::{IRRECOVERABLE_RESCHEDULES_TOTAL, record_operation};

use super::transitions::{authorize_booking, authorize_reschedule};
use super::{Engine, EngineError};

impl Engine {
    /// Reserve `slot_id` for `patient_id` and create a PENDING appointment.
    ///
    /// The slot write is the only serialization point: of any number of
    /// concurrent bookings for one slot, exactly one reserves it. A buffer
    /// check runs before the reservation and again after it, so two
    /// bookings of neighbouring slots racing each other cannot both stand.
    pub async fn book(
        &self,
        actor: &Actor,
        professional_id: Ulid,
        slot_id: Ulid,
        patient_id: Ulid,
        reason: Option<String>,
    ) -> Result<Appointment, EngineError> {
        let started = Instant::now();
        let result = self
            .book_inner(actor, professional_id, slot_id, patient_id, reason)
            .await;
        record_operation("book", started, &result);
        result
    }

    async fn book_inner(
        &self,
        actor: &Actor,
        professional_id: Ulid,
        slot_id: Ulid,
        patient_id: Ulid,
        reason: Option<String>,
    ) -> Result<Appointment, EngineError> {
        authorize_booking(actor, patient_id, professional_id)?;
        if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("reason too long"));
        }

        let _gate = self.gate.read().await;
        let slot = self
            .ledger
            .slot(slot_id)
            .await
            .filter(|s| s.professional_id == professional_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        if !slot.is_available() {
            return Err(conflict_on(&slot));
        }
        self.check_buffer(&slot, &[slot.id]).await?;

        if !self.ledger.try_reserve(slot.id).await? {
            return Err(conflict_on(&slot));
        }
        if let Err(e) = self.check_buffer(&slot, &[slot.id]).await {
            // A neighbour was booked between our check and our write.
            self.undo_reserve(slot.id).await;
            return Err(e);
        }

        let appointment = Appointment {
            id: Ulid::new(),
            patient_id,
            professional_id,
            slot_id: Some(slot.id),
            span: slot.span,
            status: AppointmentStatus::Pending,
            created_at: self.now(),
            checked_in_at: None,
            reason,
            needs_reconciliation: false,
        };
        let event = Event::AppointmentCreated {
            appointment: appointment.clone(),
        };
        if let Err(e) = self.persist(&event).await {
            self.undo_reserve(slot.id).await;
            return Err(e);
        }
        self.appointments
            .insert(appointment.id, Arc::new(RwLock::new(appointment.clone())));
        tracing::debug!(
            "booked appointment {} on slot {} {}",
            appointment.id,
            slot.id,
            slot.span
        );
        Ok(appointment)
    }

    /// Move an appointment onto `new_slot_id`.
    ///
    /// Release-old / reserve-new is a two-step swap. If the new slot is lost
    /// after the old one was released, the old slot is reserved back. If even
    /// that fails the appointment is left without a slot, flagged for
    /// reconciliation, and `IrrecoverableReschedule` is returned.
    ///
    /// Appointments already flagged can be given a slot again by front desk
    /// or admin; nothing is released in that case.
    pub async fn reschedule(
        &self,
        actor: &Actor,
        appointment_id: Ulid,
        new_slot_id: Ulid,
    ) -> Result<Appointment, EngineError> {
        let started = Instant::now();
        let result = self.reschedule_inner(actor, appointment_id, new_slot_id).await;
        record_operation("reschedule", started, &result);
        result
    }

    async fn reschedule_inner(
        &self,
        actor: &Actor,
        appointment_id: Ulid,
        new_slot_id: Ulid,
    ) -> Result<Appointment, EngineError> {
        let _gate = self.gate.read().await;
        let cell = self
            .get_appointment_cell(&appointment_id)
            .ok_or(EngineError::NotFound(appointment_id))?;
        let mut appointment = cell.write().await;

        authorize_reschedule(actor, &appointment, self.now(), self.policy.patient_lead_time_ms)?;
        if appointment.slot_id.is_none() && !actor.role.is_staff() {
            return Err(EngineError::forbidden(
                actor.role,
                "appointment awaits reconciliation",
            ));
        }

        let new_slot = self
            .ledger
            .slot(new_slot_id)
            .await
            .ok_or(EngineError::NotFound(new_slot_id))?;
        if actor.role == Role::Professional && new_slot.professional_id != actor.id {
            return Err(EngineError::forbidden(
                actor.role,
                "professionals may only move appointments onto their own calendar",
            ));
        }
        if appointment.slot_id == Some(new_slot.id) || !new_slot.is_available() {
            return Err(conflict_on(&new_slot));
        }

        let old_slot_id = appointment.slot_id;
        let exclude: Vec<Ulid> = old_slot_id.into_iter().chain([new_slot.id]).collect();
        self.check_buffer(&new_slot, &exclude).await?;

        if let Some(old) = old_slot_id
            && !self.ledger.release(old).await?
        {
            // The appointment's own slot was not booked: state is already off.
            tracing::warn!(
                "reschedule of appointment {appointment_id}: slot {old} was not booked"
            );
            return Err(EngineError::SlotOutOfSync {
                appointment_id,
                slot_id: old,
            });
        }

        // Old slot is free from here on; every failure must try to take it back.
        let reserved = match self.ledger.try_reserve(new_slot.id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(conflict_on(&new_slot)),
            Err(e) => Err(e),
        };
        let outcome = match reserved {
            Ok(()) => match self.check_buffer(&new_slot, &exclude).await {
                Ok(()) => {
                    let event = Event::AppointmentRescheduled {
                        id: appointment.id,
                        old_slot_id,
                        new_slot_id: new_slot.id,
                        professional_id: new_slot.professional_id,
                        span: new_slot.span,
                    };
                    let persisted = self.persist(&event).await;
                    if persisted.is_err() {
                        self.undo_reserve(new_slot.id).await;
                    }
                    persisted
                }
                Err(e) => {
                    self.undo_reserve(new_slot.id).await;
                    Err(e)
                }
            },
            Err(e) => Err(e),
        };

        if let Err(cause) = outcome {
            return match old_slot_id {
                Some(old) => Err(self.compensate(&mut appointment, old, cause).await),
                None => Err(cause),
            };
        }

        let old_span = appointment.span;
        appointment.slot_id = Some(new_slot.id);
        appointment.professional_id = new_slot.professional_id;
        appointment.span = new_slot.span;
        appointment.needs_reconciliation = false;
        let updated = appointment.clone();
        drop(appointment);

        tracing::debug!(
            "rescheduled appointment {appointment_id} from {old_span} to {}",
            new_slot.span
        );
        self.emit(DomainEvent::AppointmentRescheduled {
            appointment_id,
            professional_id: updated.professional_id,
            old_slot_id,
            new_slot_id: new_slot.id,
            old_span,
            new_span: new_slot.span,
        });
        Ok(updated)
    }

    /// Take `old` back after the new slot was lost. Returns the error to report.
    async fn compensate(
        &self,
        appointment: &mut Appointment,
        old: Ulid,
        cause: EngineError,
    ) -> EngineError {
        match self.ledger.try_reserve(old).await {
            Ok(true) => return cause,
            Ok(false) => tracing::error!(
                "appointment {}: slot {old} was taken while rescheduling ({cause})",
                appointment.id
            ),
            Err(e) => tracing::error!(
                "appointment {}: could not re-reserve slot {old}: {e} (after {cause})",
                appointment.id
            ),
        }

        metrics::counter!(IRRECOVERABLE_RESCHEDULES_TOTAL).increment(1);
        let event = Event::AppointmentFlagged {
            id: appointment.id,
            old_slot_id: old,
        };
        if let Err(e) = self.persist(&event).await {
            tracing::error!(
                "appointment {}: reconciliation flag not persisted: {e}",
                appointment.id
            );
        }
        appointment.slot_id = None;
        appointment.needs_reconciliation = true;
        EngineError::IrrecoverableReschedule {
            appointment_id: appointment.id,
            old_slot_id: old,
        }
    }

    async fn undo_reserve(&self, slot_id: Ulid) {
        match self.ledger.release(slot_id).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!("undo of reservation on slot {slot_id}: not booked"),
            Err(e) => tracing::error!("undo of reservation on slot {slot_id} failed: {e}"),
        }
    }
}

fn conflict_on(slot: &TimeSlot) -> EngineError {
    EngineError::SlotConflict {
        slot_id: slot.id,
        span: slot.span,
    }
}
