use std::collections::{HashMap, HashSet};

use ulid::Ulid;

use crate::model::*;

use super::{Engine, SharedAppointment};

/// A place where appointment status and slot status disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    /// A live appointment whose slot is AVAILABLE.
    SlotNotBooked { appointment_id: Ulid, slot_id: Ulid },
    /// A live appointment pointing at a slot the ledger does not know.
    SlotMissing { appointment_id: Ulid, slot_id: Ulid },
    /// Lost its slot in a failed reschedule.
    AwaitingReconciliation { appointment_id: Ulid },
    /// A BOOKED slot that no live appointment holds.
    OrphanBooking { slot_id: Ulid },
}

impl Engine {
    pub async fn get_appointment(&self, id: Ulid) -> Option<Appointment> {
        let cell = self.get_appointment_cell(&id)?;
        let appointment = cell.read().await.clone();
        Some(appointment)
    }

    pub async fn slot(&self, id: Ulid) -> Option<TimeSlot> {
        self.ledger.slot(id).await
    }

    pub async fn slots_for(&self, professional_id: Ulid) -> Vec<TimeSlot> {
        self.ledger.slots_for(professional_id).await
    }

    pub async fn appointments_for_professional(&self, professional_id: Ulid) -> Vec<Appointment> {
        self.collect_appointments(|a| a.professional_id == professional_id)
            .await
    }

    pub async fn appointments_for_patient(&self, patient_id: Ulid) -> Vec<Appointment> {
        self.collect_appointments(|a| a.patient_id == patient_id).await
    }

    /// Appointments left without a slot by a failed reschedule.
    pub async fn needs_reconciliation(&self) -> Vec<Appointment> {
        self.collect_appointments(|a| a.needs_reconciliation).await
    }

    /// Cross-check every appointment against the ledger. Waits for in-flight
    /// operations to finish so the view is consistent.
    pub async fn audit(&self) -> Vec<Finding> {
        let _gate = self.gate.write().await;
        let slots: HashMap<Ulid, TimeSlot> = self
            .ledger
            .all_slots()
            .await
            .into_iter()
            .map(|s| (s.id, s))
            .collect();
        let appointments = self.collect_appointments(|_| true).await;

        let mut findings = Vec::new();
        let mut held = HashSet::new();
        for a in &appointments {
            if !a.status.holds_slot() {
                continue;
            }
            let Some(slot_id) = a.slot_id else {
                findings.push(Finding::AwaitingReconciliation {
                    appointment_id: a.id,
                });
                continue;
            };
            held.insert(slot_id);
            match slots.get(&slot_id) {
                None => findings.push(Finding::SlotMissing {
                    appointment_id: a.id,
                    slot_id,
                }),
                Some(slot) if slot.is_available() => findings.push(Finding::SlotNotBooked {
                    appointment_id: a.id,
                    slot_id,
                }),
                Some(_) => {}
            }
        }
        for slot in slots.values() {
            if !slot.is_available() && !held.contains(&slot.id) {
                findings.push(Finding::OrphanBooking { slot_id: slot.id });
            }
        }
        findings
    }

    async fn collect_appointments(&self, keep: impl Fn(&Appointment) -> bool) -> Vec<Appointment> {
        let cells: Vec<SharedAppointment> =
            self.appointments.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for cell in cells {
            let appointment = cell.read().await;
            if keep(&appointment) {
                out.push(appointment.clone());
            }
        }
        out.sort_by_key(|a| (a.span.start, a.id));
        out
    }
}
