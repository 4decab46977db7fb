use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

/// Materialized state: what a replayed WAL amounts to.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub slots: HashMap<Ulid, TimeSlot>,
    pub appointments: HashMap<Ulid, Appointment>,
}

impl Snapshot {
    /// Fold events in log order. Events naming unknown rows are skipped.
    pub fn replay(events: &[Event]) -> Self {
        let mut snap = Snapshot::default();
        for event in events {
            snap.apply(event);
        }
        snap
    }

    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::SlotCreated {
                id,
                professional_id,
                span,
            } => {
                self.slots.insert(
                    *id,
                    TimeSlot {
                        id: *id,
                        professional_id: *professional_id,
                        span: *span,
                        status: SlotStatus::Available,
                    },
                );
            }
            Event::SlotReserved { id } => self.set_slot_status(id, SlotStatus::Booked),
            Event::SlotReleased { id } => self.set_slot_status(id, SlotStatus::Available),
            Event::AppointmentCreated { appointment } => {
                self.appointments.insert(appointment.id, appointment.clone());
            }
            Event::AppointmentStatusChanged {
                id,
                to,
                checked_in_at,
                ..
            } => {
                if let Some(a) = self.appointments.get_mut(id) {
                    a.status = *to;
                    a.checked_in_at = *checked_in_at;
                }
            }
            Event::AppointmentRescheduled {
                id,
                new_slot_id,
                professional_id,
                span,
                ..
            } => {
                if let Some(a) = self.appointments.get_mut(id) {
                    a.slot_id = Some(*new_slot_id);
                    a.professional_id = *professional_id;
                    a.span = *span;
                    a.needs_reconciliation = false;
                }
            }
            Event::AppointmentFlagged { id, .. } => {
                if let Some(a) = self.appointments.get_mut(id) {
                    a.slot_id = None;
                    a.needs_reconciliation = true;
                }
            }
        }
    }

    fn set_slot_status(&mut self, id: &Ulid, status: SlotStatus) {
        if let Some(slot) = self.slots.get_mut(id) {
            slot.status = status;
        }
    }

    /// The shortest event sequence that replays back to this state.
    pub fn to_events(&self) -> Vec<Event> {
        let mut slots: Vec<&TimeSlot> = self.slots.values().collect();
        slots.sort_by_key(|s| (s.professional_id, s.span.start, s.id));
        let mut appointments: Vec<&Appointment> = self.appointments.values().collect();
        appointments.sort_by_key(|a| a.id);

        let mut events = Vec::with_capacity(slots.len() * 2 + appointments.len());
        for slot in slots {
            events.push(Event::SlotCreated {
                id: slot.id,
                professional_id: slot.professional_id,
                span: slot.span,
            });
            if slot.status == SlotStatus::Booked {
                events.push(Event::SlotReserved { id: slot.id });
            }
        }
        for appointment in appointments {
            events.push(Event::AppointmentCreated {
                appointment: appointment.clone(),
            });
        }
        events
    }
}
