mod booking;
mod conflict;
mod error;
mod ledger;
mod lifecycle;
mod queries;
mod snapshot;
mod suggest;
pub mod transitions;

pub use conflict::{first_conflict, has_conflict, validate_span};
pub use error::{EngineError, ErrorKind};
pub use ledger::{SlotLedger, SlotTable};
pub use queries::Finding;
pub use snapshot::Snapshot;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::clock::Clock;
use crate::limits::*;
use crate::model::*;
use crate::notify::NotificationDispatcher;
use crate::observability::DISPATCH_FAILURES_TOTAL;
use crate::wal::{Wal, WalWriter};

pub type SharedAppointment = Arc<RwLock<Appointment>>;

/// Process-wide booking rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Minimum gap kept before and after every booked interval.
    pub buffer_ms: Ms,
    /// How far ahead of the start a patient must cancel or reschedule.
    pub patient_lead_time_ms: Ms,
    pub suggestion_limit: usize,
    pub suggestion_window_ms: Ms,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            buffer_ms: DEFAULT_BUFFER_MINUTES as Ms * MINUTE_MS,
            patient_lead_time_ms: DEFAULT_PATIENT_LEAD_TIME_MS,
            suggestion_limit: DEFAULT_SUGGESTION_LIMIT,
            suggestion_window_ms: DEFAULT_SUGGESTION_WINDOW_MS,
        }
    }
}

impl Policy {
    pub fn with_buffer_minutes(mut self, minutes: u32) -> Self {
        self.buffer_ms = minutes.min(MAX_BUFFER_MINUTES) as Ms * MINUTE_MS;
        self
    }
}

/// The reservation engine: slot ledger, appointment store and the rules
/// that keep the two in step.
///
/// Mutating operations hold `gate` for reading exactly once and never call
/// each other, so WAL compaction (which takes it for writing) always sees a
/// state where appointments and slots agree. Lock order inside an operation
/// is appointment first, then slot.
pub struct Engine {
    pub(super) ledger: Arc<dyn SlotLedger>,
    pub(super) appointments: DashMap<Ulid, SharedAppointment>,
    pub(super) wal: WalWriter,
    pub(super) dispatcher: Arc<dyn NotificationDispatcher>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) policy: Policy,
    pub(super) gate: RwLock<()>,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        policy: Policy,
        dispatcher: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        Self::with_ledger(wal_path, policy, dispatcher, clock, |table| {
            table as Arc<dyn SlotLedger>
        })
    }

    /// Like `new`, but lets the caller wrap the restored slot table in its own
    /// `SlotLedger` (instrumentation, fault injection).
    pub fn with_ledger(
        wal_path: PathBuf,
        policy: Policy,
        dispatcher: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        wrap: impl FnOnce(Arc<SlotTable>) -> Arc<dyn SlotLedger>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let snapshot = Snapshot::replay(&events);
        let wal = WalWriter::spawn(Wal::open(&wal_path)?);

        let table = Arc::new(SlotTable::restore(wal.clone(), snapshot.slots.into_values()));
        let appointments = DashMap::new();
        for (id, appointment) in snapshot.appointments {
            appointments.insert(id, Arc::new(RwLock::new(appointment)));
        }
        tracing::info!(
            "engine opened from {}: {} events, {} slots, {} appointments",
            wal_path.display(),
            events.len(),
            table.len(),
            appointments.len()
        );

        Ok(Self {
            ledger: wrap(table),
            appointments,
            wal,
            dispatcher,
            clock,
            policy,
            gate: RwLock::new(()),
        })
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    pub(crate) fn ledger(&self) -> &Arc<dyn SlotLedger> {
        &self.ledger
    }

    /// Materializer intake: register a new AVAILABLE slot.
    pub async fn add_slot(
        &self,
        id: Ulid,
        professional_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<TimeSlot, EngineError> {
        let span = validate_span(start, end)?;
        let _gate = self.gate.read().await;
        self.ledger.add_slot(id, professional_id, span).await
    }

    /// Rewrite the WAL as the minimal event sequence for the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.gate.write().await;
        let mut snapshot = Snapshot::default();
        for slot in self.ledger.all_slots().await {
            snapshot.slots.insert(slot.id, slot);
        }
        let cells: Vec<SharedAppointment> =
            self.appointments.iter().map(|e| e.value().clone()).collect();
        for cell in cells {
            let appointment = cell.read().await.clone();
            snapshot.appointments.insert(appointment.id, appointment);
        }
        self.wal.compact(snapshot.to_events()).await?;
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }

    pub(super) fn get_appointment_cell(&self, id: &Ulid) -> Option<SharedAppointment> {
        self.appointments.get(id).map(|e| e.value().clone())
    }

    pub(super) async fn persist(&self, event: &Event) -> Result<(), EngineError> {
        self.wal.append(event).await.map_err(EngineError::from)
    }

    /// Hand a committed change to the dispatcher. Failures never undo the change.
    pub(super) fn emit(&self, event: DomainEvent) {
        if let Err(e) = self.dispatcher.dispatch(&event) {
            metrics::counter!(DISPATCH_FAILURES_TOTAL).increment(1);
            tracing::warn!(
                "notification for appointment {} not delivered: {e}",
                event.appointment_id()
            );
        }
    }

    /// Buffer check of `slot` against the professional's other booked slots.
    pub(super) async fn check_buffer(
        &self,
        slot: &TimeSlot,
        exclude: &[Ulid],
    ) -> Result<(), EngineError> {
        let window = slot.span.widened(self.policy.buffer_ms);
        let booked = self
            .ledger
            .booked_spans(slot.professional_id, window, exclude)
            .await;
        match first_conflict(&slot.span, &booked, self.policy.buffer_ms) {
            Some(conflicting) => Err(EngineError::BufferConflict {
                slot_id: slot.id,
                span: slot.span,
                conflicting: *conflicting,
            }),
            None => Ok(()),
        }
    }
}
