use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::wal::WalWriter;

use super::{EngineError, validate_span};

/// Authoritative slot state. The only code path that writes slot status.
///
/// `try_reserve` and `release` are conditional writes: they report `false`
/// when the stored status is not the expected one, which callers treat as
/// "someone else already acted", never as an error.
#[async_trait]
pub trait SlotLedger: Send + Sync {
    /// AVAILABLE → BOOKED, only if still AVAILABLE at the moment of the write.
    async fn try_reserve(&self, slot_id: Ulid) -> Result<bool, EngineError>;

    /// BOOKED → AVAILABLE, only if currently BOOKED.
    async fn release(&self, slot_id: Ulid) -> Result<bool, EngineError>;

    async fn add_slot(
        &self,
        id: Ulid,
        professional_id: Ulid,
        span: Span,
    ) -> Result<TimeSlot, EngineError>;

    async fn slot(&self, slot_id: Ulid) -> Option<TimeSlot>;

    /// Booked intervals of `professional_id` overlapping `window`, minus `exclude`.
    async fn booked_spans(&self, professional_id: Ulid, window: Span, exclude: &[Ulid]) -> Vec<Span>;

    /// Available slots starting strictly inside `(after, before)`, ascending, at most `limit`.
    async fn available_slots(
        &self,
        professional_id: Ulid,
        after: Ms,
        before: Ms,
        limit: usize,
    ) -> Vec<TimeSlot>;

    async fn slots_for(&self, professional_id: Ulid) -> Vec<TimeSlot>;

    async fn all_slots(&self) -> Vec<TimeSlot>;
}

pub type SharedSlot = Arc<RwLock<TimeSlot>>;

/// Index entry. Slot intervals never change, so the index can carry them.
#[derive(Debug, Clone, Copy)]
struct SlotRef {
    id: Ulid,
    span: Span,
}

/// In-memory slot table persisted through the WAL.
///
/// Each slot has its own lock; no operation locks a whole calendar. The
/// per-professional index is sorted by start time for window queries.
pub struct SlotTable {
    slots: DashMap<Ulid, SharedSlot>,
    calendars: DashMap<Ulid, Vec<SlotRef>>,
    /// Serializes intake so the duplicate check, WAL append and insert act as one.
    intake: Mutex<()>,
    wal: WalWriter,
}

impl SlotTable {
    pub fn new(wal: WalWriter) -> Self {
        Self {
            slots: DashMap::new(),
            calendars: DashMap::new(),
            intake: Mutex::new(()),
            wal,
        }
    }

    /// Rebuild from replayed state. No WAL writes.
    pub fn restore(wal: WalWriter, slots: impl IntoIterator<Item = TimeSlot>) -> Self {
        let table = Self::new(wal);
        for slot in slots {
            table.insert(slot);
        }
        table
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    fn get(&self, id: &Ulid) -> Option<SharedSlot> {
        self.slots.get(id).map(|e| e.value().clone())
    }

    fn insert(&self, slot: TimeSlot) {
        let entry = SlotRef {
            id: slot.id,
            span: slot.span,
        };
        let mut calendar = self.calendars.entry(slot.professional_id).or_default();
        let pos = calendar.partition_point(|r| r.span.start <= entry.span.start);
        calendar.insert(pos, entry);
        drop(calendar);
        self.slots.insert(slot.id, Arc::new(RwLock::new(slot)));
    }

    /// Index entries whose span overlaps `window`. Clones out of the map so no
    /// shard guard is held across an await.
    fn refs_overlapping(&self, professional_id: &Ulid, window: &Span) -> Vec<SlotRef> {
        let Some(calendar) = self.calendars.get(professional_id) else {
            return Vec::new();
        };
        // A slot starting before this cannot reach the window.
        let earliest = window.start - MAX_SLOT_DURATION_MS;
        let lo = calendar.partition_point(|r| r.span.start < earliest);
        let hi = calendar.partition_point(|r| r.span.start < window.end);
        calendar[lo..hi.max(lo)]
            .iter()
            .filter(|r| r.span.end > window.start)
            .copied()
            .collect()
    }

    async fn snapshot_of(&self, refs: &[SlotRef]) -> Vec<TimeSlot> {
        let mut out = Vec::with_capacity(refs.len());
        for r in refs {
            if let Some(cell) = self.get(&r.id) {
                out.push(cell.read().await.clone());
            }
        }
        out
    }

    async fn conditional_write(
        &self,
        slot_id: Ulid,
        expected: SlotStatus,
        next: SlotStatus,
        event: Event,
    ) -> Result<bool, EngineError> {
        let cell = self.get(&slot_id).ok_or(EngineError::NotFound(slot_id))?;
        let mut slot = cell.write().await;
        if slot.status != expected {
            return Ok(false);
        }
        self.wal.append(&event).await?;
        slot.status = next;
        Ok(true)
    }
}

fn record_outcome(op: &'static str, result: &Result<bool, EngineError>) {
    let outcome = match result {
        Ok(true) => "applied",
        Ok(false) => "conflict",
        Err(_) => "error",
    };
    metrics::counter!(crate::observability::SLOT_WRITES_TOTAL, "op" => op, "outcome" => outcome)
        .increment(1);
}

#[async_trait]
impl SlotLedger for SlotTable {
    async fn try_reserve(&self, slot_id: Ulid) -> Result<bool, EngineError> {
        let result = self
            .conditional_write(
                slot_id,
                SlotStatus::Available,
                SlotStatus::Booked,
                Event::SlotReserved { id: slot_id },
            )
            .await;
        record_outcome("reserve", &result);
        if let Ok(false) = result {
            tracing::debug!("reserve of slot {slot_id} lost: already booked");
        }
        result
    }

    async fn release(&self, slot_id: Ulid) -> Result<bool, EngineError> {
        let result = self
            .conditional_write(
                slot_id,
                SlotStatus::Booked,
                SlotStatus::Available,
                Event::SlotReleased { id: slot_id },
            )
            .await;
        record_outcome("release", &result);
        if let Ok(false) = result {
            tracing::debug!("release of slot {slot_id} skipped: not booked");
        }
        result
    }

    async fn add_slot(
        &self,
        id: Ulid,
        professional_id: Ulid,
        span: Span,
    ) -> Result<TimeSlot, EngineError> {
        // The index lookup in `refs_overlapping` relies on the duration limit.
        let span = validate_span(span.start, span.end)?;
        let _intake = self.intake.lock().await;
        if self.slots.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self
            .calendars
            .get(&professional_id)
            .is_some_and(|c| c.len() >= MAX_SLOTS_PER_PROFESSIONAL)
        {
            return Err(EngineError::LimitExceeded("too many slots for professional"));
        }
        let event = Event::SlotCreated {
            id,
            professional_id,
            span,
        };
        self.wal.append(&event).await?;
        let slot = TimeSlot {
            id,
            professional_id,
            span,
            status: SlotStatus::Available,
        };
        self.insert(slot.clone());
        Ok(slot)
    }

    async fn slot(&self, slot_id: Ulid) -> Option<TimeSlot> {
        let cell = self.get(&slot_id)?;
        let slot = cell.read().await.clone();
        Some(slot)
    }

    async fn booked_spans(&self, professional_id: Ulid, window: Span, exclude: &[Ulid]) -> Vec<Span> {
        let refs: Vec<SlotRef> = self
            .refs_overlapping(&professional_id, &window)
            .into_iter()
            .filter(|r| !exclude.contains(&r.id))
            .collect();
        let mut booked = Vec::new();
        for r in refs {
            let Some(cell) = self.get(&r.id) else { continue };
            if cell.read().await.status == SlotStatus::Booked {
                booked.push(r.span);
            }
        }
        booked
    }

    async fn available_slots(
        &self,
        professional_id: Ulid,
        after: Ms,
        before: Ms,
        limit: usize,
    ) -> Vec<TimeSlot> {
        let refs: Vec<SlotRef> = match self.calendars.get(&professional_id) {
            Some(calendar) => {
                let lo = calendar.partition_point(|r| r.span.start <= after);
                let hi = calendar.partition_point(|r| r.span.start < before);
                calendar[lo..hi.max(lo)].to_vec()
            }
            None => return Vec::new(),
        };
        let mut out = Vec::new();
        for r in refs {
            if out.len() >= limit {
                break;
            }
            let Some(cell) = self.get(&r.id) else { continue };
            let slot = cell.read().await;
            if slot.is_available() {
                out.push(slot.clone());
            }
        }
        out
    }

    async fn slots_for(&self, professional_id: Ulid) -> Vec<TimeSlot> {
        let refs = self
            .calendars
            .get(&professional_id)
            .map(|c| c.value().clone())
            .unwrap_or_default();
        self.snapshot_of(&refs).await
    }

    async fn all_slots(&self) -> Vec<TimeSlot> {
        let cells: Vec<SharedSlot> = self.slots.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(cells.len());
        for cell in cells {
            out.push(cell.read().await.clone());
        }
        out.sort_by_key(|s| (s.professional_id, s.span.start));
        out
    }
}
