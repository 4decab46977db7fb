use ulid::Ulid;

use crate::limits::MAX_SUGGESTION_LIMIT;
use crate::model::*;
use crate::observability::SUGGESTIONS_RETURNED;

use super::Engine;
use super::conflict::has_conflict;

impl Engine {
    /// Alternative slots for `professional_id` starting after `from`.
    ///
    /// Takes the first `limit` AVAILABLE slots starting inside the suggestion
    /// window, then drops those that collide with a booked interval once the
    /// buffer is applied. The result can be shorter than `limit`. Nothing is
    /// reserved; a suggested slot may be gone by the time it is booked.
    pub async fn suggest(
        &self,
        professional_id: Ulid,
        from: Ms,
        exclude_slot_id: Option<Ulid>,
        limit: Option<usize>,
    ) -> Vec<TimeSlot> {
        let limit = limit
            .unwrap_or(self.policy.suggestion_limit)
            .min(MAX_SUGGESTION_LIMIT);
        if limit == 0 {
            return Vec::new();
        }
        let horizon = from.saturating_add(self.policy.suggestion_window_ms);
        let candidates = self
            .ledger
            .available_slots(professional_id, from, horizon, limit)
            .await;

        let (Some(first), Some(last_end)) = (
            candidates.first(),
            candidates.iter().map(|s| s.span.end).max(),
        ) else {
            metrics::histogram!(SUGGESTIONS_RETURNED).record(0.0);
            return Vec::new();
        };

        let buffer = self.policy.buffer_ms;
        let window = Span::new(first.span.start - buffer, last_end + buffer);
        let exclude: Vec<Ulid> = exclude_slot_id.into_iter().collect();
        let booked = self
            .ledger
            .booked_spans(professional_id, window, &exclude)
            .await;

        let suggestions: Vec<TimeSlot> = candidates
            .into_iter()
            .filter(|c| !has_conflict(&c.span, &booked, buffer))
            .collect();
        metrics::histogram!(SUGGESTIONS_RETURNED).record(suggestions.len() as f64);
        suggestions
    }
}
