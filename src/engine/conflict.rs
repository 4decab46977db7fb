use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Build a candidate interval, rejecting empty, inverted or out-of-range windows.
pub fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if end <= start {
        return Err(EngineError::InvalidInterval { start, end });
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if end - start > MAX_SLOT_DURATION_MS {
        return Err(EngineError::LimitExceeded("slot too long"));
    }
    Ok(Span::new(start, end))
}

/// The first booked interval that `candidate` collides with once every booked
/// interval is widened by `buffer` on both ends.
///
/// `[a,b)` conflicts with booked `[c,d)` iff `a < d + buffer && c - buffer < b`.
/// A zero buffer still rejects plain overlap.
pub fn first_conflict<'a>(candidate: &Span, booked: &'a [Span], buffer: Ms) -> Option<&'a Span> {
    let buffer = buffer.max(0);
    booked
        .iter()
        .find(|b| candidate.start < b.end + buffer && b.start - buffer < candidate.end)
}

pub fn has_conflict(candidate: &Span, booked: &[Span], buffer: Ms) -> bool {
    first_conflict(candidate, booked, buffer).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Ms = 1_767_225_600_000; // 2026-01-01T00:00:00Z

    fn at(hour: Ms, minute: Ms) -> Ms {
        BASE + hour * HOUR_MS + minute * MINUTE_MS
    }

    fn span(h1: Ms, m1: Ms, h2: Ms, m2: Ms) -> Span {
        Span::new(at(h1, m1), at(h2, m2))
    }

    #[test]
    fn buffer_gap_shorter_than_policy_conflicts() {
        let booked = [span(10, 0, 10, 30)];
        assert!(has_conflict(&span(10, 40, 11, 10), &booked, 15 * MINUTE_MS));
    }

    #[test]
    fn buffer_gap_equal_to_policy_is_allowed() {
        let booked = [span(10, 0, 10, 30)];
        assert!(!has_conflict(&span(10, 45, 11, 15), &booked, 15 * MINUTE_MS));
    }

    #[test]
    fn buffer_applies_before_booked_interval() {
        let booked = [span(10, 0, 10, 30)];
        assert!(has_conflict(&span(9, 20, 9, 50), &booked, 15 * MINUTE_MS));
        assert!(!has_conflict(&span(9, 15, 9, 45), &booked, 15 * MINUTE_MS));
    }

    #[test]
    fn zero_buffer_is_plain_overlap() {
        let booked = [span(10, 0, 10, 30)];
        assert!(has_conflict(&span(10, 0, 10, 30), &booked, 0));
        assert!(has_conflict(&span(10, 29, 10, 59), &booked, 0));
        assert!(!has_conflict(&span(10, 30, 11, 0), &booked, 0)); // adjacent
        assert!(!has_conflict(&span(9, 30, 10, 0), &booked, 0));
    }

    #[test]
    fn negative_buffer_never_weakens_overlap_check() {
        let booked = [span(10, 0, 10, 30)];
        assert!(has_conflict(&span(10, 10, 10, 20), &booked, -5 * MINUTE_MS));
    }

    #[test]
    fn first_conflict_names_the_offender() {
        let booked = [span(8, 0, 8, 30), span(10, 0, 10, 30), span(12, 0, 12, 30)];
        let hit = first_conflict(&span(10, 35, 11, 0), &booked, 10 * MINUTE_MS);
        assert_eq!(hit, Some(&booked[1]));
        assert!(first_conflict(&span(11, 0, 11, 20), &booked, 10 * MINUTE_MS).is_none());
    }

    #[test]
    fn empty_booked_set_never_conflicts() {
        assert!(!has_conflict(&span(10, 0, 11, 0), &[], 60 * MINUTE_MS));
    }

    #[test]
    fn validate_span_rejects_inverted_and_empty() {
        assert!(matches!(
            validate_span(at(10, 0), at(10, 0)),
            Err(EngineError::InvalidInterval { .. })
        ));
        assert!(matches!(
            validate_span(at(11, 0), at(10, 0)),
            Err(EngineError::InvalidInterval { .. })
        ));
        assert_eq!(validate_span(at(10, 0), at(10, 30)).unwrap(), span(10, 0, 10, 30));
    }

    #[test]
    fn validate_span_rejects_out_of_range() {
        assert!(matches!(validate_span(0, 1_000), Err(EngineError::LimitExceeded(_))));
        assert!(matches!(
            validate_span(at(0, 0), at(0, 0) + 2 * DAY_MS),
            Err(EngineError::LimitExceeded("slot too long"))
        ));
    }
}
