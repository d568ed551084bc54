use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Boundary check for a caller-supplied interval.
pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    let span = Span::try_new(start, end).ok_or(EngineError::Validation("start must be before end"))?;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(span)
}

/// First reservation (in iteration order) that shares any instant with
/// `candidate` under half-open semantics. Cancelled entries are ignored.
pub fn find_conflict<'a, I>(existing: I, candidate: &Span) -> Option<ReservationId>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    existing
        .into_iter()
        .find(|r| r.is_active() && r.span.overlaps(candidate))
        .map(|r| r.id)
}

/// `[s, e)` conflicts with `[cs, ce)` iff `cs < e && s < ce`. Back-to-back
/// spans do not conflict; identical, partial and containing spans do.
pub fn conflicts<'a, I>(existing: I, candidate: &Span) -> bool
where
    I: IntoIterator<Item = &'a Reservation>,
{
    find_conflict(existing, candidate).is_some()
}

pub(crate) fn check_no_conflict(rs: &ResourceState, span: &Span) -> Result<(), EngineError> {
    match find_conflict(rs.active_overlapping(span), span) {
        Some(id) => Err(EngineError::Conflict(id)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use ulid::Ulid;

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;
    const DAY: Ms = 1_709_251_200_000; // 2024-03-01T00:00Z

    fn confirmed(start: Ms, end: Ms) -> Reservation {
        Reservation {
            id: Ulid::new(),
            resource_id: Ulid::nil(),
            span: Span::new(start, end),
            holder: "erin".into(),
            notes: String::new(),
            status: Status::Confirmed,
            priority: None,
        }
    }

    fn at(hour: Ms, minute: Ms) -> Ms {
        DAY + hour * H + minute * M
    }

    #[test]
    fn back_to_back_does_not_conflict() {
        let existing = [confirmed(at(9, 0), at(10, 0))];
        assert!(!conflicts(&existing, &Span::new(at(10, 0), at(11, 0))));
        assert!(!conflicts(&existing, &Span::new(at(8, 0), at(9, 0))));
    }

    #[test]
    fn containment_conflicts_both_ways() {
        let inner = [confirmed(at(9, 30), at(10, 30))];
        assert!(conflicts(&inner, &Span::new(at(9, 0), at(11, 0))));
        let outer = [confirmed(at(9, 0), at(11, 0))];
        assert!(conflicts(&outer, &Span::new(at(9, 30), at(10, 30))));
    }

    #[test]
    fn partial_overlap_conflicts() {
        let existing = [confirmed(at(9, 30), at(10, 30))];
        assert!(conflicts(&existing, &Span::new(at(9, 0), at(10, 0))));
        assert!(conflicts(&existing, &Span::new(at(10, 0), at(11, 0))));
    }

    #[test]
    fn identical_span_conflicts() {
        let existing = [confirmed(at(9, 0), at(10, 0))];
        assert!(conflicts(&existing, &Span::new(at(9, 0), at(10, 0))));
    }

    #[test]
    fn shared_start_conflicts() {
        let existing = [confirmed(at(9, 0), at(10, 0))];
        assert!(conflicts(&existing, &Span::new(at(9, 0), at(9, 15))));
    }

    #[test]
    fn cancelled_is_ignored() {
        let mut r = confirmed(at(9, 0), at(10, 0));
        r.status = Status::Cancelled;
        assert!(!conflicts([&r], &Span::new(at(9, 0), at(10, 0))));
    }

    #[test]
    fn find_conflict_reports_first_hit() {
        let a = confirmed(at(9, 0), at(10, 0));
        let b = confirmed(at(9, 30), at(11, 0));
        assert_eq!(find_conflict([&a, &b], &Span::new(at(9, 45), at(10, 15))), Some(a.id));
        assert_eq!(find_conflict([&a, &b], &Span::new(at(10, 0), at(10, 15))), Some(b.id));
    }

    #[test]
    fn validate_rejects_empty_and_inverted() {
        assert!(matches!(
            validate_span(at(10, 0), at(10, 0)),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            validate_span(at(10, 0), at(9, 0)),
            Err(EngineError::Validation(_))
        ));
        assert!(validate_span(at(9, 0), at(10, 0)).is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range() {
        assert!(matches!(
            validate_span(0, 1000),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_span(DAY, DAY + MAX_SPAN_DURATION_MS + 1),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    fn span_strategy() -> impl Strategy<Value = Span> {
        (0i64..200, 1i64..50).prop_map(|(start, len)| Span::new(start, start + len))
    }

    proptest! {
        #[test]
        fn overlap_is_symmetric(a in span_strategy(), b in span_strategy()) {
            let ra = [confirmed(a.start, a.end)];
            let rb = [confirmed(b.start, b.end)];
            prop_assert_eq!(conflicts(&ra, &b), conflicts(&rb, &a));
        }

        #[test]
        fn overlap_is_reflexive(a in span_strategy()) {
            prop_assert!(conflicts(&[confirmed(a.start, a.end)], &a));
        }

        #[test]
        fn overlap_matches_shared_instant(a in span_strategy(), b in span_strategy()) {
            let shares_instant = (a.start..a.end).any(|t| b.contains_instant(t));
            prop_assert_eq!(conflicts(&[confirmed(a.start, a.end)], &b), shares_instant);
        }
    }
}
