//! Roll-forward arithmetic for recurring events.
//!
//! Month and year steps clamp the day of month to the end of a shorter
//! month: Jan 31 + 1 month is Feb 28 (or 29), Feb 29 + 1 year is Feb 28.
//! Time of day is kept.

use {
    chrono::{DateTime, Days, Months, Utc},
    tracing::debug,
};

use crate::{
    error::{Error, Result},
    types::Recurrence,
};

/// Next occurrence of `at` under `rule`.
///
/// Fails with [`Error::MalformedRecurrence`] for [`Recurrence::None`] and when
/// the result falls outside the representable date range.
pub fn next_occurrence(at: DateTime<Utc>, rule: Recurrence) -> Result<DateTime<Utc>> {
    let next = match rule {
        Recurrence::None => None,
        Recurrence::Daily => at.checked_add_days(Days::new(1)),
        Recurrence::Weekly => at.checked_add_days(Days::new(7)),
        Recurrence::Biweekly => at.checked_add_days(Days::new(14)),
        Recurrence::Monthly => at.checked_add_months(Months::new(1)),
        Recurrence::Yearly => at.checked_add_months(Months::new(12)),
    };
    next.ok_or_else(|| Error::MalformedRecurrence {
        rule: rule.as_str().to_string(),
    })
}

/// Advance both ends of an occurrence with the same rule.
pub fn roll_forward(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    rule: Recurrence,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let new_start = next_occurrence(start, rule)?;
    let new_end = next_occurrence(end, rule)?;
    debug!(%rule, %start, %new_start, "rolled occurrence forward");
    Ok((new_start, new_end.max(new_start)))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, chrono::TimeZone, rstest::rstest};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[rstest]
    #[case(Recurrence::Daily, at(2025, 1, 2, 10, 0))]
    #[case(Recurrence::Weekly, at(2025, 1, 8, 10, 0))]
    #[case(Recurrence::Biweekly, at(2025, 1, 15, 10, 0))]
    #[case(Recurrence::Monthly, at(2025, 2, 1, 10, 0))]
    #[case(Recurrence::Yearly, at(2026, 1, 1, 10, 0))]
    fn steps(#[case] rule: Recurrence, #[case] expected: DateTime<Utc>) {
        assert_eq!(
            next_occurrence(at(2025, 1, 1, 10, 0), rule).unwrap(),
            expected
        );
    }

    #[test]
    fn none_is_malformed() {
        let err = next_occurrence(at(2025, 1, 1, 10, 0), Recurrence::None).unwrap_err();
        assert!(matches!(err, Error::MalformedRecurrence { .. }));
    }

    #[test]
    fn weekly_twice_is_fourteen_days() {
        let start = at(2025, 3, 28, 23, 30);
        let once = next_occurrence(start, Recurrence::Weekly).unwrap();
        let twice = next_occurrence(once, Recurrence::Weekly).unwrap();
        assert_eq!(twice - start, chrono::Duration::days(14));
        assert_eq!(
            twice,
            next_occurrence(start, Recurrence::Biweekly).unwrap()
        );
    }

    #[rstest]
    #[case(at(2025, 1, 31, 9, 0), at(2025, 2, 28, 9, 0))]
    #[case(at(2024, 1, 31, 9, 0), at(2024, 2, 29, 9, 0))]
    #[case(at(2025, 3, 31, 9, 0), at(2025, 4, 30, 9, 0))]
    #[case(at(2025, 12, 31, 9, 0), at(2026, 1, 31, 9, 0))]
    fn monthly_clamps_to_month_end(#[case] from: DateTime<Utc>, #[case] expected: DateTime<Utc>) {
        assert_eq!(next_occurrence(from, Recurrence::Monthly).unwrap(), expected);
    }

    #[test]
    fn yearly_from_leap_day_clamps() {
        assert_eq!(
            next_occurrence(at(2024, 2, 29, 8, 15), Recurrence::Yearly).unwrap(),
            at(2025, 2, 28, 8, 15)
        );
    }

    #[test]
    fn roll_forward_preserves_duration() {
        let (start, end) =
            roll_forward(at(2025, 1, 1, 10, 0), at(2025, 1, 1, 11, 0), Recurrence::Weekly)
                .unwrap();
        assert_eq!(start, at(2025, 1, 8, 10, 0));
        assert_eq!(end, at(2025, 1, 8, 11, 0));
    }

    #[test]
    fn roll_forward_keeps_end_after_start_when_clamped() {
        // Start clamps from Jan 30 to Feb 28, end from Jan 31 to Feb 28.
        let (start, end) =
            roll_forward(at(2025, 1, 30, 22, 0), at(2025, 1, 31, 2, 0), Recurrence::Monthly)
                .unwrap();
        assert_eq!(start, at(2025, 2, 28, 22, 0));
        assert!(end >= start);
    }
}
