//! Calendar arithmetic for billing frequencies.
//!
//! Every date computation on a subscription schedule goes through
//! [`advance`]. Intervals are calendar based: day-count frequencies add whole
//! days, `monthly` adds calendar months and clamps to the last valid day
//! (Jan 31 + 1 month = Feb 28/29).

use chrono::{Days, Months, NaiveDate};

use crate::model::Frequency;

/// Length of one interval of a frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Days(u64),
    Months(u32),
}

impl Frequency {
    pub const fn interval(&self) -> Interval {
        match self {
            Frequency::Weekly => Interval::Days(7),
            Frequency::Biweekly => Interval::Days(14),
            Frequency::FourWeeks => Interval::Days(28),
            Frequency::SixWeeks => Interval::Days(42),
            Frequency::EightWeeks => Interval::Days(56),
            Frequency::Monthly => Interval::Months(1),
        }
    }
}

/// Move `date` forward by `cycles` intervals of `frequency`.
///
/// Monthly steps are computed from the original day-of-month in one
/// addition, so Jan 31 + 2 months is Mar 31, not Mar 28.
/// Saturates at [`NaiveDate::MAX`].
pub fn advance(date: NaiveDate, frequency: Frequency, cycles: u32) -> NaiveDate {
    let next = match frequency.interval() {
        Interval::Days(days) => date.checked_add_days(Days::new(days * cycles as u64)),
        Interval::Months(months) => date.checked_add_months(Months::new(months * cycles)),
    };
    next.unwrap_or(NaiveDate::MAX)
}

/// One interval after `date`.
pub fn next_after(date: NaiveDate, frequency: Frequency) -> NaiveDate {
    advance(date, frequency, 1)
}

/// Add a plain number of days, saturating.
pub fn add_days(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_add_days(Days::new(days as u64))
        .unwrap_or(NaiveDate::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_day_count_frequencies() {
        let start = date(2025, 3, 10);
        assert_eq!(next_after(start, Frequency::Weekly), date(2025, 3, 17));
        assert_eq!(next_after(start, Frequency::Biweekly), date(2025, 3, 24));
        assert_eq!(next_after(start, Frequency::FourWeeks), date(2025, 4, 7));
        assert_eq!(next_after(start, Frequency::SixWeeks), date(2025, 4, 21));
        assert_eq!(next_after(start, Frequency::EightWeeks), date(2025, 5, 5));
    }

    #[test]
    fn test_monthly_preserves_day_of_month() {
        assert_eq!(next_after(date(2025, 1, 1), Frequency::Monthly), date(2025, 2, 1));
        assert_eq!(next_after(date(2025, 6, 15), Frequency::Monthly), date(2025, 7, 15));
    }

    #[test]
    fn test_monthly_clamps_to_month_end() {
        assert_eq!(next_after(date(2025, 1, 31), Frequency::Monthly), date(2025, 2, 28));
        assert_eq!(next_after(date(2024, 1, 31), Frequency::Monthly), date(2024, 2, 29));
        assert_eq!(next_after(date(2025, 3, 31), Frequency::Monthly), date(2025, 4, 30));
    }

    #[test]
    fn test_multi_cycle_monthly_uses_original_day() {
        assert_eq!(advance(date(2025, 1, 31), Frequency::Monthly, 2), date(2025, 3, 31));
    }

    #[test]
    fn test_weekly_two_cycles() {
        assert_eq!(advance(date(2025, 2, 24), Frequency::Weekly, 2), date(2025, 3, 10));
    }

    #[test]
    fn test_crosses_year_boundary() {
        assert_eq!(next_after(date(2025, 12, 25), Frequency::Biweekly), date(2026, 1, 8));
        assert_eq!(next_after(date(2025, 12, 31), Frequency::Monthly), date(2026, 1, 31));
    }

    #[test]
    fn test_saturates() {
        assert_eq!(next_after(NaiveDate::MAX, Frequency::Weekly), NaiveDate::MAX);
        assert_eq!(add_days(NaiveDate::MAX, 3), NaiveDate::MAX);
    }
}
