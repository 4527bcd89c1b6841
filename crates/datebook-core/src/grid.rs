//! Month-grid and date-range arithmetic.
//!
//! Everything here is a pure function of its inputs: the current date is
//! always an explicit parameter, never read from a clock, so callers and
//! tests get the same answer for the same arguments.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::item::Item;

/// One day square in the month view, including leading/trailing days pulled
/// in from adjacent months to complete the first and last week rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarCell {
    pub date: NaiveDate,
    pub in_current_month: bool,
    pub is_today: bool,
    pub is_selected: bool,
}

/// The rectangular span of whole weeks covering one calendar month.
///
/// Construction fixes `grid_start`/`grid_end`; the day sequence itself is
/// produced lazily and can be re-iterated any number of times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthGrid {
    year: i32,
    month: u32,
    grid_start: NaiveDate,
    grid_end: NaiveDate,
}

impl MonthGrid {
    pub fn new(reference: NaiveDate, week_start: Weekday) -> Self {
        let year = reference.year();
        let month = reference.month();
        let month_start = first_day_of_month(year, month);
        let month_end = last_day_of_month(year, month);
        let grid_start = start_of_week(month_start, week_start);
        let grid_end = add_days(start_of_week(month_end, week_start), 6);

        Self {
            year,
            month,
            grid_start,
            grid_end,
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn grid_start(&self) -> NaiveDate {
        self.grid_start
    }

    pub fn grid_end(&self) -> NaiveDate {
        self.grid_end
    }

    /// Number of 7-day rows, 4 through 6 depending on month length and
    /// starting weekday.
    pub fn weeks(&self) -> usize {
        let days = (self.grid_end - self.grid_start).num_days() + 1;
        (days / 7) as usize
    }

    pub fn in_current_month(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    /// Consecutive dates from `grid_start` through `grid_end` inclusive.
    pub fn days(self) -> impl Iterator<Item = NaiveDate> {
        let end = self.grid_end;
        std::iter::successors(Some(self.grid_start), move |date| {
            if *date >= end {
                None
            } else {
                Some(add_days(*date, 1))
            }
        })
    }

    /// The day sequence decorated for display against an explicit `today`
    /// and optional selection.
    pub fn cells(
        self,
        today: NaiveDate,
        selected: Option<NaiveDate>,
    ) -> impl Iterator<Item = CalendarCell> {
        self.days().map(move |date| CalendarCell {
            date,
            in_current_month: self.in_current_month(date),
            is_today: date == today,
            is_selected: selected == Some(date),
        })
    }
}

/// Whole-day membership test for an item's date span.
///
/// Without an end date the span is the single anchor day. With one, the span
/// is inclusive on both sides; an end before the start therefore matches no
/// day at all, which is accepted data rather than an error.
pub fn is_date_in_range(date: NaiveDate, start_date: NaiveDate, end_date: Option<NaiveDate>) -> bool {
    match end_date {
        Some(end) => start_date <= date && date <= end,
        None => date == start_date,
    }
}

/// Stable filter of the collection down to the items visible on `date`.
/// Undated items never appear here; relative order is preserved.
pub fn items_on_day(items: &[Item], date: NaiveDate) -> Vec<&Item> {
    items
        .iter()
        .filter(|item| {
            item.start_date
                .map(|start| is_date_in_range(date, start, item.end_date))
                .unwrap_or(false)
        })
        .collect()
}

/// The floating set: items with no anchor date, in original order.
pub fn undated_items(items: &[Item]) -> Vec<&Item> {
    items.iter().filter(|item| item.start_date.is_none()).collect()
}

/// Calendar month addition with day-of-month clamping, so Jan 31 plus one
/// month lands on the last day of February instead of rolling into March.
pub fn shift_months(date: NaiveDate, months: i32) -> NaiveDate {
    let mut year = date.year();
    let mut month = date.month() as i32 + months;

    while month < 1 {
        month += 12;
        year = year.saturating_sub(1);
    }
    while month > 12 {
        month -= 12;
        year = year.saturating_add(1);
    }

    let month = month as u32;
    let day = date.day().min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(date)
}

pub fn first_day_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

pub fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month >= 12 {
        (year.saturating_add(1), 1_u32)
    } else {
        (year, month + 1)
    };
    add_days(first_day_of_month(next_year, next_month), -1)
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    last_day_of_month(year, month).day()
}

pub fn start_of_week(day: NaiveDate, week_start: Weekday) -> NaiveDate {
    let day_idx = day.weekday().num_days_from_monday() as i64;
    let start_idx = week_start.num_days_from_monday() as i64;
    let diff = (7 + day_idx - start_idx) % 7;
    add_days(day, -diff)
}

fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    date.checked_add_signed(Duration::days(days)).unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, NaiveDate, Utc, Weekday};

    use super::{
        MonthGrid, is_date_in_range, items_on_day, shift_months, undated_items,
    };
    use crate::item::Item;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn dated_item(id: u64, text: &str, start: NaiveDate, end: Option<NaiveDate>) -> Item {
        let mut item = Item::new(text.to_string(), Utc::now(), id);
        item.start_date = Some(start);
        item.end_date = end;
        item
    }

    #[test]
    fn grid_is_whole_weeks_aligned_to_week_start() {
        for (y, m) in [(2024, 2), (2024, 3), (2025, 2), (2026, 8), (2023, 12)] {
            for week_start in [Weekday::Sun, Weekday::Mon] {
                let grid = MonthGrid::new(day(y, m, 15), week_start);
                let days: Vec<NaiveDate> = grid.days().collect();

                assert_eq!(days.len() % 7, 0, "{y}-{m} not whole weeks");
                assert!((4..=6).contains(&grid.weeks()), "{y}-{m} row count");
                assert_eq!(days[0].weekday(), week_start);
                assert_eq!(days[days.len() - 1], grid.grid_end());
                assert_eq!(days[0], grid.grid_start());
            }
        }
    }

    #[test]
    fn grid_days_are_consecutive_and_restartable() {
        let grid = MonthGrid::new(day(2024, 3, 10), Weekday::Sun);
        let first: Vec<NaiveDate> = grid.days().collect();
        let second: Vec<NaiveDate> = grid.days().collect();
        assert_eq!(first, second);

        for pair in first.windows(2) {
            assert_eq!((pair[1] - pair[0]).num_days(), 1);
        }
    }

    #[test]
    fn in_current_month_marks_exactly_the_reference_month() {
        let grid = MonthGrid::new(day(2024, 3, 10), Weekday::Sun);
        for cell in grid.cells(day(2024, 3, 10), None) {
            let expected = cell.date.year() == 2024 && cell.date.month() == 3;
            assert_eq!(cell.in_current_month, expected, "{}", cell.date);
        }

        // March 2024 under a Sunday start leads with Feb 25..29.
        let leading: Vec<NaiveDate> = grid.days().take(5).collect();
        assert_eq!(leading[0], day(2024, 2, 25));
        assert!(leading.iter().all(|d| d.month() == 2));
    }

    #[test]
    fn today_and_selected_flags_hit_one_cell_each() {
        let grid = MonthGrid::new(day(2024, 3, 10), Weekday::Mon);
        let today = day(2024, 3, 7);
        let selected = day(2024, 3, 21);

        let cells: Vec<_> = grid.cells(today, Some(selected)).collect();
        assert_eq!(cells.iter().filter(|c| c.is_today).count(), 1);
        assert_eq!(cells.iter().filter(|c| c.is_selected).count(), 1);
        assert!(cells.iter().any(|c| c.is_today && c.date == today));
        assert!(cells.iter().any(|c| c.is_selected && c.date == selected));
    }

    #[test]
    fn single_day_item_matches_exactly_one_date() {
        let anchor = day(2024, 3, 2);
        let grid = MonthGrid::new(anchor, Weekday::Sun);

        let matched: Vec<NaiveDate> = grid
            .days()
            .filter(|d| is_date_in_range(*d, anchor, None))
            .collect();
        assert_eq!(matched, vec![anchor]);

        let matched_same_end: Vec<NaiveDate> = grid
            .days()
            .filter(|d| is_date_in_range(*d, anchor, Some(anchor)))
            .collect();
        assert_eq!(matched_same_end, vec![anchor]);
    }

    #[test]
    fn ranged_item_matches_inclusive_span() {
        let start = day(2024, 3, 1);
        let end = day(2024, 3, 3);

        let matched: Vec<NaiveDate> = MonthGrid::new(start, Weekday::Sun)
            .days()
            .filter(|d| is_date_in_range(*d, start, Some(end)))
            .collect();
        assert_eq!(matched, vec![day(2024, 3, 1), day(2024, 3, 2), day(2024, 3, 3)]);
    }

    #[test]
    fn inverted_range_matches_nothing() {
        let start = day(2024, 3, 10);
        let end = day(2024, 3, 1);
        assert!(
            MonthGrid::new(start, Weekday::Sun)
                .days()
                .all(|d| !is_date_in_range(d, start, Some(end)))
        );
    }

    #[test]
    fn month_shift_clamps_day_overflow() {
        assert_eq!(shift_months(day(2024, 1, 31), 1), day(2024, 2, 29));
        assert_eq!(shift_months(day(2023, 1, 31), 1), day(2023, 2, 28));
        assert_eq!(shift_months(day(2024, 3, 31), -1), day(2024, 2, 29));
        assert_eq!(shift_months(day(2024, 10, 31), 2), day(2024, 12, 31));
        assert_eq!(shift_months(day(2024, 12, 15), 1), day(2025, 1, 15));
        assert_eq!(shift_months(day(2024, 1, 15), -2), day(2023, 11, 15));
    }

    #[test]
    fn month_navigation_round_trips_the_grid() {
        let reference = day(2024, 5, 17);
        let original = MonthGrid::new(reference, Weekday::Sun);

        for delta in [1, 3, 11, 25] {
            let there = shift_months(reference, delta);
            let back = shift_months(there, -delta);
            assert_eq!(MonthGrid::new(back, Weekday::Sun), original, "delta {delta}");
        }
    }

    #[test]
    fn day_partition_is_stable_and_skips_undated() {
        let items = vec![
            dated_item(1, "first", day(2024, 3, 1), Some(day(2024, 3, 3))),
            Item::new("floating".to_string(), Utc::now(), 2),
            dated_item(3, "second", day(2024, 3, 2), None),
            dated_item(4, "elsewhere", day(2024, 3, 9), None),
        ];

        let on_day: Vec<&str> = items_on_day(&items, day(2024, 3, 2))
            .iter()
            .map(|item| item.text.as_str())
            .collect();
        assert_eq!(on_day, vec!["first", "second"]);

        let floating: Vec<&str> = undated_items(&items)
            .iter()
            .map(|item| item.text.as_str())
            .collect();
        assert_eq!(floating, vec!["floating"]);
    }

    #[test]
    fn day_partition_of_empty_collection_is_empty() {
        assert!(items_on_day(&[], day(2024, 3, 2)).is_empty());
        assert!(undated_items(&[]).is_empty());
    }
}
