use chrono::NaiveDate;

/// Which side of a non-trading date to resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Past,
    Future,
}

/// Trading-calendar collaborator. The core never computes calendars itself;
/// it only asks for the nearest trading day within a bounded distance.
pub trait TradingCalendar {
    fn nearest_trading_day(&self, date: NaiveDate, direction: Direction) -> Option<NaiveDate>;
}

/// Calendar over an explicit sorted list of trading days, resolved by
/// binary search. Shifts beyond `max_shift_days` resolve to `None` so a
/// long market closure yields a missing value instead of a far-away match.
#[derive(Debug, Clone)]
pub struct SortedCalendar {
    days: Vec<NaiveDate>,
    max_shift_days: i64,
}

impl SortedCalendar {
    pub fn new(mut days: Vec<NaiveDate>) -> Self {
        days.sort_unstable();
        days.dedup();
        SortedCalendar {
            days,
            max_shift_days: 6,
        }
    }

    pub fn with_max_shift(mut self, max_shift_days: i64) -> Self {
        self.max_shift_days = max_shift_days;
        self
    }
}

impl TradingCalendar for SortedCalendar {
    fn nearest_trading_day(&self, date: NaiveDate, direction: Direction) -> Option<NaiveDate> {
        let candidate = match direction {
            Direction::Past => {
                let idx = self.days.partition_point(|d| *d <= date);
                if idx == 0 {
                    return None;
                }
                self.days[idx - 1]
            }
            Direction::Future => {
                let idx = self.days.partition_point(|d| *d < date);
                if idx == self.days.len() {
                    return None;
                }
                self.days[idx]
            }
        };
        let shift = (candidate - date).num_days().abs();
        if shift > self.max_shift_days {
            None
        } else {
            Some(candidate)
        }
    }
}

/// Snap a batch of query dates onto the trading grid. The sign of `offset`
/// picks the side: a positive offset (forward-looking statistic) resolves
/// to the next trading day, anything else to the previous one.
pub fn snap_dates(
    dates: &[Option<NaiveDate>],
    calendar: &dyn TradingCalendar,
    offset: i64,
) -> Vec<Option<NaiveDate>> {
    let direction = if offset > 0 {
        Direction::Future
    } else {
        Direction::Past
    };
    dates
        .iter()
        .map(|d| d.and_then(|d| calendar.nearest_trading_day(d, direction)))
        .collect()
}
