use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use serde::Serialize;

/// Named time range that scopes a ranking or a claim history query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    #[default]
    All,
    Daily,
    Weekly,
    Monthly,
}

impl Window {
    /// Parses a window key case-insensitively.
    ///
    /// `all`, `overall` and `lifetime` are all-time aliases. Any key we don't recognize also
    /// falls back to all-time rather than being rejected.
    pub fn parse(key: &str) -> Self {
        match key.trim().to_ascii_lowercase().as_str() {
            "daily" => Window::Daily,
            "weekly" => Window::Weekly,
            "monthly" => Window::Monthly,
            _ => Window::All,
        }
    }

    pub fn from_query(key: Option<&str>) -> Self {
        key.map(Self::parse).unwrap_or_default()
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Window::All => "all",
            Window::Daily => "daily",
            Window::Weekly => "weekly",
            Window::Monthly => "monthly",
        }
    }

    /// Resolves the window into concrete bounds using the calendar of `now`'s time zone.
    ///
    /// Both bounds are computed in the same zone; the lower bound is inclusive and the upper
    /// bound (the start of the next window) is exclusive.
    pub fn resolve<Tz: TimeZone>(self, now: &DateTime<Tz>) -> WindowBounds<Tz> {
        let tz = now.timezone();
        let today = now.date_naive();

        let (start, end) = match self {
            Window::All => return WindowBounds::unbounded(),
            Window::Daily => (Some(today), today.succ_opt()),
            Window::Weekly => {
                let since_monday = u64::from(today.weekday().num_days_from_monday());
                let monday = today.checked_sub_days(Days::new(since_monday));
                (monday, monday.and_then(|m| m.checked_add_days(Days::new(7))))
            }
            Window::Monthly => (today.with_day(1), first_of_next_month(today)),
        };

        WindowBounds {
            lower: start.map(|d| start_of_day(&tz, d)),
            upper: end.map(|d| start_of_day(&tz, d)),
        }
    }
}

impl FromStr for Window {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Window::parse(s))
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct WindowBounds<Tz: TimeZone> {
    /// Inclusive; `None` means no lower filter (all-time)
    pub lower: Option<DateTime<Tz>>,
    /// Exclusive end of the window, only used for countdown display
    pub upper: Option<DateTime<Tz>>,
}

impl<Tz: TimeZone> WindowBounds<Tz> {
    pub fn unbounded() -> Self {
        Self {
            lower: None,
            upper: None,
        }
    }

    pub fn to_utc(&self) -> WindowBounds<Utc> {
        WindowBounds {
            lower: self.lower.as_ref().map(|dt| dt.with_timezone(&Utc)),
            upper: self.upper.as_ref().map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

/// First instant of `date` in `tz`.
///
/// An ambiguous midnight resolves to the earlier instant. A midnight skipped by a DST jump
/// resolves to the first local time after it that exists.
fn start_of_day<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Tz> {
    let midnight = date.and_time(NaiveTime::MIN);
    if let Some(dt) = tz.from_local_datetime(&midnight).earliest() {
        return dt;
    }

    (1..=96)
        .filter_map(|quarter| midnight.checked_add_signed(TimeDelta::minutes(15 * quarter)))
        .find_map(|t| tz.from_local_datetime(&t).earliest())
        .unwrap_or_else(|| tz.from_utc_datetime(&midnight))
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };

    NaiveDate::from_ymd_opt(year, month, 1)
}
