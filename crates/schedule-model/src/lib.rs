//! Weekly display schedule: weekday keys mapped to `HH:MM-HH:MM` minute ranges.
//!
//! Ranges are parsed leniently. A malformed entry is recorded as rejected and
//! skipped; the remaining ranges of the same day still apply.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration as ChronoDuration, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::{Serialize, Serializer};
use thiserror::Error;

pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// How far ahead `next_transition_after` looks before giving up.
const TRANSITION_HORIZON_DAYS: i64 = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("expected HH:MM-HH:MM")]
    Shape,
    #[error("invalid time '{0}'")]
    Time(String),
    #[error("start {start} is not before end {end}")]
    NotIncreasing { start: String, end: String },
}

/// Half-open `[start, end)` window in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MinuteRange {
    start: u16,
    end: u16,
}

impl MinuteRange {
    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn contains(&self, minute: u16) -> bool {
        self.start <= minute && minute < self.end
    }
}

impl FromStr for MinuteRange {
    type Err = RangeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (start_raw, end_raw) = raw.trim().split_once('-').ok_or(RangeError::Shape)?;
        let start = parse_clock(start_raw, false)?;
        let end = parse_clock(end_raw, true)?;
        if start >= end {
            return Err(RangeError::NotIncreasing {
                start: start_raw.trim().to_string(),
                end: end_raw.trim().to_string(),
            });
        }
        Ok(Self { start, end })
    }
}

impl fmt::Display for MinuteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", format_minute(self.start), format_minute(self.end))
    }
}

impl Serialize for MinuteRange {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

fn format_minute(minute: u16) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

/// Parses `HH:MM` as decimal digits. `24:00` is only accepted as an end time.
fn parse_clock(raw: &str, allow_end_of_day: bool) -> Result<u16, RangeError> {
    let trimmed = raw.trim();
    let invalid = || RangeError::Time(trimmed.to_string());
    let (hours, minutes) = trimmed.split_once(':').ok_or_else(invalid)?;
    let digits = |part: &str| -> Result<u16, RangeError> {
        if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        part.parse::<u16>().map_err(|_| invalid())
    };
    let hours = digits(hours)?;
    let minutes = digits(minutes)?;
    if minutes >= 60 {
        return Err(invalid());
    }
    match hours {
        0..=23 => Ok(hours * 60 + minutes),
        24 if allow_end_of_day && minutes == 0 => Ok(MINUTES_PER_DAY),
        _ => Err(invalid()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRange {
    pub raw: String,
    #[serde(serialize_with = "serialize_display")]
    pub error: RangeError,
}

fn serialize_display<S>(value: &RangeError, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(value)
}

/// Ranges configured for one weekday, in the order they were written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DaySchedule {
    ranges: Vec<MinuteRange>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    rejected: Vec<RejectedRange>,
}

impl DaySchedule {
    /// Parses a comma-separated list such as `08:00-12:00, 13:00-17:30`.
    pub fn parse(raw: &str) -> Self {
        let mut day = Self::default();
        for part in raw.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.parse::<MinuteRange>() {
                Ok(range) => day.ranges.push(range),
                Err(error) => day.rejected.push(RejectedRange {
                    raw: part.to_string(),
                    error,
                }),
            }
        }
        day
    }

    pub fn ranges(&self) -> &[MinuteRange] {
        &self.ranges
    }

    pub fn rejected(&self) -> &[RejectedRange] {
        &self.rejected
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Overlapping ranges are tolerated; the first match wins.
    pub fn is_active_at_minute(&self, minute: u16) -> bool {
        self.ranges.iter().any(|range| range.contains(minute))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Transition {
    pub at: NaiveDateTime,
    pub active: bool,
    #[serde(serialize_with = "serialize_weekday")]
    pub weekday: Weekday,
}

fn serialize_weekday<S>(value: &Weekday, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(value)
}

/// Weekday to day-schedule table. Days without an entry are inactive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleTable {
    days: [Option<DaySchedule>; 7],
}

impl ScheduleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_day(&mut self, weekday: Weekday, raw: &str) -> &DaySchedule {
        let slot = &mut self.days[weekday.num_days_from_monday() as usize];
        slot.insert(DaySchedule::parse(raw))
    }

    pub fn day(&self, weekday: Weekday) -> Option<&DaySchedule> {
        self.days[weekday.num_days_from_monday() as usize].as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.days
            .iter()
            .all(|day| day.as_ref().is_none_or(DaySchedule::is_empty))
    }

    pub fn rejected(&self) -> impl Iterator<Item = (Weekday, &RejectedRange)> {
        ALL_WEEKDAYS
            .iter()
            .filter_map(move |weekday| self.day(*weekday).map(|day| (*weekday, day)))
            .flat_map(|(weekday, day)| day.rejected().iter().map(move |r| (weekday, r)))
    }

    pub fn is_active_at<T>(&self, now: &T) -> bool
    where
        T: Datelike + Timelike,
    {
        let minute = (now.hour() * 60 + now.minute()) as u16;
        self.day(now.weekday())
            .is_some_and(|day| day.is_active_at_minute(minute))
    }

    /// First minute boundary after `now` at which the active state flips.
    pub fn next_transition_after(&self, now: NaiveDateTime) -> Option<Transition> {
        let current = self.is_active_at(&now);
        let mut cursor = truncate_to_minute(now);
        let limit = cursor + ChronoDuration::days(TRANSITION_HORIZON_DAYS);
        while cursor < limit {
            cursor += ChronoDuration::minutes(1);
            let active = self.is_active_at(&cursor);
            if active != current {
                return Some(Transition {
                    at: cursor,
                    active,
                    weekday: cursor.weekday(),
                });
            }
        }
        None
    }

    pub fn transitions_within(&self, from: NaiveDateTime, window: ChronoDuration) -> Vec<Transition> {
        let until = from + window;
        let mut transitions = Vec::new();
        let mut cursor = from;
        while let Some(next) = self.next_transition_after(cursor) {
            if next.at > until {
                break;
            }
            cursor = next.at;
            transitions.push(next);
        }
        transitions
    }
}

const ALL_WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

fn truncate_to_minute(instant: NaiveDateTime) -> NaiveDateTime {
    let time = NaiveTime::from_hms_opt(instant.hour(), instant.minute(), 0).unwrap_or(instant.time());
    NaiveDateTime::new(instant.date(), time)
}

/// Maps `mon`/`monday` style keys (any case) to a weekday.
pub fn parse_weekday_key(key: &str) -> Option<Weekday> {
    match key.trim().to_ascii_lowercase().as_str() {
        "mon" | "monday" => Some(Weekday::Mon),
        "tue" | "tues" | "tuesday" => Some(Weekday::Tue),
        "wed" | "wednesday" => Some(Weekday::Wed),
        "thu" | "thur" | "thurs" | "thursday" => Some(Weekday::Thu),
        "fri" | "friday" => Some(Weekday::Fri),
        "sat" | "saturday" => Some(Weekday::Sat),
        "sun" | "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(hh, mm, 0)
            .unwrap()
    }

    #[test]
    fn parses_leading_zeros_as_decimal() {
        let range: MinuteRange = "08:09-09:08".parse().unwrap();
        assert_eq!(range.start(), 8 * 60 + 9);
        assert_eq!(range.end(), 9 * 60 + 8);
        assert_eq!(range.to_string(), "08:09-09:08");
    }

    #[test]
    fn rejects_reversed_and_malformed_ranges() {
        assert!(matches!(
            "12:00-08:00".parse::<MinuteRange>(),
            Err(RangeError::NotIncreasing { .. })
        ));
        assert!(matches!(
            "09:00-09:00".parse::<MinuteRange>(),
            Err(RangeError::NotIncreasing { .. })
        ));
        assert_eq!("0800-0900".parse::<MinuteRange>(), Err(RangeError::Time("0800".into())));
        assert_eq!("morning".parse::<MinuteRange>(), Err(RangeError::Shape));
        assert!("25:00-26:00".parse::<MinuteRange>().is_err());
        assert!("24:00-24:30".parse::<MinuteRange>().is_err());
    }

    #[test]
    fn end_of_day_is_accepted_as_end() {
        let range: MinuteRange = "18:00-24:00".parse().unwrap();
        assert_eq!(range.end(), MINUTES_PER_DAY);
        assert!(range.contains(23 * 60 + 59));
    }

    #[test]
    fn malformed_ranges_are_skipped_individually() {
        let day = DaySchedule::parse("08:00-09:00, nonsense, 17:00-16:00,13:00-14:00");
        assert_eq!(day.ranges().len(), 2);
        assert_eq!(day.rejected().len(), 2);
        assert!(day.is_active_at_minute(13 * 60 + 30));
    }

    #[test]
    fn weekday_keys_accept_short_and_long_names() {
        assert_eq!(parse_weekday_key("Mon"), Some(Weekday::Mon));
        assert_eq!(parse_weekday_key("thursday"), Some(Weekday::Thu));
        assert_eq!(parse_weekday_key("someday"), None);
    }

    #[test]
    fn missing_or_empty_day_is_inactive() {
        let mut table = ScheduleTable::new();
        table.set_day(Weekday::Tue, "");
        // 2024-01-01 is a Monday.
        assert!(!table.is_active_at(&at(2024, 1, 1, 10, 0)));
        assert!(!table.is_active_at(&at(2024, 1, 2, 10, 0)));
        assert!(table.is_empty());
    }

    #[test]
    fn next_transition_crosses_days() {
        let mut table = ScheduleTable::new();
        table.set_day(Weekday::Wed, "09:30-10:00");
        let monday_noon = at(2024, 1, 1, 12, 0);
        let next = table.next_transition_after(monday_noon).expect("transition");
        assert_eq!(next.at, at(2024, 1, 3, 9, 30));
        assert!(next.active);
        assert_eq!(next.weekday, Weekday::Wed);

        let end = table.next_transition_after(next.at).expect("end");
        assert_eq!(end.at, at(2024, 1, 3, 10, 0));
        assert!(!end.active);
    }

    #[test]
    fn empty_table_has_no_transitions() {
        let table = ScheduleTable::new();
        assert!(table.next_transition_after(at(2024, 1, 1, 0, 0)).is_none());
    }
}
