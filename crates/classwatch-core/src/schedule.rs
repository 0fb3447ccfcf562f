//! Weekly class timetable and attendance-window timing.
//!
//! All times are local wall-clock (`NaiveDateTime`); the daemon supplies
//! "now" through its clock, so everything here is pure.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DAILY: &str = "Daily";

const WEEKDAYS: [(&str, Weekday); 7] = [
    ("Sunday", Weekday::Sun),
    ("Monday", Weekday::Mon),
    ("Tuesday", Weekday::Tue),
    ("Wednesday", Weekday::Wed),
    ("Thursday", Weekday::Thu),
    ("Friday", Weekday::Fri),
    ("Saturday", Weekday::Sat),
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("invalid time '{0}': expected HH:MM (24-hour)")]
    InvalidTime(String),
    #[error("End time must be after start time")]
    EndNotAfterStart,
    #[error("invalid day of week '{0}': expected Daily or Sunday..Saturday")]
    InvalidDayOfWeek(String),
    #[error("schedule duration must be positive")]
    ZeroDuration,
}

/// How often a class meets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Daily,
    Weekly(Weekday),
}

impl Cadence {
    /// Parse `Daily` or a full English weekday name (case-insensitive).
    pub fn parse(raw: &str) -> Result<Self, ScheduleError> {
        let value = raw.trim();
        if value.eq_ignore_ascii_case(DAILY) {
            return Ok(Cadence::Daily);
        }
        WEEKDAYS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(value))
            .map(|&(_, day)| Cadence::Weekly(day))
            .ok_or_else(|| ScheduleError::InvalidDayOfWeek(raw.to_string()))
    }

    /// Canonical spelling stored with the schedule.
    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Daily => DAILY,
            Cadence::Weekly(day) => WEEKDAYS
                .iter()
                .find(|(_, d)| d == day)
                .map(|(name, _)| *name)
                .unwrap_or(DAILY),
        }
    }

    pub fn matches(&self, date: NaiveDate) -> bool {
        match self {
            Cadence::Daily => true,
            Cadence::Weekly(day) => date.weekday() == *day,
        }
    }
}

/// Parse an `HH:MM` 24-hour time of day.
pub fn parse_clock_time(raw: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| ScheduleError::InvalidTime(raw.to_string()))
}

/// Minutes between start and end on the same day. End must be strictly later.
pub fn duration_minutes(start: NaiveTime, end: NaiveTime) -> Result<u32, ScheduleError> {
    let minutes = (end - start).num_minutes();
    if minutes <= 0 {
        return Err(ScheduleError::EndNotAfterStart);
    }
    Ok(minutes as u32)
}

/// Serde adapter for `HH:MM` times.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_clock_time(&raw).map_err(serde::de::Error::custom)
    }
}

/// A class on the weekly timetable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSchedule {
    pub id: String,
    pub class_name: String,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    /// `Daily` or a weekday name. Kept as text so a bad stored value is
    /// skipped by the scheduler instead of poisoning every read.
    pub day_of_week: String,
    /// Class length in minutes.
    pub duration: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The schedule fields a trigger depends on; any change requires re-arming.
/// The name is included because windows seed and stamp records by it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    pub class_name: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub day_of_week: String,
    pub duration: u32,
}

/// One attendance-collection window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    pub open_at: NaiveDateTime,
    pub close_at: NaiveDateTime,
}

impl Window {
    pub fn contains(&self, at: NaiveDateTime) -> bool {
        self.open_at <= at && at < self.close_at
    }
}

impl ClassSchedule {
    pub fn cadence(&self) -> Result<Cadence, ScheduleError> {
        Cadence::parse(&self.day_of_week)
    }

    pub fn timing(&self) -> Timing {
        Timing {
            class_name: self.class_name.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            day_of_week: self.day_of_week.clone(),
            duration: self.duration,
        }
    }

    pub fn class_duration_secs(&self) -> u32 {
        self.duration * 60
    }

    /// The window this class would occupy on `date`.
    pub fn window_on(&self, date: NaiveDate) -> Window {
        let open_at = date.and_time(self.start_time);
        Window {
            open_at,
            close_at: open_at + Duration::minutes(i64::from(self.duration)),
        }
    }
}

/// Next window whose opening is at or after `now`.
pub fn next_occurrence(now: NaiveDateTime, schedule: &ClassSchedule) -> Result<Window, ScheduleError> {
    let cadence = schedule.cadence()?;
    if schedule.duration == 0 {
        return Err(ScheduleError::ZeroDuration);
    }

    // A weekly class recurs within 8 days of any instant.
    let mut date = now.date();
    for _ in 0..8 {
        if cadence.matches(date) {
            let window = schedule.window_on(date);
            if window.open_at >= now {
                return Ok(window);
            }
        }
        date = date.succ_opt().unwrap_or(date);
    }
    // Unreachable for valid cadences; fall back to a week out.
    Ok(schedule.window_on(now.date() + Duration::days(7)))
}

/// Today's window if `now` already falls inside it.
pub fn active_window(
    now: NaiveDateTime,
    schedule: &ClassSchedule,
) -> Result<Option<Window>, ScheduleError> {
    let cadence = schedule.cadence()?;
    if !cadence.matches(now.date()) {
        return Ok(None);
    }
    let window = schedule.window_on(now.date());
    Ok(window.contains(now).then_some(window))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(start: &str, end: &str, day: &str) -> ClassSchedule {
        let start_time = parse_clock_time(start).unwrap();
        let end_time = parse_clock_time(end).unwrap();
        ClassSchedule {
            id: "c1".into(),
            class_name: "Math101".into(),
            start_time,
            end_time,
            day_of_week: day.into(),
            duration: duration_minutes(start_time, end_time).unwrap(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M").unwrap()
    }

    #[test]
    fn test_duration_minutes() {
        let start = parse_clock_time("09:00").unwrap();
        let end = parse_clock_time("10:00").unwrap();
        assert_eq!(duration_minutes(start, end).unwrap(), 60);
    }

    #[test]
    fn test_end_before_start_rejected() {
        let start = parse_clock_time("10:00").unwrap();
        let end = parse_clock_time("09:00").unwrap();
        assert_eq!(duration_minutes(start, end), Err(ScheduleError::EndNotAfterStart));
        assert_eq!(duration_minutes(start, start), Err(ScheduleError::EndNotAfterStart));
    }

    #[test]
    fn test_parse_clock_time_rejects_garbage() {
        assert!(parse_clock_time("25:00").is_err());
        assert!(parse_clock_time("9am").is_err());
        assert!(parse_clock_time("").is_err());
        assert_eq!(
            parse_clock_time(" 07:30 ").unwrap(),
            NaiveTime::from_hms_opt(7, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_cadence_parse() {
        assert_eq!(Cadence::parse("Daily").unwrap(), Cadence::Daily);
        assert_eq!(Cadence::parse("monday").unwrap(), Cadence::Weekly(Weekday::Mon));
        assert_eq!(Cadence::parse("Sunday").unwrap().as_str(), "Sunday");
        assert!(matches!(
            Cadence::parse("Funday"),
            Err(ScheduleError::InvalidDayOfWeek(_))
        ));
    }

    #[test]
    fn test_daily_next_occurrence_later_today() {
        // 2026-10-19 is a Monday.
        let s = schedule("09:00", "10:00", "Daily");
        let w = next_occurrence(at("2026-10-19", "08:15"), &s).unwrap();
        assert_eq!(w.open_at, at("2026-10-19", "09:00"));
        assert_eq!(w.close_at, at("2026-10-19", "10:00"));
    }

    #[test]
    fn test_daily_next_occurrence_rolls_to_tomorrow() {
        let s = schedule("09:00", "10:00", "Daily");
        let w = next_occurrence(at("2026-10-19", "09:01"), &s).unwrap();
        assert_eq!(w.open_at, at("2026-10-20", "09:00"));
    }

    #[test]
    fn test_next_occurrence_at_exact_start() {
        let s = schedule("09:00", "10:00", "Daily");
        let w = next_occurrence(at("2026-10-19", "09:00"), &s).unwrap();
        assert_eq!(w.open_at, at("2026-10-19", "09:00"));
    }

    #[test]
    fn test_weekly_next_occurrence() {
        let s = schedule("14:00", "15:30", "Wednesday");
        let w = next_occurrence(at("2026-10-19", "12:00"), &s).unwrap();
        assert_eq!(w.open_at, at("2026-10-21", "14:00"));
        assert_eq!(w.close_at, at("2026-10-21", "15:30"));
    }

    #[test]
    fn test_weekly_same_day_already_passed_waits_a_week() {
        let s = schedule("09:00", "10:00", "Monday");
        let w = next_occurrence(at("2026-10-19", "11:00"), &s).unwrap();
        assert_eq!(w.open_at, at("2026-10-26", "09:00"));
    }

    #[test]
    fn test_invalid_day_has_no_occurrence() {
        let s = schedule("09:00", "10:00", "Someday");
        assert!(next_occurrence(at("2026-10-19", "08:00"), &s).is_err());
    }

    #[test]
    fn test_active_window() {
        let s = schedule("09:00", "10:00", "Monday");
        let inside = active_window(at("2026-10-19", "09:30"), &s).unwrap();
        assert_eq!(inside.unwrap().open_at, at("2026-10-19", "09:00"));
        assert!(active_window(at("2026-10-19", "10:00"), &s).unwrap().is_none());
        assert!(active_window(at("2026-10-20", "09:30"), &s).unwrap().is_none());
    }

    #[test]
    fn test_schedule_json_uses_hhmm() {
        let s = schedule("09:00", "10:00", "Daily");
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["startTime"], "09:00");
        assert_eq!(json["endTime"], "10:00");
        assert_eq!(json["duration"], 60);
        assert_eq!(json["className"], "Math101");
    }
}
