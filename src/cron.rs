//! Five-field cron schedules (minute hour day-of-month month day-of-week)
//!
//! Evaluated in UTC. Supports `*`, single values, ranges `a-b`, lists `a,b`,
//! steps `*/n` and `a-b/n`, month names `JAN`..`DEC` and weekday names
//! `SUN`..`SAT`. Day-of-week accepts both 0 and 7 for Sunday. When both
//! day-of-month and day-of-week are restricted, a day matching either fires.

use crate::error::{ReconError, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// How far ahead to search before declaring a schedule unsatisfiable
const SEARCH_HORIZON_YEARS: i32 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: u64,
    hours: u32,
    days_of_month: u32,
    months: u16,
    days_of_week: u8,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ReconError::config(format!(
                "cron expression '{}' must have 5 fields (minute hour day-of-month month day-of-week), found {}",
                expression,
                fields.len()
            )));
        }

        let field_error = |name: &str, reason: String| {
            ReconError::config(format!("cron expression '{}': invalid {} field: {}", expression, name, reason))
        };

        let minutes = parse_field(fields[0], 0, 59, &[]).map_err(|e| field_error("minute", e))?;
        let hours = parse_field(fields[1], 0, 23, &[]).map_err(|e| field_error("hour", e))?;
        let days_of_month = parse_field(fields[2], 1, 31, &[]).map_err(|e| field_error("day-of-month", e))?;
        let months = parse_field(fields[3], 1, 12, &MONTH_NAMES).map_err(|e| field_error("month", e))?;
        let mut days_of_week = parse_field(fields[4], 0, 7, &WEEKDAY_NAMES).map_err(|e| field_error("day-of-week", e))?;
        // Fold 7 onto Sunday
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week | 1) & !(1 << 7);
        }

        let schedule = Self {
            expression: fields.join(" "),
            minutes,
            hours: hours as u32,
            days_of_month: days_of_month as u32,
            months: months as u16,
            days_of_week: days_of_week as u8,
            dom_restricted: !is_wildcard(fields[2]),
            dow_restricted: !is_wildcard(fields[4]),
        };

        if schedule.next_after(Utc::now()).is_none() {
            return Err(ReconError::config(format!("cron expression '{}' never fires", expression)));
        }
        Ok(schedule)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether the schedule fires during the minute containing `at`
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minutes & (1 << at.minute()) != 0
            && self.hours & (1 << at.hour()) != 0
            && self.months & (1 << at.month()) != 0
            && self.day_matches(at.date_naive())
    }

    /// First fire time strictly after `after`, at minute resolution
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let horizon = start.year() + SEARCH_HORIZON_YEARS;
        let mut t = start;

        while t.year() <= horizon {
            if self.months & (1 << t.month()) == 0 {
                let (year, month) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()?;
                continue;
            }
            if !self.day_matches(t.date_naive()) {
                let next_day = t.date_naive().succ_opt()?;
                t = Utc.from_utc_datetime(&next_day.and_hms_opt(0, 0, 0)?);
                continue;
            }
            if self.hours & (1 << t.hour()) == 0 {
                t = t.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if self.minutes & (1 << t.minute()) == 0 {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }
        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month & (1 << date.day()) != 0;
        let dow = self.days_of_week & (1 << date.weekday().num_days_from_sunday()) != 0;
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl FromStr for CronSchedule {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn is_wildcard(field: &str) -> bool {
    field == "*" || field == "?"
}

/// Parse one field into a bitmask over `min..=max`.
fn parse_field(field: &str, min: u32, max: u32, names: &[&str]) -> std::result::Result<u64, String> {
    let mut mask = 0u64;
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| format!("bad step '{}'", step))?;
                if step == 0 {
                    return Err("step must be greater than 0".to_string());
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (low, high) = if is_wildcard(range) {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, min, names)?, parse_value(b, min, names)?)
        } else {
            let value = parse_value(range, min, names)?;
            // `5/15` means 5 through max every 15
            (value, if step > 1 { max } else { value })
        };

        if low < min || high > max {
            return Err(format!("'{}' is outside {}-{}", part, min, max));
        }
        if low > high {
            return Err(format!("range '{}' is reversed", part));
        }

        let mut v = low;
        while v <= high {
            mask |= 1 << v;
            v += step;
        }
    }
    Ok(mask)
}

fn parse_value(token: &str, min: u32, names: &[&str]) -> std::result::Result<u32, String> {
    if let Ok(v) = token.parse::<u32>() {
        return Ok(v);
    }
    let upper = token.to_ascii_uppercase();
    names
        .iter()
        .position(|name| *name == upper)
        .map(|i| i as u32 + min)
        .ok_or_else(|| format!("unrecognized value '{}'", token))
}
