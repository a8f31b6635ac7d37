//! Five-field cron matcher
//!
//! Fields: minute (0-59), hour (0-23), day of month (1-31), month (1-12),
//! day of week (0-7, both 0 and 7 are Sunday). Each field accepts `*`,
//! single values, comma lists, inclusive ranges `a-b`, and steps `*/n`,
//! `a-b/n` or `a/n`. A time matches when all five fields match.

use chrono::{Datelike, Timelike};

use crate::constants::RE_CRON_SHAPE;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: u64,
    hours: u64,
    days: u64,
    months: u64,
    weekdays: u64,
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23 };
const DAY: FieldSpec = FieldSpec { name: "day of month", min: 1, max: 31 };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12 };
const WEEKDAY: FieldSpec = FieldSpec { name: "day of week", min: 0, max: 7 };

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, AppError> {
        if !RE_CRON_SHAPE.is_match(expression) {
            return Err(AppError::invalid_cron(expression));
        }
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let parse = |field: &str, spec: &FieldSpec| {
            parse_field(field, spec).map_err(|reason| {
                AppError::invalid_cron(expression).with_details(format!("{}: {}", expression, reason))
            })
        };

        let mut weekdays = parse(fields[4], &WEEKDAY)?;
        if weekdays & (1 << 7) != 0 {
            weekdays = (weekdays & !(1 << 7)) | 1;
        }

        Ok(Self {
            minutes: parse(fields[0], &MINUTE)?,
            hours: parse(fields[1], &HOUR)?,
            days: parse(fields[2], &DAY)?,
            months: parse(fields[3], &MONTH)?,
            weekdays,
        })
    }

    pub fn matches<T: Datelike + Timelike>(&self, time: &T) -> bool {
        bit(self.minutes, time.minute())
            && bit(self.hours, time.hour())
            && bit(self.days, time.day())
            && bit(self.months, time.month())
            && bit(self.weekdays, time.weekday().num_days_from_sunday())
    }
}

/// True iff `expression` is valid and matches `time`
pub fn cron_matches<T: Datelike + Timelike>(expression: &str, time: &T) -> bool {
    CronSchedule::parse(expression)
        .map(|schedule| schedule.matches(time))
        .unwrap_or(false)
}

fn bit(mask: u64, value: u32) -> bool {
    value < 64 && mask & (1u64 << value) != 0
}

fn parse_field(field: &str, spec: &FieldSpec) -> Result<u64, String> {
    let mut mask = 0u64;
    for part in field.split(',') {
        if part.is_empty() {
            return Err(format!("empty {} list item", spec.name));
        }

        let (base, step) = match part.split_once('/') {
            Some((base, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid {} step '{}'", spec.name, step))?;
                if step == 0 {
                    return Err(format!("{} step must be positive", spec.name));
                }
                (base, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if base == "*" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = base.split_once('-') {
            (parse_value(a, spec)?, parse_value(b, spec)?)
        } else {
            let value = parse_value(base, spec)?;
            // "a/n" runs from a to the field maximum
            (value, if step.is_some() { spec.max } else { value })
        };

        if start > end {
            return Err(format!("{} range {}-{} is reversed", spec.name, start, end));
        }

        let step = step.unwrap_or(1) as usize;
        for value in (start..=end).step_by(step) {
            mask |= 1u64 << value;
        }
    }
    Ok(mask)
}

fn parse_value(raw: &str, spec: &FieldSpec) -> Result<u32, String> {
    let value: u32 = raw
        .parse()
        .map_err(|_| format!("invalid {} value '{}'", spec.name, raw))?;
    if value < spec.min || value > spec.max {
        return Err(format!(
            "{} value {} outside {}-{}",
            spec.name, value, spec.min, spec.max
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    // 2024-01-01 is a Monday, 2024-01-07 a Sunday
    #[test]
    fn test_weekday_range() {
        assert!(cron_matches("0 9 * * 1-5", &at(2024, 1, 1, 9, 0)));
        assert!(!cron_matches("0 9 * * 1-5", &at(2024, 1, 7, 9, 0)));
        assert!(!cron_matches("0 9 * * 1-5", &at(2024, 1, 1, 9, 1)));
    }

    #[test]
    fn test_sunday_as_zero_or_seven() {
        let sunday = at(2024, 1, 7, 12, 0);
        let monday = at(2024, 1, 8, 12, 0);
        assert!(cron_matches("0 12 * * 0", &sunday));
        assert!(cron_matches("0 12 * * 7", &sunday));
        assert!(!cron_matches("0 12 * * 7", &monday));
        assert!(cron_matches("0 12 * * 5-7", &sunday));
        assert_eq!(
            CronSchedule::parse("* * * * 7").unwrap(),
            CronSchedule::parse("* * * * 0").unwrap()
        );
    }

    #[test]
    fn test_wildcard() {
        assert!(cron_matches("* * * * *", &at(2024, 2, 29, 23, 59)));
    }

    #[test]
    fn test_single_value() {
        assert!(cron_matches("30 * * * *", &at(2024, 1, 1, 4, 30)));
        assert!(!cron_matches("30 * * * *", &at(2024, 1, 1, 4, 31)));
    }

    #[test]
    fn test_list() {
        let expr = "0,15,45 * * * *";
        assert!(cron_matches(expr, &at(2024, 1, 1, 0, 15)));
        assert!(cron_matches(expr, &at(2024, 1, 1, 0, 45)));
        assert!(!cron_matches(expr, &at(2024, 1, 1, 0, 30)));
    }

    #[test]
    fn test_range_is_inclusive() {
        let expr = "0 8-18 * * *";
        assert!(cron_matches(expr, &at(2024, 1, 1, 8, 0)));
        assert!(cron_matches(expr, &at(2024, 1, 1, 18, 0)));
        assert!(!cron_matches(expr, &at(2024, 1, 1, 19, 0)));
    }

    #[test]
    fn test_step_starts_at_field_minimum() {
        let expr = "*/15 * * * *";
        for minute in [0, 15, 30, 45] {
            assert!(cron_matches(expr, &at(2024, 1, 1, 3, minute)));
        }
        assert!(!cron_matches(expr, &at(2024, 1, 1, 3, 10)));

        // Day of month starts at 1: 1, 11, 21, 31
        assert!(cron_matches("0 0 */10 * *", &at(2024, 1, 11, 0, 0)));
        assert!(!cron_matches("0 0 */10 * *", &at(2024, 1, 10, 0, 0)));
    }

    #[test]
    fn test_range_with_step() {
        let expr = "10-30/10 * * * *";
        assert!(cron_matches(expr, &at(2024, 1, 1, 0, 20)));
        assert!(!cron_matches(expr, &at(2024, 1, 1, 0, 40)));
    }

    #[test]
    fn test_every_field_must_match() {
        // Day of month and day of week combine with AND
        let expr = "0 0 1 * 1";
        assert!(cron_matches(expr, &at(2024, 1, 1, 0, 0)));
        assert!(!cron_matches(expr, &at(2024, 2, 1, 0, 0)));
        assert!(!cron_matches("0 0 * 6 *", &at(2024, 1, 1, 0, 0)));
    }

    #[test]
    fn test_invalid_expressions() {
        for expr in ["", "* * * *", "60 * * * *", "* 24 * * *", "* * 0 * *", "* * * 13 *", "* * * * 8", "*/0 * * * *", "5-1 * * * *", "a * * * *", "1,,2 * * * *"] {
            assert!(CronSchedule::parse(expr).is_err(), "expected '{}' to be rejected", expr);
            assert!(!cron_matches(expr, &at(2024, 1, 1, 0, 0)));
        }
    }
}
