//! Syntax checks for schedule configs and cron expressions.
//!
//! Nothing here corrects input: an invalid value is reported, never replaced.

use std::collections::BTreeSet;

use {
    chrono::{DateTime, NaiveTime, Utc},
    chrono_tz::Tz,
    cron::Schedule,
    reportd_config::{
        SchedulerConfig,
        validate::{Diagnostic, Severity, ValidationResult},
    },
};

use crate::{
    Error, Result,
    types::{Frequency, ScheduleConfig},
};

/// Number of fields in the cron grammar accepted for scheduled tasks.
pub const CRON_FIELDS: usize = 5;

/// Parse a strict 24-hour `HH:MM` string.
pub fn parse_time_of_day(time: &str) -> Result<NaiveTime> {
    let invalid = || Error::validation(format!("time must be HH:MM (24-hour), got {time:?}"));

    let (hour, minute) = time.split_once(':').ok_or_else(invalid)?;
    if hour.len() != 2 || minute.len() != 2 {
        return Err(invalid());
    }
    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)
}

/// Resolve an IANA timezone name.
pub fn parse_timezone(timezone: &str) -> Result<Tz> {
    timezone
        .parse::<Tz>()
        .map_err(|_| Error::validation(format!("unknown timezone: {timezone:?}")))
}

/// Reject a schedule config that the calculator could not use as written.
///
/// Used before a template's schedule is persisted.
pub fn validate_schedule_config(config: &ScheduleConfig) -> Result<()> {
    validate_schedule_shape(config)?;
    parse_timezone(&config.timezone)?;
    Ok(())
}

/// Like [`validate_schedule_config`] but without resolving the timezone.
///
/// Used for schedules that were already validated when stored: a zone that
/// has since vanished from the IANA database falls back to UTC at calculation
/// time instead of blocking the template.
pub fn validate_schedule_shape(config: &ScheduleConfig) -> Result<()> {
    if config.frequency.trim().is_empty() {
        return Err(Error::validation("frequency is required"));
    }
    config.frequency.parse::<Frequency>()?;
    parse_time_of_day(&config.time)?;
    if config.timezone.trim().is_empty() {
        return Err(Error::validation("timezone is required"));
    }
    Ok(())
}

const WEEKDAY_NAMES: [&str; 7] = [
    "sunday",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
];

/// A parsed 5-field cron expression, evaluated in UTC.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    days: Schedule,
    /// Set when both day fields are restricted: such an expression fires
    /// when either the day of month or the weekday matches.
    weekdays: Option<Schedule>,
}

impl CronSchedule {
    /// Occurrences strictly after `from`, in order.
    pub fn after(&self, from: &DateTime<Utc>) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        let mut days = self.days.after(from).peekable();
        let mut weekdays = self.weekdays.as_ref().map(|s| s.after(from).peekable());
        std::iter::from_fn(move || {
            let Some(weekdays) = weekdays.as_mut() else {
                return days.next();
            };
            match (days.peek().copied(), weekdays.peek().copied()) {
                (Some(d), Some(w)) if d < w => days.next(),
                (Some(d), Some(w)) if w < d => weekdays.next(),
                (Some(_), Some(_)) => {
                    weekdays.next();
                    days.next()
                },
                (Some(_), None) => days.next(),
                (None, _) => weekdays.next(),
            }
        })
    }
}

/// Parse a standard 5-field cron expression (`minute hour day month weekday`).
///
/// The `cron` crate wants seconds and year fields, so the expression is padded
/// with `0` seconds and a `*` year before parsing. Its weekdays also run
/// 1 (Sunday) to 7 (Saturday), so the weekday field is rewritten from the
/// standard 0-7 numbering (0 and 7 are Sunday) first.
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let &[minute, hour, day, month, weekday] = fields.as_slice() else {
        return Err(Error::invalid_cron(
            expression,
            format!("expected {CRON_FIELDS} fields, found {}", fields.len()),
        ));
    };
    let weekday =
        cron_crate_weekdays(weekday).map_err(|reason| Error::invalid_cron(expression, reason))?;

    let parse = |day: &str, weekday: &str| {
        format!("0 {minute} {hour} {day} {month} {weekday} *")
            .parse::<Schedule>()
            .map_err(|e| Error::invalid_cron(expression, e.to_string()))
    };
    let unrestricted = |field: &str| field.starts_with('*') || field.starts_with('?');
    if unrestricted(day) || unrestricted(weekday.as_str()) {
        Ok(CronSchedule {
            days: parse(day, weekday.as_str())?,
            weekdays: None,
        })
    } else {
        Ok(CronSchedule {
            days: parse(day, "*")?,
            weekdays: Some(parse("*", weekday.as_str())?),
        })
    }
}

pub fn validate_cron_expression(expression: &str) -> Result<()> {
    parse_cron_expression(expression).map(|_| ())
}

/// Check the scheduler section's cron expressions with the parser the engine
/// registers them with. Paths that already carry a diagnostic are skipped.
pub fn check_scheduler_config(config: &SchedulerConfig, result: &mut ValidationResult) {
    for (path, expression) in [
        ("scheduler.reconcile_schedule", &config.reconcile_schedule),
        (
            "scheduler.pending_jobs_schedule",
            &config.pending_jobs_schedule,
        ),
    ] {
        if result.diagnostics.iter().any(|d| d.path == path) {
            continue;
        }
        if let Err(e) = validate_cron_expression(expression) {
            result.diagnostics.push(Diagnostic::new(
                Severity::Error,
                "schedule",
                path,
                e.to_string(),
            ));
        }
    }
}

/// Expand a standard weekday field into an explicit list of `cron` crate
/// ordinals. A bare `*` or `?` is passed through.
///
/// `a/n` steps run from `a` through Saturday, `*/n` from Sunday. Ranges
/// never wrap, but `7` may close one (`5-7` is Friday to Sunday).
fn cron_crate_weekdays(field: &str) -> std::result::Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }
    let mut days = BTreeSet::new();
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => match step.parse::<usize>() {
                Ok(step) if step > 0 => (base, step),
                _ => return Err(format!("invalid weekday step in '{item}'")),
            },
            None => (item, 1),
        };
        let (start, end) = match (base, base.split_once('-')) {
            ("*" | "?", _) => (0, 6),
            (_, Some((first, last))) => (weekday(first)?, weekday(last)?),
            (_, None) if step > 1 => (weekday(base)?, 6),
            (_, None) => {
                let day = weekday(base)?;
                (day, day)
            },
        };
        if start > end {
            return Err(format!("weekday range '{base}' runs backwards"));
        }
        days.extend((start..=end).step_by(step).map(|day| day % 7 + 1));
    }
    Ok(days
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(","))
}

/// Standard weekday number (0-7) or English name, as 0-7.
fn weekday(token: &str) -> std::result::Result<u32, String> {
    if let Ok(day) = token.parse::<u32>() {
        return match day {
            0..=7 => Ok(day),
            _ => Err(format!("weekday {day} is outside 0-7")),
        };
    }
    let lower = token.to_ascii_lowercase();
    WEEKDAY_NAMES
        .iter()
        .position(|name| lower == *name || (lower.len() == 3 && name.starts_with(&lower)))
        .map(|day| day as u32)
        .ok_or_else(|| format!("'{token}' is not a weekday"))
}
