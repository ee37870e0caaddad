//! Next-run computation and reporting windows for template schedules.

use {
    chrono::{
        DateTime, Datelike, Days, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta,
        TimeZone, Utc,
    },
    chrono_tz::Tz,
    tracing::warn,
};

use crate::{
    Error, Result,
    types::{Frequency, ReportWindow, ScheduleConfig},
    validate::parse_time_of_day,
};

/// Resolve `name` to a timezone, falling back to UTC.
///
/// Configs are validated before they are stored, so a miss here means the
/// IANA database changed underneath a persisted schedule.
pub fn resolve_timezone(name: &str) -> Tz {
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(timezone = name, "unknown timezone, falling back to UTC");
            Tz::UTC
        },
    }
}

/// Compute the first occurrence of `config` strictly after `now`.
///
/// - daily: today at `time`, or tomorrow if that has passed
/// - weekly: the next Monday at `time` (today if it is Monday and `time` is ahead)
/// - monthly: the 1st of the month after `now`'s month at `time`
pub fn next_run(config: &ScheduleConfig, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let frequency: Frequency = config.frequency.parse()?;
    let at = parse_time_of_day(&config.time)?;
    let tz = resolve_timezone(&config.timezone);
    let today = now.with_timezone(&tz).date_naive();
    let occurrence = |date: NaiveDate| localize(tz, date.and_time(at));

    let next = match frequency {
        Frequency::Daily => {
            let candidate = occurrence(today);
            if candidate > now {
                candidate
            } else {
                occurrence(today + Days::new(1))
            }
        },
        Frequency::Weekly => {
            let days_ahead = (7 - today.weekday().num_days_from_monday()) % 7;
            let monday = today + Days::new(u64::from(days_ahead));
            let candidate = occurrence(monday);
            if candidate > now {
                candidate
            } else {
                occurrence(monday + Days::new(7))
            }
        },
        Frequency::Monthly => occurrence(first_of_next_month(today)?),
    };
    Ok(next)
}

/// The period a report generated at `now` should cover, in `tz` local days.
///
/// - daily: yesterday
/// - weekly: the 7 days ending yesterday
/// - monthly: the previous calendar month
pub fn report_window(frequency: Frequency, now: DateTime<Utc>, tz: Tz) -> Result<ReportWindow> {
    let today = now.with_timezone(&tz).date_naive();
    let midnight = |date: NaiveDate| localize(tz, date.and_time(NaiveTime::default()));

    let (start, end) = match frequency {
        Frequency::Daily => (today - Days::new(1), today),
        Frequency::Weekly => (today - Days::new(7), today),
        Frequency::Monthly => {
            let this_month = first_of_month(today)?;
            (first_of_month(this_month - Days::new(1))?, this_month)
        },
    };
    Ok(ReportWindow {
        start: midnight(start),
        end: midnight(end),
    })
}

/// Pin a local wall-clock time to an instant.
///
/// Ambiguous times (DST fall-back) take the earlier instant; times inside a
/// spring-forward gap are pushed one hour later.
fn localize(tz: Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        LocalResult::None => tz
            .from_local_datetime(&(naive + TimeDelta::hours(1)))
            .earliest()
            .map_or_else(
                || Utc.from_utc_datetime(&naive),
                |dt| dt.with_timezone(&Utc),
            ),
    }
}

fn first_of_month(date: NaiveDate) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
        .ok_or_else(|| Error::validation(format!("date out of range: {date}")))
}

fn first_of_next_month(date: NaiveDate) -> Result<NaiveDate> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| Error::validation(format!("date out of range: {date}")))
}
