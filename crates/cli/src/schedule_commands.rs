//! `reportd next-run`: preview upcoming occurrences without touching the database.

use {
    anyhow::{Result, bail},
    chrono::{DateTime, Utc},
    clap::Args,
};

use reportd_scheduler::{
    schedule::{next_run, resolve_timezone},
    types::ScheduleConfig,
    validate::{parse_cron_expression, validate_schedule_config},
};

#[derive(Args)]
pub struct NextRunArgs {
    /// Template frequency: daily, weekly or monthly.
    #[arg(long, conflicts_with = "cron", requires = "time")]
    frequency: Option<String>,
    /// Local time of day (HH:MM) for --frequency.
    #[arg(long)]
    time: Option<String>,
    /// IANA timezone for --frequency.
    #[arg(long, default_value = "UTC")]
    timezone: String,
    /// 5-field cron expression (evaluated in UTC) instead of a template schedule.
    #[arg(long)]
    cron: Option<String>,
    /// Number of occurrences to show.
    #[arg(short = 'n', long, default_value_t = 5)]
    count: usize,
    /// Reference instant (RFC 3339); defaults to now.
    #[arg(long)]
    from: Option<DateTime<Utc>>,
}

pub fn handle_next_run(args: NextRunArgs) -> Result<()> {
    let from = args.from.unwrap_or_else(Utc::now);
    let (runs, tz) = match (args.frequency, args.cron) {
        (Some(frequency), None) => {
            let config =
                ScheduleConfig::new(frequency, args.time.unwrap_or_default(), &args.timezone);
            (preview_schedule(&config, from, args.count)?, resolve_timezone(&args.timezone))
        },
        (None, Some(cron)) => (preview_cron(&cron, from, args.count)?, resolve_timezone("UTC")),
        _ => bail!("pass either --frequency/--time or --cron"),
    };

    for run in runs {
        let local = run.with_timezone(&tz);
        println!("{}  ({})", run.to_rfc3339(), local.format("%a %Y-%m-%d %H:%M %Z"));
    }
    Ok(())
}

/// The next `count` occurrences of a template schedule after `from`.
fn preview_schedule(
    config: &ScheduleConfig,
    from: DateTime<Utc>,
    count: usize,
) -> Result<Vec<DateTime<Utc>>> {
    validate_schedule_config(config)?;
    let mut runs = Vec::with_capacity(count);
    let mut cursor = from;
    for _ in 0..count {
        cursor = next_run(config, cursor)?;
        runs.push(cursor);
    }
    Ok(runs)
}

fn preview_cron(expression: &str, from: DateTime<Utc>, count: usize) -> Result<Vec<DateTime<Utc>>> {
    let schedule = parse_cron_expression(expression)?;
    Ok(schedule.after(&from).take(count).collect())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, chrono::TimeZone, rstest::rstest};

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn daily_preview_advances_one_day_at_a_time() {
        let config = ScheduleConfig::new("daily", "09:00", "UTC");
        let runs = preview_schedule(&config, utc(2025, 3, 10, 12, 0), 3).unwrap();
        assert_eq!(runs, vec![
            utc(2025, 3, 11, 9, 0),
            utc(2025, 3, 12, 9, 0),
            utc(2025, 3, 13, 9, 0),
        ]);
    }

    #[test]
    fn monthly_preview_lands_on_firsts() {
        let config = ScheduleConfig::new("monthly", "06:30", "UTC");
        let runs = preview_schedule(&config, utc(2025, 11, 15, 0, 0), 2).unwrap();
        assert_eq!(runs, vec![utc(2025, 12, 1, 6, 30), utc(2026, 1, 1, 6, 30)]);
    }

    #[test]
    fn invalid_schedule_is_rejected() {
        let config = ScheduleConfig::new("hourly", "09:00", "UTC");
        assert!(preview_schedule(&config, utc(2025, 3, 10, 0, 0), 1).is_err());
    }

    #[test]
    fn cron_preview() {
        let runs = preview_cron("*/15 2 * * *", utc(2025, 3, 10, 2, 20), 3).unwrap();
        assert_eq!(runs, vec![
            utc(2025, 3, 10, 2, 30),
            utc(2025, 3, 10, 2, 45),
            utc(2025, 3, 11, 2, 0),
        ]);
        assert!(preview_cron("0 2 * *", utc(2025, 3, 10, 0, 0), 1).is_err());
    }

    // 2025-03-12 12:00 is a Wednesday.
    #[rstest]
    #[case("0 9 * * 1", vec![17])]
    #[case("0 9 * * 0", vec![16])]
    #[case("0 9 * * 7", vec![16])]
    #[case("0 9 * * 1-5", vec![13, 14, 17, 18, 19])]
    #[case("0 9 * * */2", vec![13, 15, 16, 18])]
    fn cron_preview_uses_standard_weekdays(#[case] expression: &str, #[case] days: Vec<u32>) {
        let runs = preview_cron(expression, utc(2025, 3, 12, 12, 0), days.len()).unwrap();
        let expected: Vec<_> = days.into_iter().map(|d| utc(2025, 3, d, 9, 0)).collect();
        assert_eq!(runs, expected);
    }
}
