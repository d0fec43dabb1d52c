//! When backups fire: a daily wall-clock time or a fixed interval.

use crate::utils::BackupError;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone};
use serde::Deserialize;
use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

/// Exactly one cadence mode, validated at configuration load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawCadence")]
pub enum Cadence {
    /// Once per day at a local time of day
    Daily { at: NaiveTime },
    /// Every N hours, first run N hours after start
    Hourly { every: NonZeroU32 },
    /// Every N minutes, first run N minutes after start
    Minutely { every: NonZeroU32 },
}

/// Schedule section as written in the config file.
///
/// `time`/`hour`/`minute` are the plan names older config files use.
#[derive(Debug, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
enum RawCadence {
    #[serde(alias = "time")]
    Daily { at: String },
    #[serde(alias = "hour")]
    Hourly { every: i64 },
    #[serde(alias = "minute")]
    Minutely { every: i64 },
}

impl TryFrom<RawCadence> for Cadence {
    type Error = BackupError;

    fn try_from(raw: RawCadence) -> Result<Self, Self::Error> {
        match raw {
            RawCadence::Daily { at } => Ok(Cadence::Daily {
                at: parse_time_of_day(&at)?,
            }),
            RawCadence::Hourly { every } => Ok(Cadence::Hourly {
                every: interval(every, "hourly")?,
            }),
            RawCadence::Minutely { every } => Ok(Cadence::Minutely {
                every: interval(every, "minutely")?,
            }),
        }
    }
}

fn parse_time_of_day(value: &str) -> Result<NaiveTime, BackupError> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| {
            BackupError::InvalidSchedule(format!(
                "daily time {:?} is not in HH:MM or HH:MM:SS form",
                value
            ))
        })
}

fn interval(every: i64, mode: &str) -> Result<NonZeroU32, BackupError> {
    u32::try_from(every)
        .ok()
        .and_then(NonZeroU32::new)
        .ok_or_else(|| {
            BackupError::InvalidSchedule(format!(
                "{} interval must be at least 1, got {}",
                mode, every
            ))
        })
}

impl Cadence {
    /// Fixed period between fires, or `None` for the daily mode.
    pub fn period(&self) -> Option<Duration> {
        match self {
            Cadence::Daily { .. } => None,
            Cadence::Hourly { every } => Some(Duration::from_secs(u64::from(every.get()) * 3600)),
            Cadence::Minutely { every } => Some(Duration::from_secs(u64::from(every.get()) * 60)),
        }
    }

    /// Next fire strictly after `from`.
    ///
    /// For interval modes `from` is the previous fire (or the scheduler
    /// start); for the daily mode it is any instant, and the result is the
    /// next occurrence of the configured local time.
    pub fn next_fire<Tz: TimeZone>(&self, from: &DateTime<Tz>) -> DateTime<Tz> {
        match self {
            Cadence::Daily { at } => next_daily(*at, from),
            Cadence::Hourly { every } => from.clone() + ChronoDuration::hours(i64::from(every.get())),
            Cadence::Minutely { every } => {
                from.clone() + ChronoDuration::minutes(i64::from(every.get()))
            }
        }
    }
}

fn next_daily<Tz: TimeZone>(at: NaiveTime, from: &DateTime<Tz>) -> DateTime<Tz> {
    let tz = from.timezone();
    let mut day = from.date_naive();
    // Two days always suffice; the third candidate covers a DST gap swallowing `at`.
    for _ in 0..3 {
        if let Some(candidate) = tz.from_local_datetime(&day.and_time(at)).earliest() {
            if candidate > *from {
                return candidate;
            }
        }
        day = day.succ_opt().unwrap_or(day);
    }
    from.clone() + ChronoDuration::days(1)
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Daily { at } => write!(f, "daily at {}", at.format("%H:%M")),
            Cadence::Hourly { every } => write!(f, "every {} hour(s)", every),
            Cadence::Minutely { every } => write!(f, "every {} minute(s)", every),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[derive(Debug, Deserialize)]
    struct Wrapper {
        schedule: Cadence,
    }

    fn parse(toml_src: &str) -> Result<Cadence, String> {
        let built = config::Config::builder()
            .add_source(config::File::from_str(toml_src, config::FileFormat::Toml))
            .build()
            .map_err(|e| e.to_string())?;
        built
            .try_deserialize::<Wrapper>()
            .map(|w| w.schedule)
            .map_err(|e| e.to_string())
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_parse_modes() {
        let daily = parse("[schedule]\nmode = \"daily\"\nat = \"02:00\"\n").unwrap();
        assert_eq!(
            daily,
            Cadence::Daily {
                at: NaiveTime::from_hms_opt(2, 0, 0).unwrap()
            }
        );

        let hourly = parse("[schedule]\nmode = \"hourly\"\nevery = 3\n").unwrap();
        assert_eq!(hourly.period(), Some(Duration::from_secs(3 * 3600)));

        let minutely = parse("[schedule]\nmode = \"minute\"\nevery = 15\n").unwrap();
        assert_eq!(minutely.period(), Some(Duration::from_secs(15 * 60)));
    }

    #[test]
    fn test_legacy_plan_names() {
        let daily = parse("[schedule]\nmode = \"time\"\nat = \"23:30:15\"\n").unwrap();
        assert_eq!(
            daily,
            Cadence::Daily {
                at: NaiveTime::from_hms_opt(23, 30, 15).unwrap()
            }
        );
        assert!(parse("[schedule]\nmode = \"hour\"\nevery = 1\n").is_ok());
    }

    #[test]
    fn test_zero_and_negative_intervals_rejected() {
        let zero = parse("[schedule]\nmode = \"hourly\"\nevery = 0\n").unwrap_err();
        assert!(zero.contains("at least 1"), "{}", zero);

        let negative = parse("[schedule]\nmode = \"minutely\"\nevery = -5\n").unwrap_err();
        assert!(negative.contains("at least 1"), "{}", negative);
    }

    #[test]
    fn test_bad_daily_time_and_unknown_mode_rejected() {
        assert!(parse("[schedule]\nmode = \"daily\"\nat = \"25:00\"\n").is_err());
        assert!(parse("[schedule]\nmode = \"daily\"\nat = \"2am\"\n").is_err());
        assert!(parse("[schedule]\nmode = \"weekly\"\nevery = 1\n").is_err());
    }

    #[test]
    fn test_daily_fires_once_per_day() {
        let cadence = Cadence::Daily {
            at: NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
        };

        let first = cadence.next_fire(&utc("2026-03-10T01:00:00Z"));
        assert_eq!(first, utc("2026-03-10T02:00:00Z"));

        // Reaching 02:00 exactly schedules the next run for tomorrow, not again today.
        let second = cadence.next_fire(&first);
        assert_eq!(second, utc("2026-03-11T02:00:00Z"));

        let window_end = utc("2026-03-11T01:00:00Z");
        let mut fires = 0;
        let mut at = utc("2026-03-10T01:00:00Z");
        loop {
            at = cadence.next_fire(&at);
            if at > window_end {
                break;
            }
            fires += 1;
        }
        assert_eq!(fires, 1);
    }

    #[test]
    fn test_daily_after_time_rolls_to_tomorrow() {
        let cadence = Cadence::Daily {
            at: NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
        };
        let next = cadence.next_fire(&utc("2026-12-31T14:00:00Z"));
        assert_eq!(next, utc("2027-01-01T02:00:00Z"));
    }

    #[test]
    fn test_hourly_fires_over_seven_hours() {
        let cadence = Cadence::Hourly {
            every: NonZeroU32::new(3).unwrap(),
        };
        let start = utc("2026-03-10T00:00:00Z");
        let end = utc("2026-03-10T07:00:00Z");

        let mut fires = Vec::new();
        let mut at = start;
        loop {
            at = cadence.next_fire(&at);
            if at > end {
                break;
            }
            fires.push(at);
        }

        assert_eq!(
            fires,
            vec![utc("2026-03-10T03:00:00Z"), utc("2026-03-10T06:00:00Z")]
        );
    }

    #[test]
    fn test_display() {
        let cadence = Cadence::Minutely {
            every: NonZeroU32::new(30).unwrap(),
        };
        assert_eq!(cadence.to_string(), "every 30 minute(s)");
    }
}
