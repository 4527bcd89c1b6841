use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

use crate::grid::shift_months;

const TIMEZONE_CONFIG_FILE: &str = "datebook-time.toml";
const TIMEZONE_ENV_VAR: &str = "DATEBOOK_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str = "DATEBOOK_TIME_CONFIG";
const DEFAULT_PROJECT_TIMEZONE: &str = "Asia/Seoul";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
    timezone: Option<String>,
    time: Option<TimezoneSection>,
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
    timezone: Option<String>,
}

pub fn project_timezone() -> &'static Tz {
    static PROJECT_TZ: OnceLock<Tz> = OnceLock::new();
    PROJECT_TZ.get_or_init(resolve_project_timezone)
}

/// Calendar date of `now` in the configured timezone. All grid arithmetic
/// works on whole days; this is the single place a wall clock becomes one.
#[must_use]
pub fn to_project_date(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(project_timezone()).date_naive()
}

fn resolve_project_timezone() -> Tz {
    if let Ok(raw) = std::env::var(TIMEZONE_ENV_VAR)
        && let Some(tz) = parse_timezone(&raw, TIMEZONE_ENV_VAR)
    {
        return tz;
    }

    if let Some(path) = timezone_config_path()
        && let Some(tz) = load_timezone_from_file(&path)
    {
        return tz;
    }

    parse_timezone(DEFAULT_PROJECT_TIMEZONE, "DEFAULT_PROJECT_TIMEZONE").unwrap_or_else(|| {
        tracing::error!("failed to parse fallback timezone; using UTC");
        chrono_tz::UTC
    })
}

fn timezone_config_path() -> Option<PathBuf> {
    if let Ok(raw) = std::env::var(TIMEZONE_CONFIG_ENV_VAR) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    std::env::current_dir()
        .ok()
        .map(|dir| dir.join(TIMEZONE_CONFIG_FILE))
}

fn load_timezone_from_file(path: &PathBuf) -> Option<Tz> {
    if !path.exists() {
        tracing::debug!(file = %path.display(), "timezone config file not found");
        return None;
    }

    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            tracing::error!(
                file = %path.display(),
                error = %err,
                "failed reading timezone config file"
            );
            return None;
        }
    };

    let parsed = match toml::from_str::<TimezoneConfig>(&raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::error!(
                file = %path.display(),
                error = %err,
                "failed parsing timezone config file"
            );
            return None;
        }
    };

    let timezone = parsed
        .timezone
        .or_else(|| parsed.time.and_then(|section| section.timezone));
    let Some(timezone) = timezone else {
        tracing::warn!(file = %path.display(), "timezone config had no timezone field");
        return None;
    };

    parse_timezone(timezone.as_str(), &format!("file:{}", path.display()))
}

fn parse_timezone(raw: &str, source: &str) -> Option<Tz> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        tracing::warn!(source, "timezone source was empty");
        return None;
    }

    match trimmed.parse::<Tz>() {
        Ok(tz) => {
            tracing::info!(source, timezone = %trimmed, "configured project timezone");
            Some(tz)
        }
        Err(err) => {
            tracing::error!(
                source,
                timezone = %trimmed,
                error = %err,
                "failed to parse timezone id"
            );
            None
        }
    }
}

/// Resolves a date token relative to an explicit `today`.
///
/// Accepted forms: today/tomorrow/yesterday, weekday names (next occurrence),
/// +N/-N offsets in days, weeks or months, and ISO `YYYY-MM-DD`.
#[tracing::instrument(skip(today), fields(input = input))]
pub fn parse_date_token(input: &str, today: NaiveDate) -> anyhow::Result<NaiveDate> {
    let token = input.trim();
    let lower = token.to_ascii_lowercase();

    match lower.as_str() {
        "today" => return Ok(today),
        "tomorrow" => return Ok(add_days_checked(today, 1)?),
        "yesterday" => return Ok(add_days_checked(today, -1)?),
        _ => {}
    }

    if let Some(target_weekday) = parse_weekday_name(&lower) {
        return Ok(next_weekday_date(today, target_weekday));
    }

    let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dwm])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

    if let Some(caps) = rel_re.captures(&lower) {
        let sign = caps
            .name("sign")
            .map(|m| m.as_str())
            .ok_or_else(|| anyhow!("missing relative sign"))?;
        let num: i64 = caps
            .name("num")
            .map(|m| m.as_str())
            .ok_or_else(|| anyhow!("missing relative amount"))?
            .parse()
            .context("invalid relative number")?;
        let unit = caps
            .name("unit")
            .map(|m| m.as_str())
            .ok_or_else(|| anyhow!("missing relative unit"))?;

        let num = if sign == "-" { -num } else { num };
        return match unit {
            "d" => add_days_checked(today, num),
            "w" => add_days_checked(today, num * 7),
            "m" => {
                let months = i32::try_from(num).context("month offset out of range")?;
                Ok(shift_months(today, months))
            }
            _ => Err(anyhow!("unknown relative unit: {unit}")),
        };
    }

    if let Ok(date) = NaiveDate::parse_from_str(token, "%Y-%m-%d") {
        return Ok(date);
    }

    Err(anyhow!("unrecognized date expression: {input}")).with_context(|| {
        "supported formats: today/tomorrow/yesterday, weekday names (e.g. monday), \
         +Nd/+Nw/+Nm offsets, YYYY-MM-DD"
    })
}

/// Validates an `HH:MM` clock token and returns it normalized to two-digit
/// fields. The value is display-only; no ordering against another time is
/// checked anywhere.
pub fn parse_clock_token(input: &str) -> anyhow::Result<String> {
    let clock_re = Regex::new(r"^(?P<hour>\d{1,2}):(?P<minute>\d{2})$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;
    let caps = clock_re
        .captures(input.trim())
        .ok_or_else(|| anyhow!("expected HH:MM clock time, got: {input}"))?;

    let hour: u32 = caps
        .name("hour")
        .map(|m| m.as_str())
        .ok_or_else(|| anyhow!("missing hour"))?
        .parse()
        .context("invalid hour")?;
    let minute: u32 = caps
        .name("minute")
        .map(|m| m.as_str())
        .ok_or_else(|| anyhow!("missing minute"))?
        .parse()
        .context("invalid minute")?;

    if hour > 23 || minute > 59 {
        return Err(anyhow!("clock time out of range: {input}"));
    }

    Ok(format!("{hour:02}:{minute:02}"))
}

fn parse_weekday_name(token: &str) -> Option<Weekday> {
    match token.trim() {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" | "tues" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" | "thur" | "thurs" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

fn next_weekday_date(from: NaiveDate, target: Weekday) -> NaiveDate {
    let from_idx = from.weekday().num_days_from_monday() as i64;
    let target_idx = target.num_days_from_monday() as i64;
    let mut delta = (7 + target_idx - from_idx) % 7;
    if delta == 0 {
        delta = 7;
    }
    from.checked_add_signed(Duration::days(delta)).unwrap_or(from)
}

fn add_days_checked(date: NaiveDate, days: i64) -> anyhow::Result<NaiveDate> {
    date.checked_add_signed(Duration::days(days))
        .ok_or_else(|| anyhow!("date offset out of range: {date} {days:+}"))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{parse_clock_token, parse_date_token};

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn parses_named_days() {
        let today = day(2024, 3, 1);
        assert_eq!(parse_date_token("today", today).expect("today"), today);
        assert_eq!(
            parse_date_token("tomorrow", today).expect("tomorrow"),
            day(2024, 3, 2)
        );
        assert_eq!(
            parse_date_token("yesterday", today).expect("yesterday"),
            day(2024, 2, 29)
        );
    }

    #[test]
    fn parses_weekday_as_next_occurrence() {
        // 2024-03-01 is a Friday; "friday" means the following one.
        let today = day(2024, 3, 1);
        assert_eq!(
            parse_date_token("monday", today).expect("monday"),
            day(2024, 3, 4)
        );
        assert_eq!(
            parse_date_token("friday", today).expect("friday"),
            day(2024, 3, 8)
        );
    }

    #[test]
    fn parses_relative_offsets() {
        let today = day(2024, 1, 31);
        assert_eq!(
            parse_date_token("+3d", today).expect("+3d"),
            day(2024, 2, 3)
        );
        assert_eq!(
            parse_date_token("-1w", today).expect("-1w"),
            day(2024, 1, 24)
        );
        assert_eq!(
            parse_date_token("+1m", today).expect("+1m"),
            day(2024, 2, 29)
        );
    }

    #[test]
    fn parses_iso_date() {
        let today = day(2024, 3, 1);
        assert_eq!(
            parse_date_token("2025-12-31", today).expect("iso"),
            day(2025, 12, 31)
        );
        assert!(parse_date_token("31/12/2025", today).is_err());
    }

    #[test]
    fn clock_tokens_normalize_but_do_not_order() {
        assert_eq!(parse_clock_token("9:05").expect("clock"), "09:05");
        assert_eq!(parse_clock_token("23:59").expect("clock"), "23:59");
        assert!(parse_clock_token("24:00").is_err());
        assert!(parse_clock_token("9pm").is_err());
    }
}

pub mod iso_date_serde {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d";

    pub fn serialize<S>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDate::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use chrono::NaiveDate;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(date: &Option<NaiveDate>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match date {
                Some(value) => super::serialize(value, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let opt = Option::<String>::deserialize(deserializer)?;
            match opt {
                Some(raw) => NaiveDate::parse_from_str(&raw, super::FORMAT)
                    .map(Some)
                    .map_err(serde::de::Error::custom),
                None => Ok(None),
            }
        }
    }
}

pub mod compact_stamp_serde {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y%m%dT%H%M%SZ";

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&dt.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
            .map_err(serde::de::Error::custom)
    }
}
