//! Schedule expressions.
//!
//! Accepted forms:
//!
//! - `@every <duration>` with units `ms`, `s`, `m`, `h`, combinable (`1h30m`)
//! - descriptors: `@yearly`, `@annually`, `@monthly`, `@weekly`, `@daily`,
//!   `@midnight`, `@hourly`
//! - cron expressions with five fields (minute first) or six/seven fields
//!   (seconds first)

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Local};
use cron::Schedule;

use crate::error::{ExtensionError, ExtensionResult};

/// A parsed schedule.
#[derive(Debug, Clone)]
pub enum ScheduleSpec {
    /// Fixed interval, measured from the previous firing.
    Every(Duration),
    /// Calendar driven, evaluated in local time.
    Cron(Box<Schedule>),
}

impl ScheduleSpec {
    /// Parses a schedule expression.
    pub fn parse(spec: &str) -> ExtensionResult<Self> {
        let spec = spec.trim();
        let invalid =
            |reason: String| ExtensionError::validation(format!("触发周期[{spec}]无效: {reason}"));

        if let Some(rest) = spec.strip_prefix("@every") {
            let every = parse_duration(rest.trim()).map_err(invalid)?;
            return Ok(Self::Every(every));
        }

        let expression = match spec {
            "@yearly" | "@annually" => "0 0 0 1 1 *".to_string(),
            "@monthly" => "0 0 0 1 * *".to_string(),
            "@weekly" => "0 0 0 * * Sun".to_string(),
            "@daily" | "@midnight" => "0 0 0 * * *".to_string(),
            "@hourly" => "0 0 * * * *".to_string(),
            other if other.starts_with('@') => {
                return Err(invalid("未知的描述符".to_string()));
            }
            other if other.split_whitespace().count() == 5 => format!("0 {other}"),
            other => other.to_string(),
        };
        let schedule = Schedule::from_str(&expression).map_err(|e| invalid(e.to_string()))?;
        Ok(Self::Cron(Box::new(schedule)))
    }

    /// Time to wait from `now` until the next firing. `None` if the schedule
    /// never fires again.
    pub fn next_delay(&self, now: DateTime<Local>) -> Option<Duration> {
        match self {
            Self::Every(every) => Some(*every),
            Self::Cron(schedule) => {
                let next = schedule.after(&now).next()?;
                (next - now).to_std().ok()
            }
        }
    }
}

impl FromStr for ScheduleSpec {
    type Err = ExtensionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Parses `1h30m`, `5s`, `250ms` and similar.
fn parse_duration(input: &str) -> Result<Duration, String> {
    if input.is_empty() {
        return Err("缺少时间间隔".to_string());
    }
    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("无法解析[{rest}]"));
        }
        let value: u64 = rest[..digits].parse().map_err(|_| format!("数字过大[{rest}]"))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let too_large = || format!("数字过大[{input}]");
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60).ok_or_else(too_large)?),
            "h" => Duration::from_secs(value.checked_mul(3600).ok_or_else(too_large)?),
            "" => return Err("缺少时间单位".to_string()),
            unit => return Err(format!("未知的时间单位[{unit}]")),
        };
        total = total.checked_add(part).ok_or_else(too_large)?;
        rest = &rest[unit_len..];
    }
    if total.is_zero() {
        return Err("时间间隔必须大于0".to_string());
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_every() {
        let every = |s: &str| match ScheduleSpec::parse(s).unwrap() {
            ScheduleSpec::Every(d) => d,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(every("@every 5s"), Duration::from_secs(5));
        assert_eq!(every("@every 1h30m"), Duration::from_secs(5400));
        assert_eq!(every("@every 1m500ms"), Duration::from_millis(60_500));
    }

    #[test]
    fn test_invalid_specs() {
        let specs = [
            "@every",
            "@every 0s",
            "@every 5x",
            "@every s",
            "@sometimes",
            "not a cron",
            "@every 18446744073709551615s1s",
            "@every 9999999999999999999h",
        ];
        for spec in specs {
            assert!(
                matches!(ScheduleSpec::parse(spec), Err(ExtensionError::Validation(_))),
                "{spec} should be rejected"
            );
        }
    }

    #[test]
    fn test_cron_next_delay() {
        let now = Local.with_ymd_and_hms(2024, 5, 1, 10, 15, 0).unwrap();

        let hourly = ScheduleSpec::parse("@hourly").unwrap();
        assert_eq!(hourly.next_delay(now), Some(Duration::from_secs(45 * 60)));

        let five_field = ScheduleSpec::parse("30 10 * * *").unwrap();
        assert_eq!(five_field.next_delay(now), Some(Duration::from_secs(15 * 60)));

        let six_field = ScheduleSpec::parse("*/10 * * * * *").unwrap();
        assert_eq!(six_field.next_delay(now), Some(Duration::from_secs(10)));
    }
}
