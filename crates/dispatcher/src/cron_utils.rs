use std::str::FromStr;

use chrono::{DateTime, Local, Utc};
use cron::Schedule;
use cronx_domain::Timezone;
use cronx_errors::{CronxError, CronxResult};

/// CRON 表达式求值器
///
/// 接受经典 5 字段（分 时 日 月 周）和带秒的 6 字段两种形式，
/// 5 字段表达式在解析前补一个秒字段。解析本身交给 `cron` crate。
pub struct CronSchedule {
    schedule: Schedule,
    expression: String,
}

impl CronSchedule {
    /// 解析 CRON 表达式
    pub fn new(expression: &str) -> CronxResult<Self> {
        let normalized = normalize_expression(expression)?;
        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| CronxError::invalid_schedule(expression, e.to_string()))?;

        Ok(Self {
            schedule,
            expression: expression.to_string(),
        })
    }

    /// 验证表达式是否有效
    pub fn validate(expression: &str) -> CronxResult<()> {
        Self::new(expression).map(|_| ())
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 严格晚于 `after` 的下一次触发时刻
    pub fn next_after(&self, after: DateTime<Utc>, timezone: Timezone) -> Option<DateTime<Utc>> {
        match timezone {
            Timezone::Local => self
                .schedule
                .after(&after.with_timezone(&Local))
                .next()
                .map(|t| t.with_timezone(&Utc)),
            Timezone::Utc => self.schedule.after(&after).next(),
        }
    }

    /// 从 `after` 之后的 `count` 次触发时刻，严格递增
    pub fn upcoming(
        &self,
        after: DateTime<Utc>,
        timezone: Timezone,
        count: usize,
    ) -> Vec<DateTime<Utc>> {
        match timezone {
            Timezone::Local => self
                .schedule
                .after(&after.with_timezone(&Local))
                .take(count)
                .map(|t| t.with_timezone(&Utc))
                .collect(),
            Timezone::Utc => self.schedule.after(&after).take(count).collect(),
        }
    }
}

/// 5 字段表达式补秒字段，空表达式直接拒绝
fn normalize_expression(expression: &str) -> CronxResult<String> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Err(CronxError::invalid_schedule(expression, "表达式为空"));
    }
    if trimmed.split_whitespace().count() == 5 {
        Ok(format!("0 {trimmed}"))
    } else {
        Ok(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_cron_schedule_creation() {
        // 6 字段格式: 秒 分 时 日 月 周
        assert!(CronSchedule::new("0 0 0 * * *").is_ok());
        assert!(CronSchedule::new("*/5 * * * * *").is_ok());

        assert!(CronSchedule::new("invalid").is_err());
        assert!(CronSchedule::new("0 0 0 32 * *").is_err());
    }

    #[test]
    fn test_empty_expression_rejected() {
        let err = CronSchedule::new("").unwrap_err();
        assert!(matches!(err, CronxError::InvalidSchedule { .. }));
        assert!(CronSchedule::new("   ").is_err());
    }

    #[test]
    fn test_five_field_expression_normalized() {
        // 经典 5 字段（分 时 日 月 周）按秒=0 解释
        let schedule = CronSchedule::new("*/5 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 30).unwrap();
        let next = schedule.next_after(now, Timezone::Utc).unwrap();
        assert_eq!(next.minute(), 5);
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn test_next_after_strictly_greater() {
        let schedule = CronSchedule::new("* * * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let next = schedule.next_after(now, Timezone::Utc).unwrap();
        assert!(next > now);
    }

    #[test]
    fn test_next_after_daily() {
        let schedule = CronSchedule::new("0 0 0 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let next = schedule.next_after(now, Timezone::Utc).unwrap();
        assert_eq!(next.hour(), 0);
        assert_eq!(next.minute(), 0);
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn test_upcoming_strictly_increasing() {
        let schedule = CronSchedule::new("0 0 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();
        let upcoming = schedule.upcoming(now, Timezone::Utc, 3);

        assert_eq!(upcoming.len(), 3);
        assert_eq!(upcoming[0].hour(), 13);
        assert_eq!(upcoming[1].hour(), 14);
        assert_eq!(upcoming[2].hour(), 15);
        assert!(upcoming.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_monotonic_chain() {
        // 把每次返回值作为下一次的 after，序列必须严格递增
        let schedule = CronSchedule::new("*/7 * * * * *").unwrap();
        let mut cursor = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for _ in 0..20 {
            let next = schedule.next_after(cursor, Timezone::Utc).unwrap();
            assert!(next > cursor);
            cursor = next;
        }
    }

    #[test]
    fn test_local_timezone_returns_utc_instants() {
        let schedule = CronSchedule::new("0 * * * * *").unwrap();
        let now = Utc::now();
        let next = schedule.next_after(now, Timezone::Local).unwrap();
        assert!(next > now);
        // 本地时区求值后仍然以 UTC 表示，间隔不超过一分钟
        assert!((next - now).num_seconds() <= 60);
    }
}
