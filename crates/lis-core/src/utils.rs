//! 通用工具函数

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

/// 编号数字部分的位数
pub const CODE_WIDTH: usize = 6;

pub const PATIENT_CODE_PREFIX: &str = "PAT";
pub const TEST_CODE_PREFIX: &str = "TEST";
pub const RESULT_CODE_PREFIX: &str = "RES";

/// 生成带前缀的顺序编号，例如 `TEST000042`
pub fn format_code(prefix: &str, sequence: i64) -> String {
    format!("{}{:0width$}", prefix, sequence, width = CODE_WIDTH)
}

/// 当天零点 (UTC)
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    midnight(now.date_naive())
}

/// 本周起点，周日为一周第一天
pub fn start_of_week(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_from_sunday = i64::from(now.weekday().num_days_from_sunday());
    start_of_day(now) - Duration::days(days_from_sunday)
}

/// 本月一日零点
pub fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let date = now.date_naive();
    let first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date);
    midnight(first)
}

/// 上月一日零点
pub fn start_of_previous_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let this_month = start_of_month(now);
    start_of_month(this_month - Duration::days(1))
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
}

/// 两个时间点之间的小时数，四舍五入，不小于0
pub fn elapsed_hours_rounded(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    let millis = (to - from).num_milliseconds().max(0);
    (millis as f64 / 3_600_000.0).round() as i64
}
