use chrono::{DateTime, Utc};

use crate::error::{EepError, Result};
use crate::{EEP_DAY_SECONDS, EEP_EPOCH_OFFSET};

/// 将以1899-12-30为起点的天数和秒数转换为POSIX时间
pub fn day_to_posix(days: f64, fraction: f64) -> f64 {
    days * EEP_DAY_SECONDS - EEP_EPOCH_OFFSET + fraction
}

/// 将POSIX秒数转换为UTC时间，非有限值返回None
pub fn posix_to_datetime(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }

    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

/// 解码头部文本块：优先UTF-8，失败则按Latin-1逐字节解码
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// 解析浮点数，失败时报告字段名
pub fn parse_f64(s: &str, field: &str) -> Result<f64> {
    let s = s.trim();
    s.parse::<f64>()
        .map_err(|_| EepError::InvalidFormat(format!("{}: '{}' is not a number", field, s)))
}

/// 解析整数；允许"1000.0"这类浮点写法
pub fn parse_i64(s: &str, field: &str) -> Result<i64> {
    let s = s.trim();
    if let Ok(v) = s.parse::<i64>() {
        return Ok(v);
    }

    let v = parse_f64(s, field)?;
    if v.fract() != 0.0 || !v.is_finite() {
        return Err(EepError::InvalidFormat(format!("{}: '{}' is not an integer", field, s)));
    }
    Ok(v as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_epoch_offset_matches_calendar() {
        let base = NaiveDate::from_ymd_opt(1899, 12, 30).unwrap();
        let unix = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        let days = (unix - base).num_days() as f64;
        assert_eq!(day_to_posix(days, 0.0), 0.0);
    }

    #[test]
    fn test_day_to_posix_fraction() {
        // 2000-01-01 = 36526
        let t = day_to_posix(36526.0, 3600.5);
        assert_eq!(t, 946_684_800.0 + 3600.5);

        let dt = posix_to_datetime(t).unwrap();
        assert_eq!(dt.to_rfc3339(), "2000-01-01T01:00:00.500+00:00");
    }

    #[test]
    fn test_posix_to_datetime_nan() {
        assert!(posix_to_datetime(f64::NAN).is_none());
    }

    #[test]
    fn test_decode_text_latin1_fallback() {
        assert_eq!(decode_text(b"uV"), "uV");
        assert_eq!(decode_text(&[0xB5, b'V']), "µV");
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_i64(" 1000 ", "Samples").unwrap(), 1000);
        assert_eq!(parse_i64("250.0", "Samples").unwrap(), 250);
        assert!(parse_i64("2.5", "Samples").is_err());
        assert_eq!(parse_f64("1.5e2", "rate").unwrap(), 150.0);
        assert!(matches!(parse_f64("abc", "rate"), Err(EepError::InvalidFormat(_))));
    }
}
