use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SIZE: Regex =
        Regex::new(r"(?i)^\s*([0-9]*\.?[0-9]+)\s*([kmgtp]?)(i?b?)\s*$").unwrap();
}

/// 解析带单位的大小（如 `50K`、`42M`、`2.8 kB`）
///
/// 单位一律按二进制倍数（1K = 1024）处理，包括写成 `kB` / `MB` 的情况。
pub fn parse_size(text: &str) -> Option<u64> {
    let caps = SIZE.captures(text)?;
    let number: f64 = caps[1].parse().ok()?;
    let exponent = match caps[2].to_ascii_lowercase().as_str() {
        "" => 0,
        "k" => 1,
        "m" => 2,
        "g" => 3,
        "t" => 4,
        "p" => 5,
        _ => return None,
    };
    // 只写 "i" 不带 "B" 不是合法单位
    if caps[3].eq_ignore_ascii_case("i") {
        return None;
    }
    Some((number * 1024f64.powi(exponent)).round() as u64)
}

/// clap 的 value_parser 用
pub fn parse_size_arg(text: &str) -> Result<u64, String> {
    parse_size(text).ok_or_else(|| format!("invalid size '{}' (expected e.g. 50K, 42M, 2G)", text))
}

/// clap 的 value_parser 用，支持 humantime 格式（"2s", "3m", "5h", "2d"）
pub fn parse_timespan_arg(text: &str) -> Result<std::time::Duration, String> {
    humantime::parse_duration(text)
        .map_err(|e| format!("invalid timespan '{}': {}", text, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_uses_binary_multiples() {
        assert_eq!(parse_size("42"), Some(42));
        assert_eq!(parse_size("50K"), Some(50 * 1024));
        assert_eq!(parse_size("50kB"), Some(50 * 1024));
        assert_eq!(parse_size("256M"), Some(256 * 1024 * 1024));
        assert_eq!(parse_size("256MiB"), Some(256 * 1024 * 1024));
        assert_eq!(parse_size("2 GB"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_size("2.8 kB"), Some(2867));
        assert_eq!(parse_size("1 B"), Some(1));
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        assert_eq!(parse_size(""), None);
        assert_eq!(parse_size("M"), None);
        assert_eq!(parse_size("12 parsecs"), None);
        assert_eq!(parse_size("5i"), None);
        assert!(parse_size_arg("lots").is_err());
    }

    #[test]
    fn test_parse_timespan() {
        assert_eq!(parse_timespan_arg("5m").unwrap().as_secs(), 300);
        assert_eq!(parse_timespan_arg("2d").unwrap().as_secs(), 2 * 86400);
        assert!(parse_timespan_arg("soon").is_err());
    }
}
