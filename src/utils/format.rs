//! Number formatting for run summaries.

/// Formats a number with comma separators for thousands.
///
/// # Examples
///
/// ```
/// use modsec_audit_tools::utils::format::format_number;
///
/// assert_eq!(format_number(1234), "1,234");
/// assert_eq!(format_number(42), "42");
/// ```
pub fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// `part` as a percentage of `total` with one decimal, `0.0%` for an empty total.
pub fn format_percentage(part: usize, total: usize) -> String {
    if total == 0 {
        return "0.0%".to_string();
    }
    format!("{:.1}%", part as f64 * 100.0 / total as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(123), "123");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(123_456), "123,456");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn test_format_percentage() {
        assert_eq!(format_percentage(0, 0), "0.0%");
        assert_eq!(format_percentage(1, 4), "25.0%");
        assert_eq!(format_percentage(2, 3), "66.7%");
        assert_eq!(format_percentage(5, 5), "100.0%");
    }
}
