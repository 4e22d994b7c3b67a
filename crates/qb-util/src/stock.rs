/// Normalize an input stock code to its 6-digit form.
///
/// Ignores a leading `sh`/`sz` prefix (case-insensitive, only when the
/// input is long enough to carry one), strips spaces/dots/dashes, and keeps
/// the leading 6 digits.
pub fn normalize_stock_code(code: &str) -> String {
    if code.is_empty() {
        return String::new();
    }
    let mut value: String = code
        .trim()
        .chars()
        .filter(|c| !matches!(c, '.' | '-' | ' '))
        .collect::<String>()
        .to_ascii_lowercase();

    if value.len() >= 8 && (value.starts_with("sh") || value.starts_with("sz")) {
        value = value[2..].to_string();
    }

    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() >= 6 {
        digits[..6].to_string()
    } else {
        digits
    }
}

/// Prefix a code with its market: codes starting with 5/6/9 trade in
/// Shanghai (`sh`), everything else in Shenzhen (`sz`).
pub fn add_market_prefix(code: &str) -> String {
    let normalized = normalize_stock_code(code);
    if normalized.is_empty() {
        return String::new();
    }
    let prefix = match normalized.as_bytes()[0] {
        b'5' | b'6' | b'9' => "sh",
        _ => "sz",
    };
    format!("{prefix}{normalized}")
}
