// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Input sanitizers for form fields.
//!
//! Pure functions, no shared state. The transforms (`escape_html`,
//! `defang_sql`, `strip_js`) always succeed; the field validators
//! (`sanitize_email`, `sanitize_phone`, `sanitize_url`, `sanitize_filename`)
//! normalize their input or return a [`ValidationError`].
//!
//! `defang_sql` is a last line of defence for free-text fields. It does not
//! replace parameterized queries on the server.

use crate::error::ValidationError;
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

/// Longest phone number accepted, in digits (E.164).
pub const MAX_PHONE_DIGITS: usize = 15;

/// Longest filename returned by [`sanitize_filename`], in bytes.
pub const MAX_FILENAME_LEN: usize = 255;

static EVENT_HANDLER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bon\w+\s*=").expect("event handler regex is valid"));

static DANGEROUS_SCHEME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:javascript|vbscript|data)\s*:").expect("scheme regex is valid")
});

static SQL_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:SELECT|INSERT|UPDATE|DELETE|DROP|CREATE|ALTER|EXEC|UNION|SCRIPT)\b")
        .expect("sql keyword regex is valid")
});

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9._%+-]+@[a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)*\.[a-z]{2,}$")
        .expect("email regex is valid")
});

/// Entity-encode `< > " ' /`, then strip inline event handlers and
/// script-capable URI schemes.
pub fn escape_html(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '<' => encoded.push_str("&lt;"),
            '>' => encoded.push_str("&gt;"),
            '"' => encoded.push_str("&quot;"),
            '\'' => encoded.push_str("&#x27;"),
            '/' => encoded.push_str("&#x2F;"),
            _ => encoded.push(c),
        }
    }
    let encoded = EVENT_HANDLER.replace_all(&encoded, "");
    DANGEROUS_SCHEME.replace_all(&encoded, "").into_owned()
}

/// Remove quotes, comment markers, statement separators and a fixed
/// blacklist of SQL keywords.
pub fn defang_sql(input: &str) -> String {
    let mut cleaned = input.replace(['\'', '"', ';'], "");
    for marker in ["--", "/*", "*/"] {
        cleaned = cleaned.replace(marker, "");
    }
    let cleaned = SQL_KEYWORDS.replace_all(&cleaned, "");
    WHITESPACE_RUN.replace_all(cleaned.trim(), " ").into_owned()
}

/// Remove characters that can break out of a script string or tag.
pub fn strip_js(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '"' | '\'' | '&'))
        .collect()
}

/// Trim and lowercase an email address, rejecting anything that is not
/// shaped like `local@domain.tld`.
pub fn sanitize_email(input: &str) -> Result<String, ValidationError> {
    let email = input.trim().to_lowercase();
    if EMAIL.is_match(&email) {
        Ok(email)
    } else {
        Err(ValidationError::InvalidEmail(input.to_string()))
    }
}

/// Keep digits and a leading `+`.
pub fn sanitize_phone(input: &str) -> Result<String, ValidationError> {
    let trimmed = input.trim();
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(ValidationError::EmptyPhone);
    }
    if digits.len() > MAX_PHONE_DIGITS {
        return Err(ValidationError::InvalidPhone(input.to_string()));
    }
    if trimmed.starts_with('+') {
        Ok(format!("+{}", digits))
    } else {
        Ok(digits)
    }
}

/// Parse and normalize an absolute http(s) URL.
pub fn sanitize_url(input: &str) -> Result<String, ValidationError> {
    let url = Url::parse(input.trim()).map_err(|e| ValidationError::InvalidUrl(format!("{}: {}", input, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url.to_string()),
        other => Err(ValidationError::UnsupportedScheme(other.to_string())),
    }
}

/// Reduce `input` to a bare filename over `[A-Za-z0-9._-]`.
///
/// Directory components are dropped, other characters become `_`, and
/// leading dots are removed so the result can be neither hidden nor a
/// traversal.
pub fn sanitize_filename(input: &str) -> Result<String, ValidationError> {
    let base = input.rsplit(['/', '\\']).next().unwrap_or_default();
    let mapped: String = base
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut name = mapped.trim_start_matches('.').to_string();
    if name.len() > MAX_FILENAME_LEN {
        name.truncate(MAX_FILENAME_LEN);
    }
    if name.is_empty() || name.chars().all(|c| c == '_') {
        return Err(ValidationError::EmptyFilename);
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html_encodes_markup() {
        assert_eq!(
            escape_html("<b>\"Tom's\"</b>"),
            "&lt;b&gt;&quot;Tom&#x27;s&quot;&lt;&#x2F;b&gt;"
        );
    }

    #[test]
    fn test_escape_html_strips_handlers_and_schemes() {
        let out = escape_html("<img src=x onerror=alert(1)>");
        assert!(!out.contains("onerror"));
        assert!(!out.contains('<'));

        let out = escape_html("javascript:alert(1) and DATA:text/html");
        assert!(!out.to_lowercase().contains("javascript:"));
        assert!(!out.to_lowercase().contains("data:"));

        assert_eq!(escape_html("plain text"), "plain text");
    }

    #[test]
    fn test_defang_sql() {
        assert_eq!(defang_sql("1; DROP TABLE users --"), "1 TABLE users");
        assert_eq!(defang_sql("' OR '1'='1"), "OR 1=1");
        assert_eq!(defang_sql("a /* hidden */ b"), "a hidden b");
        // Whole words only.
        assert_eq!(defang_sql("selection updated"), "selection updated");
        assert_eq!(defang_sql("union Select"), "");
    }

    #[test]
    fn test_strip_js() {
        assert_eq!(strip_js("<script>alert('x' & \"y\")</script>"), "scriptalert(x  y)/script");
    }

    #[test]
    fn test_sanitize_email() {
        assert_eq!(sanitize_email("User@Example.com").unwrap(), "user@example.com");
        assert_eq!(sanitize_email("  sales.team+f150@dealer.co.uk ").unwrap(), "sales.team+f150@dealer.co.uk");
        assert!(matches!(sanitize_email("BAD EMAIL"), Err(ValidationError::InvalidEmail(_))));
        assert!(sanitize_email("a@b").is_err());
        assert!(sanitize_email("@example.com").is_err());
        assert!(sanitize_email("").is_err());
    }

    #[test]
    fn test_sanitize_phone() {
        assert_eq!(sanitize_phone("(555) 123-4567").unwrap(), "5551234567");
        assert_eq!(sanitize_phone("+1 555 123 4567").unwrap(), "+15551234567");
        assert_eq!(sanitize_phone("   "), Err(ValidationError::EmptyPhone));
        assert_eq!(sanitize_phone("call me"), Err(ValidationError::EmptyPhone));
        assert!(matches!(
            sanitize_phone("1234567890123456"),
            Err(ValidationError::InvalidPhone(_))
        ));
    }

    #[test]
    fn test_sanitize_url() {
        assert_eq!(
            sanitize_url(" https://dealer.example.com/inventory?make=ford ").unwrap(),
            "https://dealer.example.com/inventory?make=ford"
        );
        assert_eq!(sanitize_url("http://localhost:5000").unwrap(), "http://localhost:5000/");
        assert!(matches!(sanitize_url("not a url"), Err(ValidationError::InvalidUrl(_))));
        assert_eq!(
            sanitize_url("javascript:alert(1)"),
            Err(ValidationError::UnsupportedScheme("javascript".to_string()))
        );
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("C:\\reports\\Q3 sales.xlsx").unwrap(), "Q3_sales.xlsx");
        assert_eq!(sanitize_filename(".env").unwrap(), "env");
        assert_eq!(sanitize_filename(""), Err(ValidationError::EmptyFilename));
        assert_eq!(sanitize_filename("reports/"), Err(ValidationError::EmptyFilename));
        assert_eq!(sanitize_filename(&"a".repeat(300)).unwrap().len(), MAX_FILENAME_LEN);
    }
}
