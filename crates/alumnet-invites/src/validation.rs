//! Per-row field validation.
//!
//! Pure functions: no I/O and no store lookups, so rows can be checked in any
//! order or in parallel. A row reports every failing field, one message per
//! rule.

use std::collections::HashSet;

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::parser::CandidateRow;
use crate::settings::{InviteSettings, DEFAULT_GRAD_YEARS_AHEAD, DEFAULT_MIN_GRAD_YEAR};

/// Maximum email length (RFC 5321).
pub const MAX_EMAIL_LENGTH: usize = 254;

pub const ERR_NAME_REQUIRED: &str = "full name is required";
pub const ERR_INVALID_EMAIL: &str = "invalid email";
pub const ERR_EMAILS_MUST_DIFFER: &str = "college and personal email must differ";
pub const ERR_INVALID_GRAD_YEAR: &str = "invalid graduation year";
pub const ERR_GRAD_YEAR_RANGE: &str = "graduation year out of range";
pub const ERR_INVALID_DOMAIN: &str = "invalid college email domain";

/// Bounds used by [`validate_row`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationRules {
    pub min_grad_year: i32,
    pub max_grad_year: i32,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            min_grad_year: DEFAULT_MIN_GRAD_YEAR,
            max_grad_year: Utc::now().year() + DEFAULT_GRAD_YEARS_AHEAD,
        }
    }
}

impl From<&InviteSettings> for ValidationRules {
    fn from(settings: &InviteSettings) -> Self {
        Self {
            min_grad_year: settings.min_grad_year,
            max_grad_year: settings.max_grad_year,
        }
    }
}

/// Normalized, typed form of a candidate row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedRow {
    pub row_index: u32,
    pub full_name: String,
    /// Lower-cased.
    pub college_email: String,
    /// Lower-cased.
    pub personal_email: String,
    /// Domain part of `college_email`.
    pub college_domain: String,
    pub grad_year: Option<i32>,
    pub degree: Option<String>,
    pub major: Option<String>,
}

/// Outcome of validating one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub row_index: u32,
    pub valid: bool,
    pub data: Option<ValidatedRow>,
    pub errors: Vec<String>,
}

/// Validate a single row.
#[must_use]
pub fn validate_row(row: &CandidateRow, rules: &ValidationRules) -> ValidationResult {
    let mut errors: Vec<String> = Vec::new();
    let mut push = |msg: &str| {
        if !errors.iter().any(|e| e == msg) {
            errors.push(msg.to_string());
        }
    };

    let full_name = sanitize_name(&row.full_name);
    if full_name.is_empty() {
        push(ERR_NAME_REQUIRED);
    }

    let college_email = normalize_email(&row.college_email);
    let personal_email = normalize_email(&row.personal_email);
    let college_ok = validate_email(&college_email).is_ok();
    let personal_ok = validate_email(&personal_email).is_ok()
        && email_domain(&personal_email).is_some_and(is_valid_domain);
    if !college_ok || !personal_ok {
        push(ERR_INVALID_EMAIL);
    }
    if college_ok && personal_ok && college_email == personal_email {
        push(ERR_EMAILS_MUST_DIFFER);
    }

    let grad_year = match row.grad_year.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match parse_year(raw) {
            Some(year) if (rules.min_grad_year..=rules.max_grad_year).contains(&year) => {
                Some(year)
            }
            Some(_) => {
                push(ERR_GRAD_YEAR_RANGE);
                None
            }
            None => {
                push(ERR_INVALID_GRAD_YEAR);
                None
            }
        },
    };

    let college_domain = email_domain(&college_email).unwrap_or_default().to_string();
    if college_ok && !is_valid_domain(&college_domain) {
        push(ERR_INVALID_DOMAIN);
    }

    if !errors.is_empty() {
        return ValidationResult {
            row_index: row.row_index,
            valid: false,
            data: None,
            errors,
        };
    }

    ValidationResult {
        row_index: row.row_index,
        valid: true,
        data: Some(ValidatedRow {
            row_index: row.row_index,
            full_name,
            college_email,
            personal_email,
            college_domain,
            grad_year,
            degree: optional_text(row.degree.as_deref()),
            major: optional_text(row.major.as_deref()),
        }),
        errors: Vec::new(),
    }
}

/// Validate every row, preserving order.
#[must_use]
pub fn validate_rows(rows: &[CandidateRow], rules: &ValidationRules) -> Vec<ValidationResult> {
    rows.iter().map(|row| validate_row(row, rules)).collect()
}

/// Strip markup and collapse internal whitespace.
///
/// The result is plain text: characters ammonia escapes on output are turned
/// back into the characters themselves.
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    let cleaned = ammonia::Builder::default()
        .tags(HashSet::new())
        .clean(name)
        .to_string();
    decode_entities(&cleaned)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Domain part of an address, if it has exactly one `@`.
#[must_use]
pub fn email_domain(email: &str) -> Option<&str> {
    match email.split_once('@') {
        Some((_, domain)) if !domain.contains('@') => Some(domain),
        _ => None,
    }
}

/// Validate email format (`local@domain.tld`).
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is empty".to_string());
    }

    if email.len() > MAX_EMAIL_LENGTH {
        return Err(format!(
            "Email exceeds maximum length of {MAX_EMAIL_LENGTH} characters"
        ));
    }

    if email.contains(char::is_whitespace) {
        return Err("Email contains whitespace".to_string());
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err("Email must contain exactly one '@'".to_string());
    };
    if domain.contains('@') {
        return Err("Email must contain exactly one '@'".to_string());
    }

    validate_local_part(local)?;

    if !domain.contains('.') {
        return Err("Email domain must contain at least one '.'".to_string());
    }

    if domain.starts_with('.') || domain.ends_with('.') {
        return Err("Email domain cannot start or end with '.'".to_string());
    }

    if domain.contains("..") {
        return Err("Email domain contains consecutive dots".to_string());
    }

    Ok(())
}

/// Unquoted RFC 5322 dot-atom.
fn validate_local_part(local: &str) -> Result<(), String> {
    if local.is_empty() {
        return Err("Email local part is empty".to_string());
    }
    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return Err("Email local part has a misplaced '.'".to_string());
    }
    if let Some(c) = local.chars().find(|c| !is_atext(*c) && *c != '.') {
        return Err(format!("Email local part contains '{c}'"));
    }
    Ok(())
}

fn is_atext(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+/=?^_`{|}~-".contains(c)
}

/// Syntactic hostname check: LDH labels of 1..=63 chars and an alphabetic TLD.
#[must_use]
pub fn is_valid_domain(domain: &str) -> bool {
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || domain.len() > 253 {
        return false;
    }

    let labels_ok = labels.iter().all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });

    let tld_ok = labels
        .last()
        .is_some_and(|tld| tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic()));

    labels_ok && tld_ok
}

/// Spreadsheets often render integer cells as `2019.0`.
fn parse_year(raw: &str) -> Option<i32> {
    let digits = raw.strip_suffix(".0").unwrap_or(raw);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(|v| v.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> ValidationRules {
        ValidationRules {
            min_grad_year: 1950,
            max_grad_year: 2034,
        }
    }

    fn row(name: &str, college: &str, personal: &str, year: Option<&str>) -> CandidateRow {
        CandidateRow {
            row_index: 1,
            full_name: name.to_string(),
            college_email: college.to_string(),
            personal_email: personal.to_string(),
            grad_year: year.map(str::to_string),
            degree: Some("  B.Tech ".to_string()),
            major: None,
        }
    }

    #[test]
    fn test_valid_row_is_normalized() {
        let result = validate_row(
            &row(" Ada   Lovelace ", "Ada@X.Edu", "ADA@gmail.com", Some("2019")),
            &rules(),
        );
        assert!(result.valid);
        assert!(result.errors.is_empty());
        let data = result.data.unwrap();
        assert_eq!(data.full_name, "Ada Lovelace");
        assert_eq!(data.college_email, "ada@x.edu");
        assert_eq!(data.personal_email, "ada@gmail.com");
        assert_eq!(data.college_domain, "x.edu");
        assert_eq!(data.grad_year, Some(2019));
        assert_eq!(data.degree.as_deref(), Some("B.Tech"));
    }

    #[test]
    fn test_invalid_email_reports_single_rule() {
        let result = validate_row(&row("Ada", "not-an-email", "ada@gmail.com", None), &rules());
        assert!(!result.valid);
        assert!(result.data.is_none());
        assert_eq!(result.errors, vec!["invalid email"]);
    }

    #[test]
    fn test_errors_accumulate_across_fields() {
        let result = validate_row(&row("  ", "ada@x.edu", "ada@x.edu", Some("19x9")), &rules());
        assert_eq!(
            result.errors,
            vec![
                ERR_NAME_REQUIRED,
                ERR_EMAILS_MUST_DIFFER,
                ERR_INVALID_GRAD_YEAR,
            ]
        );
    }

    #[test]
    fn test_markup_only_name_is_empty() {
        let result = validate_row(
            &row("<script>alert(1)</script>", "a@x.edu", "a@gmail.com", None),
            &rules(),
        );
        assert_eq!(result.errors, vec![ERR_NAME_REQUIRED]);
    }

    #[test]
    fn test_name_keeps_special_characters() {
        let result = validate_row(
            &row("Tom & Jerry O'Neil", "t@x.edu", "t@gmail.com", None),
            &rules(),
        );
        assert_eq!(result.data.unwrap().full_name, "Tom & Jerry O'Neil");

        assert_eq!(sanitize_name("<b>Ada</b>  Lovelace"), "Ada Lovelace");
        assert_eq!(sanitize_name("A < B"), "A < B");
        assert_eq!(sanitize_name("Zoë \"Z\" Ng"), "Zoë \"Z\" Ng");
    }

    #[test]
    fn test_personal_email_shape_is_checked() {
        for personal in [
            "tom@gmail..com",
            "x,y<z>@gmail.com",
            ".tom@gmail.com",
            "t..m@gmail.com",
            "tom@gmail.c0m",
        ] {
            let result = validate_row(&row("Tom", "tom@x.edu", personal, None), &rules());
            assert_eq!(result.errors, vec![ERR_INVALID_EMAIL], "{personal}");
        }
        let result = validate_row(
            &row("Tom", "tom@x.edu", "tom.o'neil+alumni@gmail.com", None),
            &rules(),
        );
        assert!(result.valid);
    }

    #[test]
    fn test_grad_year_bounds() {
        let r = rules();
        assert!(validate_row(&row("A", "a@x.edu", "a@g.com", Some("1950")), &r).valid);
        assert!(validate_row(&row("A", "a@x.edu", "a@g.com", Some("2034")), &r).valid);
        assert!(validate_row(&row("A", "a@x.edu", "a@g.com", Some("2019.0")), &r).valid);
        assert_eq!(
            validate_row(&row("A", "a@x.edu", "a@g.com", Some("1949")), &r).errors,
            vec![ERR_GRAD_YEAR_RANGE]
        );
        assert_eq!(
            validate_row(&row("A", "a@x.edu", "a@g.com", Some("2035")), &r).errors,
            vec![ERR_GRAD_YEAR_RANGE]
        );
        assert!(validate_row(&row("A", "a@x.edu", "a@g.com", Some("  ")), &r).valid);
    }

    #[test]
    fn test_college_domain_must_be_hostname() {
        let result = validate_row(&row("A", "a@x_y.edu", "a@gmail.com", None), &rules());
        assert_eq!(result.errors, vec![ERR_INVALID_DOMAIN]);

        let result = validate_row(&row("A", "a@x.e1", "a@gmail.com", None), &rules());
        assert_eq!(result.errors, vec![ERR_INVALID_DOMAIN]);
    }

    #[test]
    fn test_validate_email_shapes() {
        assert!(validate_email("a@b.co").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("a b@c.com").is_err());
        assert!(validate_email("a@b@c.com").is_err());
        assert!(validate_email("@c.com").is_err());
        assert!(validate_email("a@localhost").is_err());
        assert!(validate_email("a@.com").is_err());
        assert!(validate_email("a.@b.co").is_err());
        assert!(validate_email("a(b)@b.co").is_err());
        assert!(validate_email("a@b..co").is_err());
        assert!(validate_email("first.last+tag@b.co").is_ok());
    }

    #[test]
    fn test_validate_rows_preserves_order() {
        let mut rows = vec![
            row("A", "a@x.edu", "a@gmail.com", None),
            row("B", "bad", "b@gmail.com", None),
        ];
        rows[1].row_index = 2;
        let results = validate_rows(&rows, &rules());
        assert_eq!(
            results.iter().map(|r| (r.row_index, r.valid)).collect::<Vec<_>>(),
            vec![(1, true), (2, false)]
        );
    }
}
