//! Parsing of owner-supplied task lines: "2025-07-10 14:00 Meeting".

use chrono::NaiveDateTime;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

use super::store::{TaskDraft, DUE_FORMAT};

static QUICK_TASK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2} .+").expect("valid quick task regex"));

#[derive(Debug)]
pub enum ValidationError {
    /// Fewer than three whitespace-separated tokens.
    MissingFields,
    InvalidDateTime { input: String, source: chrono::ParseError },
    /// Only whitespace after the time.
    EmptyText,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFields => write!(f, "expected '<date> <time> <text>'"),
            Self::InvalidDateTime { input, source } => {
                write!(f, "invalid date/time '{input}': {source}. Use YYYY-MM-DD HH:MM")
            }
            Self::EmptyText => write!(f, "task text is empty"),
        }
    }
}

impl std::error::Error for ValidationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidDateTime { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Whether a free-text message looks like a quick task.
pub fn is_quick_task(text: &str) -> bool {
    QUICK_TASK.is_match(text)
}

/// Split off the first whitespace-delimited token.
fn next_token(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    match input.split_once(char::is_whitespace) {
        Some((token, rest)) => Some((token, rest)),
        None => Some((input, "")),
    }
}

/// Parse `<date> <time> <text>` into a task draft.
pub fn parse_task(input: &str) -> Result<TaskDraft, ValidationError> {
    let (date, rest) = next_token(input).ok_or(ValidationError::MissingFields)?;
    let (time, rest) = next_token(rest).ok_or(ValidationError::MissingFields)?;
    // No separator after the time at all
    if rest.is_empty() {
        return Err(ValidationError::MissingFields);
    }

    let stamp = format!("{date} {time}");
    let due_at = NaiveDateTime::parse_from_str(&stamp, DUE_FORMAT)
        .map_err(|source| ValidationError::InvalidDateTime { input: stamp, source })?;

    let text = rest.trim();
    if text.is_empty() {
        return Err(ValidationError::EmptyText);
    }

    Ok(TaskDraft { due_at, text: text.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap()
    }

    #[test]
    fn test_parse_valid() {
        let draft = parse_task("2025-07-10 14:00 Meeting").unwrap();
        assert_eq!(draft.due_at, at(2025, 7, 10, 14, 0));
        assert_eq!(draft.text, "Meeting");
    }

    #[test]
    fn test_parse_keeps_inner_spaces_and_trims() {
        let draft = parse_task("2025-07-10 09:30   call the  bank  ").unwrap();
        assert_eq!(draft.due_at, at(2025, 7, 10, 9, 30));
        assert_eq!(draft.text, "call the  bank");
    }

    #[test]
    fn test_parse_collapses_separator_runs() {
        let draft = parse_task("2025-07-10   14:00\tMeeting").unwrap();
        assert_eq!(draft.due_at, at(2025, 7, 10, 14, 0));
        assert_eq!(draft.text, "Meeting");
    }

    #[test]
    fn test_parse_not_a_date() {
        let err = parse_task("not-a-date oops").unwrap_err();
        assert!(matches!(err, ValidationError::MissingFields));

        let err = parse_task("not-a-date oops really").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidDateTime { .. }));
    }

    #[test]
    fn test_parse_invalid_time() {
        assert!(matches!(
            parse_task("2025-07-10 25:00 Late").unwrap_err(),
            ValidationError::InvalidDateTime { .. }
        ));
        assert!(matches!(
            parse_task("2025-02-30 10:00 No such day").unwrap_err(),
            ValidationError::InvalidDateTime { .. }
        ));
    }

    #[test]
    fn test_parse_missing_text() {
        assert!(matches!(parse_task("2025-07-10 14:00").unwrap_err(), ValidationError::MissingFields));
        assert!(matches!(parse_task("2025-07-10 14:00   ").unwrap_err(), ValidationError::EmptyText));
        assert!(matches!(parse_task("").unwrap_err(), ValidationError::MissingFields));
        assert!(matches!(parse_task("2025-07-10").unwrap_err(), ValidationError::MissingFields));
    }

    #[test]
    fn test_error_message_mentions_format() {
        let err = parse_task("2025-13-01 10:00 x").unwrap_err();
        assert!(err.to_string().contains("YYYY-MM-DD HH:MM"));
    }

    #[test]
    fn test_quick_task_pattern() {
        assert!(is_quick_task("2025-07-10 14:00 Meeting"));
        assert!(!is_quick_task("2025-07-10 14:00"));
        assert!(!is_quick_task("remind me 2025-07-10 14:00 x"));
        assert!(!is_quick_task("2025-7-10 14:00 Meeting"));
    }
}
