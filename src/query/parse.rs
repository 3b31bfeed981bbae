//! Column extraction.
//!
//! A [`ParseSpec`] is a compiled regex plus its column count. Splitting runs
//! the regex once per line: capture groups become the column tuple, missing
//! optional captures become empty strings, and a line the regex does not
//! match falls back to a single-element tuple holding the raw line.

use regex::Regex;

use crate::error::EngineError;
use crate::query::formats::{self, LogFormat};

/// How many fallback line numbers a parse summary reports.
const FAILURE_PREVIEW: usize = 5;

/// A compiled column extractor.
#[derive(Debug, Clone)]
pub struct ParseSpec {
    regex: Regex,
    columns: usize,
}

impl ParseSpec {
    /// Resolve a `ParseFile` request into a spec.
    ///
    /// A caller-supplied pattern wins over the format's built-in one; a
    /// caller-supplied column count must agree with the pattern's capture
    /// group count. `Other` with no pattern resolves to `None`, which
    /// uninstalls column splitting.
    pub fn resolve(
        format: LogFormat,
        pattern: Option<&str>,
        nbr_columns: Option<usize>,
    ) -> Result<Option<Self>, EngineError> {
        let regex = match pattern {
            Some(src) => Some(Regex::new(src)?),
            None => formats::builtin_pattern(format),
        };

        let Some(regex) = regex else {
            return Ok(None);
        };

        let captured = regex.captures_len() - 1;
        if let Some(expected) = nbr_columns {
            if expected != captured {
                return Err(EngineError::ColumnCountMismatch {
                    expected,
                    actual: captured,
                });
            }
        }

        Ok(Some(ParseSpec {
            regex,
            columns: captured,
        }))
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Split one line into its column tuple. `None` when the regex does not
    /// match; the caller decides how to fall back.
    pub fn split(&self, line: &str) -> Option<Vec<String>> {
        let caps = self.regex.captures(line)?;
        Some(
            caps.iter()
                .skip(1)
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect(),
        )
    }
}

/// The outcome of splitting a batch of lines.
pub struct ParsedRows {
    /// One tuple per line; unmatched lines are single-element raw tuples.
    pub rows: Vec<Vec<String>>,
    /// How many lines fell back to the raw tuple.
    pub unmatched: usize,
    /// The first few unmatched line numbers, for the diagnostic summary.
    pub preview: Vec<u64>,
}

impl ParsedRows {
    /// A human-readable summary of the fallbacks, or `None` when every line
    /// matched.
    pub fn summary(&self) -> Option<String> {
        if self.unmatched == 0 {
            return None;
        }
        let shown: Vec<String> = self.preview.iter().map(|n| n.to_string()).collect();
        let suffix = if self.unmatched > shown.len() { "..." } else { "" };
        Some(format!(
            "failed to parse {} line(s): [{}]{}",
            self.unmatched,
            shown.join(", "),
            suffix
        ))
    }
}

/// Split `lines` into column tuples under `spec`.
///
/// Without a spec every line becomes a single-element tuple. `start_line`
/// is only used to number fallbacks in the summary.
pub fn parse_rows(spec: Option<&ParseSpec>, lines: &[String], start_line: u64) -> ParsedRows {
    let Some(spec) = spec else {
        return ParsedRows {
            rows: lines.iter().map(|line| vec![line.clone()]).collect(),
            unmatched: 0,
            preview: Vec::new(),
        };
    };

    let mut rows = Vec::with_capacity(lines.len());
    let mut unmatched = 0usize;
    let mut preview = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        match spec.split(line) {
            Some(columns) => rows.push(columns),
            None => {
                rows.push(vec![line.clone()]);
                if preview.len() < FAILURE_PREVIEW {
                    preview.push(start_line + i as u64);
                }
                unmatched += 1;
            }
        }
    }

    ParsedRows {
        rows,
        unmatched,
        preview,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_builtin() {
        let spec = ParseSpec::resolve(LogFormat::NCSACombined, None, None)
            .unwrap()
            .unwrap();
        assert_eq!(spec.columns(), 5);
    }

    #[test]
    fn test_resolve_other_uninstalls() {
        assert!(ParseSpec::resolve(LogFormat::Other, None, None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_resolve_custom_pattern() {
        let spec = ParseSpec::resolve(LogFormat::Other, Some(r"(\w+) (\w+)"), Some(2))
            .unwrap()
            .unwrap();
        assert_eq!(spec.columns(), 2);
    }

    #[test]
    fn test_resolve_invalid_regex() {
        let err = ParseSpec::resolve(LogFormat::Other, Some("("), None).unwrap_err();
        assert!(err.to_string().starts_with("InvalidRegex:"));
    }

    #[test]
    fn test_resolve_column_mismatch() {
        let err = ParseSpec::resolve(LogFormat::Other, Some(r"(\w+) (\w+)"), Some(5)).unwrap_err();
        assert!(err.to_string().starts_with("ColumnCountMismatch:"));
    }

    #[test]
    fn test_resolve_infers_columns() {
        let spec = ParseSpec::resolve(LogFormat::Other, Some(r"(\d+):(\d+):(\d+)"), None)
            .unwrap()
            .unwrap();
        assert_eq!(spec.columns(), 3);
    }

    #[test]
    fn test_split_missing_capture_is_empty() {
        let spec = ParseSpec::resolve(LogFormat::Other, Some(r"(\w+)(?: (\w+))?"), None)
            .unwrap()
            .unwrap();
        assert_eq!(spec.split("solo"), Some(lines(&["solo", ""])));
        assert_eq!(spec.split("two words"), Some(lines(&["two", "words"])));
    }

    #[test]
    fn test_parse_rows_without_spec() {
        let parsed = parse_rows(None, &lines(&["a", "b"]), 0);
        assert_eq!(parsed.rows, vec![vec!["a".to_string()], vec!["b".to_string()]]);
        assert_eq!(parsed.unmatched, 0);
        assert!(parsed.summary().is_none());
    }

    #[test]
    fn test_parse_rows_fallback_and_summary() {
        let spec = ParseSpec::resolve(LogFormat::Other, Some(r"^(\d+) (\w+)$"), None)
            .unwrap()
            .unwrap();
        let batch = lines(&["1 ok", "garbage", "2 fine", "also bad"]);
        let parsed = parse_rows(Some(&spec), &batch, 10);

        assert_eq!(parsed.rows[0], lines(&["1", "ok"]));
        assert_eq!(parsed.rows[1], lines(&["garbage"]));
        assert_eq!(parsed.rows[3], lines(&["also bad"]));
        assert_eq!(parsed.unmatched, 2);
        assert_eq!(parsed.preview, vec![11, 13]);
        let summary = parsed.summary().unwrap();
        assert!(summary.contains("2 line(s)"));
        assert!(summary.contains("[11, 13]"));
    }

    #[test]
    fn test_parse_rows_ncsa_scenario() {
        let spec = ParseSpec::resolve(
            LogFormat::Other,
            Some(r#"(\d{1,3}(?:\.\d{1,3}){3}) - - \[(.*?)\] "(.*?)" (\d{3}) (\d+|-)"#),
            Some(5),
        )
        .unwrap()
        .unwrap();
        let parsed = parse_rows(
            Some(&spec),
            &lines(&[r#"1.2.3.4 - - [t] "req" 200 5"#]),
            0,
        );
        assert_eq!(parsed.rows, vec![lines(&["1.2.3.4", "t", "req", "200", "5"])]);
    }
}
