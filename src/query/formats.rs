//! Built-in log format patterns and format detection.
//!
//! Each well-known format carries a compiled regex and its column count;
//! detection samples the head of the file and reports the first format that
//! matches a strict majority of the sampled lines. Detection never installs
//! anything: `ParseFile` is the explicit installation step.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// The closed set of log families the engine recognises.
#[allow(clippy::enum_variant_names)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    CommonLogFormat,
    SyslogRFC3164,
    SyslogRFC5424,
    W3CExtended,
    CommonEventFormat,
    NCSACombined,
    Other,
}

/// How many non-empty head lines detection samples.
const SAMPLE_LINES: usize = 10;

static CEF_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^CEF:(\d+)\|([^|]+)\|([^|]+)\|([^|]+)\|([^|]+)\|([^|]+)\|(\d+)\|(.*)$").unwrap()
});

static W3C_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2})\s(\d{2}:\d{2}:\d{2})\s(\S+)\s(\S+)\s(\S+)").unwrap()
});

static SYSLOG_5424_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^<(\d{1,3})>1\s(\S+)\s(\S+)\s(\S+)\s(\S+)\s(\S+)\s(\[(?:.+)\]|-) (.*)$").unwrap()
});

static NCSA_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(\d{1,3}(?:\.\d{1,3}){3}) - - \[(.*?)\] "(.*?)" (\d{3}) (\d+|-)"#).unwrap()
});

static CLF_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(\S+) \S+ (\S+) \[([\w:/]+\s[+\-]\d{4})\] "(\S+) (\S+)\s*(\S+)?\s*" (\d{3}) (\S+)"#,
    )
    .unwrap()
});

static SYSLOG_3164_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^<(\d{1,3})>([A-Z][a-z]{2}\s{1,2}\d{1,2}\s\d{2}:\d{2}:\d{2})\s(\S+)\s([^:]+):\s(.*)$",
    )
    .unwrap()
});

/// Detection order: most specific format first, so a line matching several
/// patterns lands on the narrowest one.
const DETECTION_ORDER: [LogFormat; 6] = [
    LogFormat::CommonEventFormat,
    LogFormat::W3CExtended,
    LogFormat::SyslogRFC5424,
    LogFormat::NCSACombined,
    LogFormat::CommonLogFormat,
    LogFormat::SyslogRFC3164,
];

/// The built-in pattern for a format. `None` for [`LogFormat::Other`].
/// The returned `Regex` is a cheap clone; the compiled program is shared.
pub fn builtin_pattern(format: LogFormat) -> Option<Regex> {
    match format {
        LogFormat::CommonEventFormat => Some(CEF_PATTERN.clone()),
        LogFormat::W3CExtended => Some(W3C_PATTERN.clone()),
        LogFormat::SyslogRFC5424 => Some(SYSLOG_5424_PATTERN.clone()),
        LogFormat::NCSACombined => Some(NCSA_PATTERN.clone()),
        LogFormat::CommonLogFormat => Some(CLF_PATTERN.clone()),
        LogFormat::SyslogRFC3164 => Some(SYSLOG_3164_PATTERN.clone()),
        LogFormat::Other => None,
    }
}

/// The column count a format's built-in pattern captures.
pub fn builtin_columns(format: LogFormat) -> Option<usize> {
    builtin_pattern(format).map(|re| re.captures_len() - 1)
}

/// Detect the format family from a sample of head lines.
///
/// Empty lines are skipped; at most [`SAMPLE_LINES`] lines are considered.
/// A format wins when it matches a strict majority of the sample.
pub fn detect_format(lines: &[String]) -> LogFormat {
    let sample: Vec<&str> = lines
        .iter()
        .map(|l| l.as_str())
        .filter(|l| !l.trim().is_empty())
        .take(SAMPLE_LINES)
        .collect();

    if sample.is_empty() {
        return LogFormat::Other;
    }

    for format in DETECTION_ORDER {
        let pattern = builtin_pattern(format).expect("detection order excludes Other");
        let hits = sample.iter().filter(|l| pattern.is_match(l)).count();
        if hits * 2 > sample.len() {
            return format;
        }
    }

    LogFormat::Other
}
