// ============================================================================
// src/apache/logs.rs – Access/error log line parsing
// ============================================================================

use crate::error::{AdminError, AdminResult};
use regex::Regex;
use serde::Serialize;
use std::str::FromStr;
use std::sync::LazyLock;

/// Combined log format; referer/user-agent are optional (common format).
static ACCESS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(\S+) \S+ \S+ \[([^\]]+)\] "([^"]*)" (\d{3}) (\d+|-)(?: "([^"]*)" "([^"]*)")?\s*$"#,
    )
    .expect("access log regex is valid")
});

static ERROR_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[([^\]]*)\] \[([^\]]+)\] (.*)$").expect("error log regex is valid")
});

static LEADING_BRACKET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[([^\]]+)\] (.*)$").expect("bracket regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    Error,
    Access,
}

impl FromStr for LogType {
    type Err = AdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(LogType::Error),
            "access" => Ok(LogType::Access),
            _ => Err(AdminError::validation(
                "Invalid log type. Must be either \"error\" or \"access\"",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LogEntry {
    #[serde(rename_all = "camelCase")]
    Access {
        ip: String,
        timestamp: String,
        request: String,
        status: u16,
        bytes: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        referer: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_agent: Option<String>,
        raw: String,
    },
    Error {
        timestamp: String,
        level: String,
        module: String,
        message: String,
        raw: String,
    },
    Raw {
        raw: String,
    },
}

pub fn parse_line(kind: LogType, line: &str) -> LogEntry {
    let parsed = match kind {
        LogType::Access => parse_access(line),
        LogType::Error => parse_error(line),
    };
    parsed.unwrap_or_else(|| LogEntry::Raw {
        raw: line.to_string(),
    })
}

fn parse_access(line: &str) -> Option<LogEntry> {
    let caps = ACCESS_LINE.captures(line)?;
    let bytes = match &caps[5] {
        "-" => 0,
        n => n.parse().ok()?,
    };
    Some(LogEntry::Access {
        ip: caps[1].to_string(),
        timestamp: caps[2].to_string(),
        request: caps[3].to_string(),
        status: caps[4].parse().ok()?,
        bytes,
        referer: caps.get(6).map(|m| m.as_str().to_string()),
        user_agent: caps.get(7).map(|m| m.as_str().to_string()),
        raw: line.to_string(),
    })
}

/// 2.4 lines carry `[module:level]`; 2.2 lines carry `[level] [module]`.
fn parse_error(line: &str) -> Option<LogEntry> {
    let caps = ERROR_LINE.captures(line)?;
    let timestamp = caps[1].to_string();
    let tag = &caps[2];
    let rest = &caps[3];
    let (module, level, message) = match tag.split_once(':') {
        Some((module, level)) => (module.to_string(), level.to_string(), rest.to_string()),
        None => {
            let inner = LEADING_BRACKET.captures(rest)?;
            (inner[1].to_string(), tag.to_string(), inner[2].to_string())
        }
    };
    Some(LogEntry::Error {
        timestamp,
        level,
        module,
        message,
        raw: line.to_string(),
    })
}

/// Parse tail output, skipping blank lines, keeping at most `limit` entries.
pub fn parse_lines(kind: LogType, text: &str, limit: usize) -> Vec<LogEntry> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .take(limit)
        .map(|l| parse_line(kind, l))
        .collect()
}

pub fn check_line_count(lines: usize, max: usize) -> AdminResult<()> {
    if (1..=max).contains(&lines) {
        Ok(())
    } else {
        Err(AdminError::validation(format!(
            "Lines parameter must be between 1 and {max}"
        )))
    }
}
