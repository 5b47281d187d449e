//! Chat command parsing: free-form bot message text → structured command.
//!
//! Grammar: `录制` | `record` (case-insensitive prefix), optionally followed by an
//! integer number of seconds. `@mention` tokens are stripped first. Pure; no I/O.

use serde::Serialize;

/// Duration used when no (or an unparsable) number follows the keyword.
pub const DEFAULT_DURATION_SECS: u32 = 60;
/// Lower bound for a requested recording duration.
pub const MIN_DURATION_SECS: u32 = 5;
/// Upper bound for a requested recording duration (10 minutes).
pub const MAX_DURATION_SECS: u32 = 600;

const RECORD_KEYWORDS: [&str; 2] = ["录制", "record"];

/// Help text sent back for anything that is not a record command.
pub const HELP_TEXT: &str =
    "未识别的指令。请发送「录制」或「录制+数字」开始录制视频（如：录制30 表示录制30秒，默认60秒）。";

/// Parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Command {
    /// Start a recording of `duration_seconds` (always within [5, 600]).
    #[serde(rename_all = "camelCase")]
    Record { duration_seconds: u32 },
    /// Anything else; carries the text after mention stripping.
    #[serde(rename_all = "camelCase")]
    Unrecognized { raw_text: String },
}

/// Confirmation reply for an accepted record command.
pub fn confirmation_text(duration_seconds: u32) -> String {
    format!("收到录制指令，开始录制 {} 秒视频...", duration_seconds)
}

/// Parse chat text into a [`Command`]. Never fails.
pub fn parse(text: &str) -> Command {
    let cleaned = strip_mentions(text);
    match strip_keyword(&cleaned) {
        Some(rest) => Command::Record {
            duration_seconds: parse_duration(rest),
        },
        None => Command::Unrecognized { raw_text: cleaned },
    }
}

/// Remove every `@<non-space>+` token (and the whitespace after it), then trim.
pub fn strip_mentions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '@' && chars.peek().is_some_and(|n| !n.is_whitespace()) {
            while chars.next_if(|n| !n.is_whitespace()).is_some() {}
            while chars.next_if(|n| n.is_whitespace()).is_some() {}
            continue;
        }
        out.push(c);
    }
    out.trim().to_string()
}

/// If `command` starts with a record keyword (ASCII case-insensitive), return the rest.
fn strip_keyword(command: &str) -> Option<&str> {
    RECORD_KEYWORDS.iter().find_map(|kw| {
        let head = command.get(..kw.len())?;
        if head.eq_ignore_ascii_case(kw) {
            command.get(kw.len()..)
        } else {
            None
        }
    })
}

fn parse_duration(rest: &str) -> u32 {
    let rest = rest.trim();
    if rest.is_empty() {
        return DEFAULT_DURATION_SECS;
    }
    match rest.parse::<i32>() {
        Ok(n) => clamp_duration(n),
        Err(_) => {
            log::warn!(
                "could not parse record duration {:?}, using default {}s",
                rest,
                DEFAULT_DURATION_SECS
            );
            DEFAULT_DURATION_SECS
        }
    }
}

fn clamp_duration(n: i32) -> u32 {
    let min = MIN_DURATION_SECS as i32;
    let max = MAX_DURATION_SECS as i32;
    n.clamp(min, max) as u32
}
