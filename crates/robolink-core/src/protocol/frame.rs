//! Line framing
//!
//! Every line the controller prints is either a bracketed state frame such as
//! `[1,2,0,1,0,87]` (the firmware actually prints `[(1,2,0,1,0,87)]`) or
//! free-text log output. State frames are decoded with a narrow grammar:
//! a flat, comma-separated list of integer literals and nothing else.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on the number of fields accepted in one state frame
pub const MAX_STATE_FIELDS: usize = 64;

/// Sensor (LED) bitmask values reported in field 0
pub mod sensor {
    pub const NONE: i64 = 0;
    pub const LEFT: i64 = 1;
    pub const CENTER: i64 = 2;
    pub const RIGHT: i64 = 4;
    pub const ALL: i64 = 7;
}

/// Drive direction bitmask values reported in field 1
pub mod drive {
    pub const NONE: i64 = 0;
    pub const LEFT: i64 = 1;
    pub const STRAIGHT: i64 = 2;
    pub const RIGHT: i64 = 4;
}

/// Action codes reported in field 2
pub mod action {
    pub const WAIT: i64 = 0;
    pub const ROUNDS: i64 = 1;
    pub const RESET: i64 = 2;
    pub const PAUSE: i64 = 3;
    pub const FROZEN: i64 = 4;
    pub const RETURN_HOME: i64 = 5;
    pub const MANUAL: i64 = 6;
}

/// One decoded state frame.
///
/// The field layout is owned by the firmware; this type only guarantees that
/// every field was an integer literal. The accessors below follow the
/// six-field revision (sensors, drive, action, home, manual, battery) and
/// return `None` when a shorter frame does not carry the field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RobotState(Vec<i64>);

impl RobotState {
    /// Build a state from already-decoded fields
    pub fn new(fields: Vec<i64>) -> Self {
        Self(fields)
    }

    pub fn fields(&self) -> &[i64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        self.0.get(index).copied()
    }

    /// Line sensor bitmask (see [`sensor`])
    pub fn sensor_mask(&self) -> Option<i64> {
        self.get(0)
    }

    /// Drive direction bitmask (see [`drive`])
    pub fn drive_mask(&self) -> Option<i64> {
        self.get(1)
    }

    /// Firmware action code
    pub fn action(&self) -> Option<i64> {
        self.get(2)
    }

    /// Robot is standing on the start field
    pub fn at_home(&self) -> Option<bool> {
        self.get(3).map(|v| v > 0)
    }

    /// Manual driving mode is active
    pub fn manual_mode(&self) -> Option<bool> {
        self.get(4).map(|v| v > 0)
    }

    /// Battery level in percent
    pub fn battery(&self) -> Option<i64> {
        self.get(5)
    }

    pub fn into_fields(self) -> Vec<i64> {
        self.0
    }
}

impl From<Vec<i64>> for RobotState {
    fn from(fields: Vec<i64>) -> Self {
        Self(fields)
    }
}

impl fmt::Display for RobotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, ")")
    }
}

/// Classification of a single received line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameResult {
    /// Bracketed state frame that decoded cleanly
    State(RobotState),
    /// Anything that is not a state frame, verbatim
    Log(String),
    /// Bracketed line that failed to decode
    Malformed { raw: String, reason: String },
}

/// Strip the record terminator (any trailing `\r`/`\n`), nothing else
pub fn strip_terminator(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

/// Classify and decode one line from the controller
pub fn parse_frame(line: &str) -> FrameResult {
    let line = strip_terminator(line);

    let inner = match line
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    {
        Some(inner) => inner,
        None => return FrameResult::Log(line.to_string()),
    };

    match parse_fields(inner) {
        Ok(fields) => FrameResult::State(RobotState(fields)),
        Err(reason) => FrameResult::Malformed {
            raw: line.to_string(),
            reason,
        },
    }
}

fn parse_fields(inner: &str) -> Result<Vec<i64>, String> {
    let trimmed = inner.trim();

    // `[(a,b,c)]` is a one-element list holding a tuple; unwrap exactly once
    let body = match trimmed
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
    {
        Some(body) => body,
        None => trimmed,
    };

    if body.trim().is_empty() {
        return Err("empty state frame".to_string());
    }

    let mut tokens: Vec<&str> = body.split(',').collect();
    // Tuple literals allow a single trailing comma
    if tokens.len() > 1 && tokens.last().map(|t| t.trim().is_empty()).unwrap_or(false) {
        tokens.pop();
    }

    if tokens.len() > MAX_STATE_FIELDS {
        return Err(format!(
            "{} fields exceeds the limit of {}",
            tokens.len(),
            MAX_STATE_FIELDS
        ));
    }

    tokens
        .iter()
        .enumerate()
        .map(|(i, token)| parse_integer(token.trim()).ok_or_else(|| describe_bad_token(i, token)))
        .collect()
}

/// Parse `[+-]?[0-9]+` and nothing else
fn parse_integer(token: &str) -> Option<i64> {
    let digits = token
        .strip_prefix('-')
        .or_else(|| token.strip_prefix('+'))
        .unwrap_or(token);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

fn describe_bad_token(index: usize, token: &str) -> String {
    let token = token.trim();
    if token.is_empty() {
        format!("field {} is empty", index)
    } else if token.contains(['(', ')', '[', ']']) {
        format!("field {} is nested: {:?}", index, token)
    } else {
        format!("field {} is not an integer: {:?}", index, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn state(line: &str) -> Vec<i64> {
        match parse_frame(line) {
            FrameResult::State(s) => s.into_fields(),
            other => panic!("expected state for {:?}, got {:?}", line, other),
        }
    }

    fn malformed(line: &str) -> String {
        match parse_frame(line) {
            FrameResult::Malformed { reason, .. } => reason,
            other => panic!("expected malformed for {:?}, got {:?}", line, other),
        }
    }

    #[test]
    fn test_plain_list() {
        assert_eq!(state("[1,2,0,1,0,87]"), vec![1, 2, 0, 1, 0, 87]);
        assert_eq!(state("[1,0,0,1,0,42]\n"), vec![1, 0, 0, 1, 0, 42]);
        assert_eq!(state("[7]\r\n"), vec![7]);
    }

    #[test]
    fn test_firmware_tuple_form() {
        assert_eq!(state("[(7,4,1,0,0,93)]\n"), vec![7, 4, 1, 0, 0, 93]);
        assert_eq!(state("[ ( 1 , 2 , 3 , ) ]"), vec![1, 2, 3]);
    }

    #[test]
    fn test_signs_and_spaces() {
        assert_eq!(state("[ -1, +2 ,3 ]"), vec![-1, 2, 3]);
    }

    #[test]
    fn test_log_lines_are_verbatim() {
        assert_eq!(
            parse_frame("hello world\n"),
            FrameResult::Log("hello world".to_string())
        );
        assert_eq!(
            parse_frame("  spaced   out  \r\n"),
            FrameResult::Log("  spaced   out  ".to_string())
        );
        assert_eq!(parse_frame(""), FrameResult::Log(String::new()));
        // Leading text means it is not a frame
        assert_eq!(
            parse_frame(" [1,2]"),
            FrameResult::Log(" [1,2]".to_string())
        );
        assert_eq!(parse_frame("[1,2"), FrameResult::Log("[1,2".to_string()));
    }

    #[test]
    fn test_rejects_non_integers() {
        assert!(malformed("[1,foo,3]").contains("not an integer"));
        assert!(malformed("[1.5,2]").contains("not an integer"));
        assert!(malformed("['a',2]").contains("not an integer"));
        assert!(malformed("[True,1]").contains("not an integer"));
        assert!(malformed("[--1]").contains("not an integer"));
        assert!(malformed("[]").contains("empty"));
        assert!(malformed("[()]").contains("empty"));
        assert!(malformed("[1,,2]").contains("empty"));
    }

    #[test]
    fn test_rejects_nesting() {
        assert!(malformed("[((1,2))]").contains("nested"));
        assert!(malformed("[1,[2,3]]").contains("nested"));
        assert!(malformed("[(1,2),(3,4)]").contains("nested"));
    }

    #[test]
    fn test_rejects_overflow_and_too_many_fields() {
        malformed("[99999999999999999999]");
        let wide = format!("[{}]", vec!["1"; MAX_STATE_FIELDS + 1].join(","));
        assert!(malformed(&wide).contains("exceeds"));
    }

    #[test]
    fn test_malformed_keeps_raw_text() {
        match parse_frame("[1,foo,3]\r\n") {
            FrameResult::Malformed { raw, .. } => assert_eq!(raw, "[1,foo,3]"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_accessors() {
        let s = RobotState::new(vec![5, 2, 1, 1, 0, 87]);
        assert_eq!(s.sensor_mask(), Some(5));
        assert_eq!(s.sensor_mask().map(|m| m & sensor::LEFT != 0), Some(true));
        assert_eq!(s.drive_mask().map(|m| m & drive::STRAIGHT != 0), Some(true));
        assert_eq!(s.action(), Some(1));
        assert_eq!(s.at_home(), Some(true));
        assert_eq!(s.manual_mode(), Some(false));
        assert_eq!(s.battery(), Some(87));
        assert_eq!(s.to_string(), "(5,2,1,1,0,87)");

        let short = RobotState::new(vec![0, 0, 3, 1]);
        assert_eq!(short.battery(), None);
        assert_eq!(short.manual_mode(), None);
    }

    #[test]
    fn test_serializes_as_array() {
        let s = RobotState::new(vec![1, 0, 0, 1, 0, 42]);
        assert_eq!(serde_json::to_string(&s).unwrap(), "[1,0,0,1,0,42]");
        let back: RobotState = serde_json::from_str("[1,0,0,1,0,42]").unwrap();
        assert_eq!(back, s);
    }
}
