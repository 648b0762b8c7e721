//! Classification of inbound lines.
//!
//! Every framed line becomes exactly one [`ClassifiedLine`]:
//!
//! ```text
//! R<seq>|<hex code>|<message>         -> Reply
//! S<handle>|<path> <key=value> ...    -> Status
//! anything else                       -> Unrecognized (forwarded verbatim)
//! ```
//!
//! The protocol has no formal grammar, so classification never fails: input
//! that doesn't fit is handed on as [`ClassifiedLine::Unrecognized`] for
//! logging rather than dropped.

use std::collections::HashMap;

/// Reply to a previously sent command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Sequence id of the command being answered.
    pub sequence: u32,
    /// Error code (`0` means success). Sent as hex on the wire.
    pub code: u32,
    /// Free-text remainder, possibly empty.
    pub message: String,
}

impl Reply {
    /// Returns `true` when the radio reported success.
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Unsolicited status broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusBroadcast {
    /// Device-assigned origin handle (opaque, e.g. `1F5C6BC`).
    pub origin: String,
    /// Status body exactly as received after the `|`.
    pub body: String,
    /// Leading words of the body without `=`, e.g. `slice 0` or `transmit`.
    pub path: String,
    /// `key=value` attributes of the body.
    pub attributes: HashMap<String, String>,
}

impl StatusBroadcast {
    /// Parse a status body received from `origin`.
    ///
    /// Words before the first `key=value` token form the command path. Bare
    /// words after that point carry no attribute and are only kept in `body`.
    pub fn parse(origin: impl Into<String>, body: impl Into<String>) -> Self {
        let body = body.into();
        let mut path_words = Vec::new();
        let mut attributes = HashMap::new();

        for token in body.split_whitespace() {
            match token.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    attributes.insert(key.to_string(), value.to_string());
                }
                Some(_) => {}
                None if attributes.is_empty() => path_words.push(token),
                None => {}
            }
        }

        Self {
            origin: origin.into(),
            path: path_words.join(" "),
            body,
            attributes,
        }
    }

    /// First word of the command path (`transmit`, `slice`, `client`, ...).
    pub fn topic(&self) -> &str {
        self.path.split_whitespace().next().unwrap_or("")
    }

    /// Look up a single attribute.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// One inbound line after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedLine {
    /// `R` line answering a command.
    Reply(Reply),
    /// `S` line reporting device state.
    Status(StatusBroadcast),
    /// Anything else, verbatim.
    Unrecognized(String),
}

/// Classify a single framed line.
pub fn classify(line: &str) -> ClassifiedLine {
    let trimmed = line.trim();
    let parsed = match trimmed.as_bytes().first() {
        Some(b'R') => parse_reply(&trimmed[1..]).map(ClassifiedLine::Reply),
        Some(b'S') => parse_status(&trimmed[1..]).map(ClassifiedLine::Status),
        _ => None,
    };
    parsed.unwrap_or_else(|| ClassifiedLine::Unrecognized(line.to_string()))
}

/// Parse `<seq>|<hex code>|<message>` (the part after the `R`).
fn parse_reply(rest: &str) -> Option<Reply> {
    let (id, tail) = rest.split_once('|')?;
    let sequence = parse_unsigned(id.trim(), 10)?;

    let (code, message) = match tail.split_once('|') {
        Some((code, message)) => (code, message.trim()),
        None => (tail, ""),
    };
    let code = code.trim();
    let code = code
        .strip_prefix("0x")
        .or_else(|| code.strip_prefix("0X"))
        .unwrap_or(code);
    let code = parse_unsigned(code, 16)?;

    Some(Reply {
        sequence,
        code,
        message: message.to_string(),
    })
}

/// Digits only: `from_str_radix` alone would also take a leading `+`.
fn parse_unsigned(digits: &str, radix: u32) -> Option<u32> {
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    u32::from_str_radix(digits, radix).ok()
}

/// Parse `<handle>|<body>` (the part after the `S`).
fn parse_status(rest: &str) -> Option<StatusBroadcast> {
    let (handle, body) = rest.split_once('|')?;
    let handle = handle.trim();
    if handle.is_empty() || handle.contains(char::is_whitespace) {
        return None;
    }
    Some(StatusBroadcast::parse(handle, body.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line_from_vox_trace() {
        let line = "S1F5C6BC|transmit vox_enable=1 vox_level=68 vox_delay=16";
        let ClassifiedLine::Status(status) = classify(line) else {
            panic!("expected status");
        };
        assert_eq!(status.origin, "1F5C6BC");
        assert_eq!(status.path, "transmit");
        assert_eq!(status.topic(), "transmit");
        assert_eq!(status.attributes.len(), 3);
        assert_eq!(status.get("vox_enable"), Some("1"));
        assert_eq!(status.get("vox_level"), Some("68"));
        assert_eq!(status.get("vox_delay"), Some("16"));
        assert_eq!(status.body, "transmit vox_enable=1 vox_level=68 vox_delay=16");
    }

    #[test]
    fn test_status_multi_word_path() {
        let ClassifiedLine::Status(status) = classify("S2A|slice 0 RF_frequency=14.250000 mode=USB")
        else {
            panic!("expected status");
        };
        assert_eq!(status.path, "slice 0");
        assert_eq!(status.topic(), "slice");
        assert_eq!(status.get("mode"), Some("USB"));
    }

    #[test]
    fn test_status_empty_body() {
        let ClassifiedLine::Status(status) = classify("S2A|") else {
            panic!("expected status");
        };
        assert_eq!(status.path, "");
        assert_eq!(status.topic(), "");
        assert!(status.attributes.is_empty());
    }

    #[test]
    fn test_status_value_may_contain_equals() {
        let ClassifiedLine::Status(status) = classify("S1|profile name=a=b") else {
            panic!("expected status");
        };
        assert_eq!(status.get("name"), Some("a=b"));
    }

    #[test]
    fn test_reply_success() {
        assert_eq!(
            classify("R13|0|"),
            ClassifiedLine::Reply(Reply {
                sequence: 13,
                code: 0,
                message: String::new(),
            })
        );
    }

    #[test]
    fn test_reply_hex_error_code_and_message() {
        let ClassifiedLine::Reply(reply) =
            classify("R21|50000015|Unable to get foundation receiver assignment")
        else {
            panic!("expected reply");
        };
        assert_eq!(reply.sequence, 21);
        assert_eq!(reply.code, 0x5000_0015);
        assert!(!reply.is_ok());
        assert_eq!(reply.message, "Unable to get foundation receiver assignment");
    }

    #[test]
    fn test_reply_message_keeps_extra_separators() {
        let ClassifiedLine::Reply(reply) = classify("R4|0|model=FLEX-6600|debug") else {
            panic!("expected reply");
        };
        assert_eq!(reply.message, "model=FLEX-6600|debug");
    }

    #[test]
    fn test_reply_without_message() {
        let ClassifiedLine::Reply(reply) = classify("R5|0") else {
            panic!("expected reply");
        };
        assert!(reply.is_ok());
        assert_eq!(reply.message, "");
    }

    #[test]
    fn test_reply_tolerates_spaces() {
        let ClassifiedLine::Reply(reply) = classify("R7 | 0 | ok") else {
            panic!("expected reply");
        };
        assert_eq!(reply.sequence, 7);
        assert_eq!(reply.message, "ok");
    }

    #[test]
    fn test_malformed_lines_are_unrecognized() {
        for line in [
            "",
            "V1.4.0.0",
            "H1F5C6BC",
            "M10000001|Client connected from IP 192.168.1.5",
            "Rabc|0|ok",
            "R1|zz|bad code",
            "R+5|0|signed id",
            "R5|+0|signed code",
            "R5|0x|empty code",
            "R|0|no id",
            "R12",
            "S|no handle",
            "S1F5C6BC no separator",
            "r1|0|lowercase",
        ] {
            assert_eq!(
                classify(line),
                ClassifiedLine::Unrecognized(line.to_string()),
                "line {line:?}"
            );
        }
    }
}
