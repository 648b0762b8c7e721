//! Command scripts for the probe harness.
//!
//! A script is a text file with one command per line:
//!
//! ```text
//! # subscriptions
//! sub slice all
//! CD16 | sub tx all        wire style: id discarded, CD selects debug
//! C90 | ping               wire style: C selects normal
//! // transmit s vox_enable=1
//! ```
//!
//! Blank lines and lines starting with `#` or `//` are skipped. The session
//! assigns its own sequence ids, so ids written in wire-style lines are
//! ignored; only the `C`/`CD` prefix is kept, as the verbosity.

use std::path::Path;

use anyhow::{Context, Result};

use crate::constants::DEFAULT_COMMANDS;
use crate::protocol::Verbosity;

/// One command from a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedCommand {
    /// Command text to send.
    pub text: String,
    /// Verbosity written in the script, if the line was wire style.
    pub verbosity: Option<Verbosity>,
}

impl ScriptedCommand {
    /// Verbosity to send with, falling back to `default`.
    pub fn verbosity_or(&self, default: Verbosity) -> Verbosity {
        self.verbosity.unwrap_or(default)
    }
}

/// Parse a single script line. Returns `None` for blanks and comments.
pub fn parse_line(line: &str) -> Option<ScriptedCommand> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
        return None;
    }

    let command = match strip_wire_prefix(line) {
        Some((verbosity, text)) => ScriptedCommand {
            text: text.to_string(),
            verbosity: Some(verbosity),
        },
        None => ScriptedCommand {
            text: line.to_string(),
            verbosity: None,
        },
    };
    (!command.text.is_empty()).then_some(command)
}

/// Parse a whole script.
pub fn parse(source: &str) -> Vec<ScriptedCommand> {
    source.lines().filter_map(parse_line).collect()
}

/// The built-in command set: `info` and the common subscriptions.
pub fn default_commands() -> Vec<ScriptedCommand> {
    parse(DEFAULT_COMMANDS)
}

/// `commands`, or the built-in set when there are none.
pub fn or_defaults(commands: Vec<ScriptedCommand>) -> Vec<ScriptedCommand> {
    if commands.is_empty() {
        default_commands()
    } else {
        commands
    }
}

/// Read and parse a script file.
pub fn load(path: &Path) -> Result<Vec<ScriptedCommand>> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read command script {}", path.display()))?;
    Ok(parse(&source))
}

/// Split `CD13 | text` / `C90|text` into verbosity and text.
fn strip_wire_prefix(line: &str) -> Option<(Verbosity, &str)> {
    let (verbosity, rest) = if let Some(rest) = line.strip_prefix("CD") {
        (Verbosity::Debug, rest)
    } else {
        (Verbosity::Normal, line.strip_prefix('C')?)
    };

    let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    if digits == 0 {
        return None;
    }
    let text = rest[digits..].trim_start().strip_prefix('|')?;
    Some((verbosity, text.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_line() {
        assert_eq!(
            parse_line("  sub slice all "),
            Some(ScriptedCommand {
                text: "sub slice all".to_string(),
                verbosity: None,
            })
        );
    }

    #[test]
    fn test_wire_style_lines() {
        let cmd = parse_line("CD13 | sub slice all").unwrap();
        assert_eq!(cmd.text, "sub slice all");
        assert_eq!(cmd.verbosity, Some(Verbosity::Debug));

        let cmd = parse_line("C90|ping").unwrap();
        assert_eq!(cmd.text, "ping");
        assert_eq!(cmd.verbosity_or(Verbosity::Debug), Verbosity::Normal);

        let cmd = parse_line("CD60 |dax iq s 1 pan=0x40000000 daxiq_rate=24000").unwrap();
        assert_eq!(cmd.text, "dax iq s 1 pan=0x40000000 daxiq_rate=24000");
    }

    #[test]
    fn test_commands_starting_with_c_are_not_wire_style() {
        let cmd = parse_line("client disconnect 0x43837CBE").unwrap();
        assert_eq!(cmd.text, "client disconnect 0x43837CBE");
        assert_eq!(cmd.verbosity, None);

        // Uppercase C without an id is plain text too
        assert_eq!(parse_line("C|x").unwrap().verbosity, None);
    }

    #[test]
    fn test_comments_and_blanks_skipped() {
        let script = "# header\n\n// transmit tune on\ninfo\n   \nCD2 | sub client all\nCD3 | \n";
        let commands = parse(script);
        let texts: Vec<&str> = commands.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, ["info", "sub client all"]);
    }

    #[test]
    fn test_defaults_used_only_when_nothing_given() {
        let defaults = or_defaults(Vec::new());
        let texts: Vec<&str> = defaults.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(
            texts,
            [
                "info",
                "sub client all",
                "sub pan all",
                "sub radio all",
                "sub slice all",
                "sub tx all"
            ]
        );
        assert!(defaults
            .iter()
            .all(|c| c.verbosity_or(Verbosity::Normal) == Verbosity::Debug));

        let given = or_defaults(parse("sub meter all\n"));
        assert_eq!(given.len(), 1);
        assert_eq!(given[0].text, "sub meter all");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.txt");
        std::fs::write(&path, "info\nCD16 | sub tx all\n").unwrap();

        let commands = load(&path).unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1].verbosity, Some(Verbosity::Debug));
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(load(Path::new("/nonexistent/flexprobe/probe.txt")).is_err());
    }
}
