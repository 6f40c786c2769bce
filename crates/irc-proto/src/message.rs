//! Line framing and message parsing (component C).
//!
//! A `Message` is one parsed protocol line: an optional source prefix, a
//! command (a verb, uppercased, or a literal three-digit numeric), zero to
//! fifteen middle parameters, and at most one trailing parameter that may
//! contain spaces.

use std::fmt;

use nom::bytes::complete::take_while1;
use nom::character::complete::{char, space0};
use nom::IResult;
use thiserror::Error;

/// Hard protocol line length, including the terminating CRLF.
pub const MAX_LINE_LENGTH: usize = 512;
/// Maximum number of middle parameters before the optional trailing one.
pub const MAX_MIDDLE_PARAMS: usize = 14;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("line contains a NUL byte")]
    ContainsNul,
    #[error("line contains a bare CR")]
    BareCr,
    #[error("missing command")]
    MissingCommand,
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// One parsed IRC protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
    /// Whether the last parameter was introduced with `:` in the source (or
    /// must be, on serialization, because it is empty or contains a space).
    trailing: bool,
}

impl Message {
    pub fn new(command: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            prefix: None,
            command: command.into(),
            params,
            trailing: false,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Force the last parameter to serialize with a leading colon even if it
    /// would not otherwise require one (e.g. an intentionally empty trailing
    /// parameter, as in `PRIVMSG #chan :`).
    pub fn with_trailing(mut self) -> Self {
        self.trailing = true;
        self
    }

    /// Parse a single already-dechunked line (CRLF/LF already stripped by
    /// the connection's line framer) into a `Message`.
    ///
    /// Per component C, this never allocates more than one `Message`; lines
    /// containing a NUL byte or a bare (unterminated) CR are rejected rather
    /// than silently truncated, so the caller can drop them and emit a
    /// debug-hook warning.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        if line.is_empty() {
            return Err(ParseError::Empty);
        }
        if line.contains('\0') {
            return Err(ParseError::ContainsNul);
        }
        if line.contains('\r') {
            return Err(ParseError::BareCr);
        }

        let (rest, prefix) =
            parse_prefix(line).map_err(|e| ParseError::Malformed(e.to_string()))?;
        let (rest, command) =
            parse_command(rest).map_err(|e| ParseError::Malformed(e.to_string()))?;
        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }
        let (params, trailing) = parse_params(rest);

        let command = if command.chars().all(|c| c.is_ascii_digit()) {
            command.to_string()
        } else {
            command.to_ascii_uppercase()
        };

        Ok(Message {
            prefix: prefix.map(str::to_string),
            command,
            params: params.into_iter().map(str::to_string).collect(),
            trailing,
        })
    }

    /// The first word of the trailing parameter set, or the whole command
    /// target — convenience used throughout the handler layer.
    pub fn param(&self, idx: usize) -> Option<&str> {
        self.params.get(idx).map(String::as_str)
    }
}

fn parse_prefix(input: &str) -> IResult<&str, Option<&str>> {
    if let Some(rest) = input.strip_prefix(':') {
        let (rest, prefix) = take_while1(|c: char| c != ' ')(rest)?;
        let (rest, _) = space0(rest)?;
        Ok((rest, Some(prefix)))
    } else {
        Ok((input, None))
    }
}

fn parse_command(input: &str) -> IResult<&str, &str> {
    let (rest, command) = take_while1(|c: char| c != ' ')(input)?;
    let (rest, _) = space0(rest)?;
    Ok((rest, command))
}

/// Hand-written (not combinator) parameter loop: repeatedly skip runs of
/// spaces and take one token, except a token beginning with `:` which
/// consumes the remainder of the line as the trailing parameter.
fn parse_params(mut input: &str) -> (Vec<&str>, bool) {
    let mut params = Vec::new();
    let mut trailing = false;

    while !input.is_empty() {
        if let Some(rest) = input.strip_prefix(':') {
            params.push(rest);
            trailing = true;
            break;
        }

        let end = input.find(' ').unwrap_or(input.len());
        params.push(&input[..end]);
        input = input[end..].trim_start_matches(' ');

        if params.len() >= MAX_MIDDLE_PARAMS {
            // Whatever remains becomes one final (non-colon) parameter,
            // mirroring the 15-parameter ceiling in RFC 2812 §2.3.1.
            if !input.is_empty() {
                let rest = input.strip_prefix(':').unwrap_or(input);
                params.push(rest);
                trailing = input.starts_with(':');
            }
            break;
        }
    }

    (params, trailing)
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{} ", prefix)?;
        }
        write!(f, "{}", self.command)?;

        if let Some((last, head)) = self.params.split_last() {
            for p in head {
                write!(f, " {}", p)?;
            }
            let needs_colon = self.trailing || last.is_empty() || last.contains(' ') || last.starts_with(':');
            if needs_colon {
                write!(f, " :{}", last)?;
            } else {
                write!(f, " {}", last)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_command() {
        let m = Message::parse("PING").unwrap();
        assert_eq!(m.command, "PING");
        assert!(m.params.is_empty());
    }

    #[test]
    fn parses_numeric_command_literal() {
        let m = Message::parse("001 alice :Welcome").unwrap();
        assert_eq!(m.command, "001");
    }

    #[test]
    fn uppercases_verb_commands() {
        let m = Message::parse("nick Alice").unwrap();
        assert_eq!(m.command, "NICK");
    }

    #[test]
    fn parses_prefix_command_params_and_trailing() {
        let m = Message::parse(":alice!u@h PRIVMSG #chan :hello world").unwrap();
        assert_eq!(m.prefix.as_deref(), Some("alice!u@h"));
        assert_eq!(m.command, "PRIVMSG");
        assert_eq!(m.params, vec!["#chan", "hello world"]);
    }

    #[test]
    fn rejects_nul_and_bare_cr() {
        assert_eq!(Message::parse("PING\0"), Err(ParseError::ContainsNul));
        assert_eq!(Message::parse("PING\rfoo"), Err(ParseError::BareCr));
    }

    #[test]
    fn rejects_empty_line() {
        assert_eq!(Message::parse(""), Err(ParseError::Empty));
    }

    #[test]
    fn round_trips_through_display() {
        let m = Message::parse(":a!u@h MODE #c +ovb alice bob *!*@h").unwrap();
        assert_eq!(m.to_string(), ":a!u@h MODE #c +ovb alice bob *!*@h");
    }

    #[test]
    fn empty_trailing_round_trips_with_colon() {
        let m = Message::new("PRIVMSG", vec!["#chan".into(), String::new()]).with_trailing();
        assert_eq!(m.to_string(), "PRIVMSG #chan :");
    }

    #[test]
    fn fifteenth_parameter_absorbs_the_rest() {
        let line = "CMD a b c d e f g h i j k l m n o p";
        let m = Message::parse(line).unwrap();
        assert_eq!(m.params.len(), MAX_MIDDLE_PARAMS + 1);
    }
}
