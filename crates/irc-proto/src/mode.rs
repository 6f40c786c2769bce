//! Low-level mode string vocabulary and tokenizer (component H).
//!
//! This module only tokenizes a MODE command's mode-letter string into an
//! ordered list of polarity/letter pairs; it has no notion of which letters
//! take parameters (`param_rule`) or what scope (`USER`/`CHANNEL`) they
//! belong to — that depends on a mode table the server owns, so the
//! per-letter handler lookup and parameter consumption live in the daemon
//! crate's `modes` module.

/// Default ceiling on mode changes accepted from a single MODE line before
/// the remainder must be resubmitted on a follow-up line.
pub const DEFAULT_MAX_MODE_CHANGES: usize = 20;

/// Whether a mode letter takes a parameter, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRule {
    /// Never takes a parameter (e.g. `+i`, `+t`).
    None,
    /// Takes a parameter only when being set, not when being cleared
    /// (e.g. `+k <key>` but bare `-k`).
    OnSet,
    /// Always takes a parameter, on both set and clear (e.g. `+o <nick>`).
    Always,
    /// List-style mode (e.g. `+b`); takes a parameter when adding/removing
    /// an entry, but may be queried bare to enumerate the list.
    List,
}

/// Which kind of target a mode letter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeScope {
    User,
    Channel,
}

/// One `+letter`/`-letter` token from a MODE command, before parameter
/// consumption has been resolved against a mode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeToken {
    pub add: bool,
    pub letter: char,
}

/// Split a mode-letter string such as `+ov-b` into ordered polarity/letter
/// tokens, ignoring the `+`/`-` run markers themselves. Unknown characters
/// (not `+`, `-`, or ASCII alphabetic) are skipped rather than erroring —
/// the caller decides whether an unrecognized letter is a protocol error.
pub fn tokenize(modestr: &str) -> Vec<ModeToken> {
    let mut tokens = Vec::new();
    let mut add = true;
    for c in modestr.chars() {
        match c {
            '+' => add = true,
            '-' => add = false,
            c if c.is_ascii_alphabetic() => tokens.push(ModeToken { add, letter: c }),
            _ => {}
        }
    }
    tokens
}
