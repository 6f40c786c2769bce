//! Nickname syntax validation (RFC 2812 §2.3.1), used by NICK/registration
//! handling to distinguish `432 ERR_ERRONEUSNICKNAME` from `433`.

pub const DEFAULT_NICK_MAX_LEN: usize = 30;

fn is_special(c: char) -> bool {
    matches!(c, '[' | ']' | '\\' | '`' | '_' | '^' | '{' | '|' | '}')
}

pub fn is_valid_nick(nick: &str) -> bool {
    is_valid_nick_len(nick, DEFAULT_NICK_MAX_LEN)
}

pub fn is_valid_nick_len(nick: &str, max_len: usize) -> bool {
    if nick.is_empty() || nick.len() > max_len {
        return false;
    }
    let mut chars = nick.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_alphabetic() && !is_special(first) {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || is_special(c) || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_letters_digits_specials_and_hyphen() {
        assert!(is_valid_nick("nick"));
        assert!(is_valid_nick("nick-123"));
        assert!(is_valid_nick("[cool]_"));
    }

    #[test]
    fn rejects_leading_digit_or_hyphen() {
        assert!(!is_valid_nick("123nick"));
        assert!(!is_valid_nick("-nick"));
    }

    #[test]
    fn rejects_punctuation_reserved_for_hostmasks() {
        assert!(!is_valid_nick("nick@host"));
        assert!(!is_valid_nick("nick!user"));
    }

    #[test]
    fn rejects_empty_and_overlong() {
        assert!(!is_valid_nick(""));
        assert!(!is_valid_nick(&"a".repeat(31)));
        assert!(is_valid_nick(&"a".repeat(30)));
    }
}
