//! Address and hostmask utilities (component A): CIDR bit-matching and
//! `nick!user@host` wildcard/CIDR mask matching.

use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;

use crate::casemap::irc_lower_char;

/// Compare the first `bits` bits of two address byte slices.
///
/// Addresses of different length (i.e. different family) never match.
pub fn match_cidr_bits(addr: &[u8], network: &[u8], bits: u8) -> bool {
    if addr.len() != network.len() {
        return false;
    }
    let bits = bits.min((addr.len() * 8) as u8);
    let full_bytes = (bits / 8) as usize;
    if addr[..full_bytes] != network[..full_bytes] {
        return false;
    }
    let rem_bits = bits % 8;
    if rem_bits == 0 {
        return true;
    }
    let mask = 0xFFu8 << (8 - rem_bits);
    (addr[full_bytes] & mask) == (network[full_bytes] & mask)
}

/// Parse `pattern` as `a.b.c.d/p`, `ipv6::/p`, or a bare address (implying a
/// full-length prefix), and test whether `addr_str` falls within it.
///
/// Returns `false` (rather than an error) for any unparseable input or a
/// family mismatch between `addr_str` and `pattern` — callers treat a
/// malformed ban mask as simply not matching.
pub fn match_cidr(addr_str: &str, pattern: &str) -> bool {
    let addr: IpAddr = match addr_str.parse() {
        Ok(a) => a,
        Err(_) => return false,
    };

    let net: IpNet = if pattern.contains('/') {
        match IpNet::from_str(pattern) {
            Ok(n) => n,
            Err(_) => return false,
        }
    } else {
        match pattern.parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => IpNet::from(std::net::Ipv4Addr::from(v4)),
            Ok(IpAddr::V6(v6)) => IpNet::from(std::net::Ipv6Addr::from(v6)),
            Err(_) => return false,
        }
    };

    match (addr, net) {
        (IpAddr::V4(a), IpNet::V4(n)) => {
            match_cidr_bits(&a.octets(), &n.network().octets(), n.prefix_len())
        }
        (IpAddr::V6(a), IpNet::V6(n)) => {
            match_cidr_bits(&a.octets(), &n.network().octets(), n.prefix_len())
        }
        _ => false,
    }
}

/// Match a string against a wildcard pattern with IRC case-insensitivity.
///
/// Supports `*` (zero or more characters) and `?` (exactly one character).
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern_lower: Vec<char> = pattern.chars().map(irc_lower_char).collect();
    let text_lower: Vec<char> = text.chars().map(irc_lower_char).collect();
    wildcard_match_impl(&pattern_lower, &text_lower)
}

fn wildcard_match_impl(pattern: &[char], text: &[char]) -> bool {
    let mut p = 0;
    let mut t = 0;
    let mut star_p = None;
    let mut star_t = 0;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star_p = Some(p);
            star_t = t;
            p += 1;
        } else if let Some(sp) = star_p {
            p = sp + 1;
            star_t += 1;
            t = star_t;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

/// The three components of a `nick!user@host` mask, each defaulting to `*`
/// when absent from the source text.
struct Nuh<'a> {
    nick: &'a str,
    user: &'a str,
    host: &'a str,
}

fn split_nuh(s: &str) -> Nuh<'_> {
    let (nick, rest) = match s.split_once('!') {
        Some((n, r)) => (n, r),
        None => ("*", s),
    };
    let (user, host) = match rest.split_once('@') {
        Some((u, h)) => (u, h),
        None => ("*", rest),
    };
    let nick = if nick.is_empty() { "*" } else { nick };
    let user = if user.is_empty() { "*" } else { user };
    let host = if host.is_empty() { "*" } else { host };
    Nuh { nick, user, host }
}

/// Match a full `nick!user@host` string against a ban/except/invex mask
/// (component A). The host segment is tried as a CIDR network first (if the
/// pattern's host contains `/` or looks like a bare address) and falls back
/// to wildcard matching otherwise.
pub fn match_mask_nuh(nuh: &str, pattern: &str) -> bool {
    let actual = split_nuh(nuh);
    let want = split_nuh(pattern);

    if !wildcard_match(want.nick, actual.nick) {
        return false;
    }
    if !wildcard_match(want.user, actual.user) {
        return false;
    }

    if want.host.contains('/') {
        match_cidr(actual.host, want.host)
    } else if want.host.parse::<IpAddr>().is_ok() && actual.host.parse::<IpAddr>().is_ok() {
        match_cidr(actual.host, want.host)
    } else {
        wildcard_match(want.host, actual.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cidr_ipv4_prefix_match() {
        assert!(match_cidr("1.2.3.4", "1.2.0.0/16"));
        assert!(!match_cidr("1.3.0.0", "1.2.0.0/16"));
    }

    #[test]
    fn cidr_never_matches_across_families() {
        assert!(!match_cidr("1.2.3.4", "::/0"));
        assert!(!match_cidr("::1", "0.0.0.0/0"));
    }

    #[test]
    fn cidr_ipv6_prefix_match() {
        assert!(match_cidr("2001:db8::1", "2001:db8::/32"));
        assert!(!match_cidr("2001:db9::1", "2001:db8::/32"));
    }

    #[test]
    fn cidr_bare_address_is_exact() {
        assert!(match_cidr("1.2.3.4", "1.2.3.4"));
        assert!(!match_cidr("1.2.3.5", "1.2.3.4"));
    }

    #[test]
    fn wildcard_basic_patterns() {
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("te?t", "test"));
        assert!(!wildcard_match("te?t", "tests"));
        assert!(wildcard_match("TEST*", "testing"));
        assert!(wildcard_match("#channel[*]", "#CHANNEL{test}"));
    }

    #[test]
    fn mask_matches_hostmask_with_wildcards() {
        assert!(match_mask_nuh("nick!user@host.example.com", "*!*@*.example.com"));
        assert!(match_mask_nuh("baduser!evil@anywhere.net", "baduser!*@*"));
        assert!(!match_mask_nuh("user!admin@host", "admin!*@*"));
    }

    #[test]
    fn mask_matches_hostmask_with_cidr_host() {
        assert!(match_mask_nuh("nick!user@1.2.3.4", "*!*@1.2.0.0/16"));
        assert!(!match_mask_nuh("nick!user@1.3.0.0", "*!*@1.2.0.0/16"));
    }

    #[test]
    fn mask_defaults_missing_segments_to_star() {
        assert!(match_mask_nuh("anynick!anyuser@host", "*@host"));
    }
}
