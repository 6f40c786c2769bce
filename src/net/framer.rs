//! Per-connection line framer (component C): accumulates raw bytes into a
//! bounded ring buffer and yields complete, bounded lines.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramerError {
    #[error("recvq buffer exceeded")]
    BufferOverflow,
}

#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    cap: usize,
}

impl LineFramer {
    /// `cap` is the configured `limits.recvq_bytes`; a connection that never
    /// sends a newline within this many bytes has its recvq killed rather
    /// than growing unbounded.
    pub fn new(cap: usize) -> Self {
        Self { buf: Vec::new(), cap }
    }

    /// Append freshly-read bytes, rejecting the feed if it would grow the
    /// buffer past `cap`. The caller kills the connection on error.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), FramerError> {
        if self.buf.len() + bytes.len() > self.cap {
            return Err(FramerError::BufferOverflow);
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Pull the next complete line out of the buffer, if any. A line ends at
    /// the first `\n`; a preceding `\r` is stripped; empty lines are
    /// silently discarded; lines over the 512-byte wire limit are
    /// truncated to 510 bytes before decoding.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let pos = self.buf.iter().position(|&b| b == b'\n')?;
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop(); // the '\n' itself
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let max_content = irc_proto::message::MAX_LINE_LENGTH - 2;
            if line.len() > max_content {
                line.truncate(max_content);
            }
            if line.is_empty() {
                continue;
            }
            return Some(String::from_utf8_lossy(&line).into_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_CAP: usize = 64 * 1024;

    #[test]
    fn extracts_one_line_and_strips_crlf() {
        let mut f = LineFramer::new(TEST_CAP);
        f.feed(b"PING :foo\r\n").unwrap();
        assert_eq!(f.next_line().as_deref(), Some("PING :foo"));
        assert_eq!(f.next_line(), None);
    }

    #[test]
    fn discards_empty_lines() {
        let mut f = LineFramer::new(TEST_CAP);
        f.feed(b"\r\n\r\nPING\r\n").unwrap();
        assert_eq!(f.next_line().as_deref(), Some("PING"));
    }

    #[test]
    fn splits_across_multiple_feeds() {
        let mut f = LineFramer::new(TEST_CAP);
        f.feed(b"NICK al").unwrap();
        assert_eq!(f.next_line(), None);
        f.feed(b"ice\r\n").unwrap();
        assert_eq!(f.next_line().as_deref(), Some("NICK alice"));
    }

    #[test]
    fn truncates_overlong_line_to_510_bytes() {
        let mut f = LineFramer::new(TEST_CAP);
        let body = "a".repeat(600);
        f.feed(format!("{body}\r\n").as_bytes()).unwrap();
        let line = f.next_line().unwrap();
        assert_eq!(line.len(), 510);
    }

    #[test]
    fn rejects_feed_that_would_overflow_buffer() {
        let mut f = LineFramer::new(TEST_CAP);
        assert!(f.feed(&vec![b'a'; TEST_CAP + 1]).is_err());
    }

    #[test]
    fn respects_configured_cap_smaller_than_default() {
        let mut f = LineFramer::new(16);
        assert!(f.feed(&vec![b'a'; 17]).is_err());
    }
}
