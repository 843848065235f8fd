//! Output buffer with tail-only last-line extraction.
//!
//! Guests can print long boot logs before the first prompt shows up. Only the
//! last `search_depth` bytes are ever examined when looking for the last line,
//! so matching cost does not grow with the amount of output collected.

use std::borrow::Cow;

use bytes::BytesMut;

/// Longest escape sequence held back while waiting for its final byte.
const MAX_ESCAPE_LEN: usize = 64;

/// Offset of an escape sequence left unfinished at the end of `data`.
///
/// Output arrives in arbitrary chunks, so a colour code can be cut in two.
/// Stripping each half separately would leave the tail (`2m`) in the text.
pub fn incomplete_escape_start(data: &[u8]) -> Option<usize> {
    let start = memchr::memrchr(0x1b, data)?;
    let rest = &data[start + 1..];
    if rest.len() >= MAX_ESCAPE_LEN {
        return None;
    }

    let complete = match rest.split_first() {
        None => false,
        // CSI: parameter and intermediate bytes, then a final byte.
        Some((b'[', tail)) => tail.iter().any(|b| (0x40..=0x7e).contains(b)),
        // OSC ends with BEL; an `ESC \` ending is found as its own escape.
        Some((b']', tail)) => tail.contains(&0x07),
        Some(_) => true,
    };
    (!complete).then_some(start)
}

/// Buffer for accumulating child output during one read call.
#[derive(Debug)]
pub struct OutputBuffer {
    /// The accumulated output, ANSI escapes removed.
    buffer: BytesMut,

    /// How many bytes from the end are examined for the last line.
    search_depth: usize,

    /// Unfinished escape sequence from the previous chunk.
    partial: Vec<u8>,
}

impl OutputBuffer {
    /// Create a new buffer with the specified search depth.
    pub fn new(search_depth: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            search_depth,
            partial: Vec::new(),
        }
    }

    /// Extend the buffer with new data, stripping ANSI escape codes.
    ///
    /// An escape sequence cut off at the end of `data` is held back and
    /// completed by the next call.
    pub fn extend(&mut self, data: &[u8]) {
        let mut data = if self.partial.is_empty() {
            data.to_vec()
        } else {
            let mut joined = std::mem::take(&mut self.partial);
            joined.extend_from_slice(data);
            joined
        };
        if let Some(start) = incomplete_escape_start(&data) {
            self.partial = data.split_off(start);
        }

        let cleaned = strip_ansi_escapes::strip(&data);
        self.buffer.extend_from_slice(&cleaned);
    }

    /// The last line containing anything besides whitespace.
    ///
    /// Trailing whitespace on that line is kept, a trailing `\r` is not.
    pub fn last_line(&self) -> Cow<'_, str> {
        let start = self.buffer.len().saturating_sub(self.search_depth);
        let tail = &self.buffer[start..];

        let Some(last_char) = tail.iter().rposition(|b| !b.is_ascii_whitespace()) else {
            return Cow::Borrowed("");
        };

        let line_start = memchr::memrchr(b'\n', &tail[..last_char]).map_or(0, |i| i + 1);
        let line_end = memchr::memchr(b'\n', &tail[last_char..]).map_or(tail.len(), |i| last_char + i);

        let mut line = &tail[line_start..line_end];
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        String::from_utf8_lossy(line)
    }

    /// Take ownership of the buffer contents as text and reset.
    pub fn take_string(&mut self) -> String {
        let data = self.buffer.split();
        String::from_utf8_lossy(&data).into_owned()
    }

    /// Get the buffer contents as a string (lossy UTF-8 conversion).
    pub fn as_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.buffer)
    }

    /// Get the current buffer length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.partial.clear();
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ansi_stripping() {
        let mut buffer = OutputBuffer::new(100);
        buffer.extend(b"\x1b[32mlogin: \x1b[0m");
        assert_eq!(buffer.as_str_lossy(), "login: ");
    }

    #[test]
    fn test_last_line_skips_blank_lines() {
        let mut buffer = OutputBuffer::new(100);
        buffer.extend(b"Welcome\r\nguest login: ");
        assert_eq!(buffer.last_line(), "guest login: ");

        buffer.extend(b"\r\n\r\n");
        assert_eq!(buffer.last_line(), "guest login: ");
    }

    #[test]
    fn test_last_line_spans_chunks() {
        let mut buffer = OutputBuffer::new(100);
        buffer.extend(b"root@guest's pass");
        buffer.extend(b"word: ");
        assert_eq!(buffer.last_line(), "root@guest's password: ");
    }

    #[test]
    fn test_last_line_only_searches_tail() {
        let mut buffer = OutputBuffer::new(16);
        buffer.extend(b"Password: \n");
        buffer.extend(&[b'x'; 100]);
        assert_eq!(buffer.last_line(), "x".repeat(16));
    }

    #[test]
    fn test_escape_split_across_chunks() {
        let prompt = regex::Regex::new(r"^\[.*\][#$]\s*$").unwrap();
        let mut buffer = OutputBuffer::new(100);

        buffer.extend(b"Last login: today\r\n\x1b[01;3");
        assert_eq!(buffer.last_line(), "Last login: today");

        buffer.extend(b"2m[root@guest ~]# ");
        assert_eq!(buffer.last_line(), "[root@guest ~]# ");
        assert!(prompt.is_match(&buffer.last_line()));
    }

    #[test]
    fn test_incomplete_escape_start() {
        assert_eq!(incomplete_escape_start(b"abc\x1b"), Some(3));
        assert_eq!(incomplete_escape_start(b"abc\x1b[01;3"), Some(3));
        assert_eq!(incomplete_escape_start(b"\x1b]0;title"), Some(0));
        assert_eq!(incomplete_escape_start(b"\x1b[0mabc"), None);
        assert_eq!(incomplete_escape_start(b"\x1b]0;title\x07"), None);
        assert_eq!(incomplete_escape_start(b"\x1b(B"), None);
        assert_eq!(incomplete_escape_start(b"plain"), None);
    }

    #[test]
    fn test_empty_and_take() {
        let mut buffer = OutputBuffer::default();
        assert_eq!(buffer.last_line(), "");

        buffer.extend(b"data\n");
        assert_eq!(buffer.take_string(), "data\n");
        assert!(buffer.is_empty());
    }
}
