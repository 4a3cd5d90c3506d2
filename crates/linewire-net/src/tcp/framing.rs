//! Message framing for receive sessions.

use regex::Regex;

use crate::error::Result;

/// How a receive session splits the byte stream into messages.
#[derive(Clone, Debug)]
pub enum Framing {
    /// Each message ends with this character.
    Terminator(char),
    /// Each message is a match of a start/end pattern pair.
    Pattern(MessagePattern),
}

impl Framing {
    /// Terminator framing on `terminator`.
    pub fn terminator(terminator: char) -> Self {
        Self::Terminator(terminator)
    }

    /// Pattern framing between `start` and `end`.
    pub fn pattern(start: &str, end: &str) -> Result<Self> {
        MessagePattern::new(start, end).map(Self::Pattern)
    }
}

/// A compiled `start(?s)(.*?)end` message pattern.
///
/// `start` and `end` are regular expressions. To frame `$...*0F` style
/// messages use `"[$]"` and `"[*][A-Z0-9][A-Z0-9]"`.
#[derive(Clone, Debug)]
pub struct MessagePattern {
    start: String,
    end: String,
    regex: Regex,
}

impl MessagePattern {
    /// Compile the pattern for `start` and `end`.
    pub fn new(start: &str, end: &str) -> Result<Self> {
        let regex = Regex::new(&format!("{start}(?s)(.*?){end}"))?;
        Ok(Self {
            start: start.to_string(),
            end: end.to_string(),
            regex,
        })
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn end(&self) -> &str {
        &self.end
    }

    /// The full pattern text, as reported alongside each message.
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Remove every complete message from `buffer`.
    ///
    /// Everything up to the end of the last match is consumed, including
    /// noise between messages. Bytes after it stay for the next read.
    pub(crate) fn extract(&self, buffer: &mut String) -> Vec<String> {
        let mut messages = Vec::new();
        let mut consumed = 0;

        for found in self.regex.find_iter(buffer) {
            if found.is_empty() {
                continue;
            }
            messages.push(found.as_str().to_string());
            consumed = found.end();
        }

        if consumed > 0 {
            buffer.drain(..consumed);
        }
        messages
    }
}

/// Text accumulated by a pattern receive session.
///
/// Bytes are decoded as they arrive. An incomplete UTF-8 sequence at the end
/// of a read is held back until the rest of it arrives; invalid bytes become
/// U+FFFD.
#[derive(Debug, Default)]
pub(crate) struct MessageBuffer {
    text: String,
    partial: Vec<u8>,
}

impl MessageBuffer {
    /// Append raw bytes from one read.
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.partial.extend_from_slice(bytes);

        let mut rest: &[u8] = &self.partial;
        while !rest.is_empty() {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    rest = &[];
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    self.text.push_str(&String::from_utf8_lossy(valid));
                    let Some(invalid) = err.error_len() else {
                        // Truncated sequence; wait for the next read.
                        rest = after;
                        break;
                    };
                    self.text.push(char::REPLACEMENT_CHARACTER);
                    rest = &after[invalid..];
                }
            }
        }

        let consumed = self.partial.len() - rest.len();
        self.partial.drain(..consumed);
    }

    /// Remove every complete message matching `pattern`.
    pub(crate) fn extract(&mut self, pattern: &MessagePattern) -> Vec<String> {
        pattern.extract(&mut self.text)
    }

    /// Buffered bytes, decoded or not.
    pub(crate) fn len(&self) -> usize {
        self.text.len() + self.partial.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn clear(&mut self) {
        self.text.clear();
        self.partial.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;

    fn nmea() -> MessagePattern {
        MessagePattern::new("[$]", "[*][A-Z0-9][A-Z0-9]").unwrap()
    }

    #[test]
    fn test_single_message() {
        let pattern = nmea();
        let mut buffer = "$12.5*0F".to_string();

        assert_eq!(pattern.extract(&mut buffer), vec!["$12.5*0F"]);
        assert!(buffer.is_empty());
        assert_eq!(pattern.as_str(), "[$](?s)(.*?)[*][A-Z0-9][A-Z0-9]");
    }

    #[test]
    fn test_partial_message_is_kept() {
        let pattern = nmea();
        let mut buffer = "noise$1*AB$2.0".to_string();

        assert_eq!(pattern.extract(&mut buffer), vec!["$1*AB"]);
        assert_eq!(buffer, "$2.0");

        buffer.push_str("*C3\r\n");
        assert_eq!(pattern.extract(&mut buffer), vec!["$2.0*C3"]);
        assert_eq!(buffer, "\r\n");
    }

    #[test]
    fn test_message_spanning_lines() {
        let pattern = MessagePattern::new("<", ">").unwrap();
        let mut buffer = "<a\nb><c>".to_string();

        assert_eq!(pattern.extract(&mut buffer), vec!["<a\nb>", "<c>"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_no_match_leaves_buffer() {
        let pattern = nmea();
        let mut buffer = "12.5*0F".to_string();

        assert!(pattern.extract(&mut buffer).is_empty());
        assert_eq!(buffer, "12.5*0F");
    }

    #[test]
    fn test_buffer_joins_character_split_across_reads() {
        let pattern = nmea();
        let mut buffer = MessageBuffer::default();

        // "é" is C3 A9; the first read stops inside it.
        buffer.push(b"$\xC3");
        assert!(buffer.extract(&pattern).is_empty());
        assert_eq!(buffer.len(), 2);

        buffer.push(b"\xA9*0F");
        assert_eq!(buffer.extract(&pattern), vec!["$\u{e9}*0F"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_buffer_replaces_invalid_bytes() {
        let pattern = nmea();
        let mut buffer = MessageBuffer::default();

        buffer.push(b"$a\xFFb*0F");
        assert_eq!(buffer.extract(&pattern), vec!["$a\u{FFFD}b*0F"]);

        buffer.push(b"$\xF0\x9F");
        buffer.clear();
        assert!(buffer.is_empty());
        buffer.push(b"$1*AB");
        assert_eq!(buffer.extract(&pattern), vec!["$1*AB"]);
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            Framing::pattern("[", "x"),
            Err(NetworkError::InvalidPattern(_))
        ));
        assert!(matches!(Framing::terminator('\n'), Framing::Terminator('\n')));
    }
}
