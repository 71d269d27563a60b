use crate::{Error, Result};
use core::{fmt, str::FromStr};

/// Number of ASCII digits in a valid record.
pub const RECORD_LEN: usize = 9;

/// Case-sensitive substring that, anywhere in a line, requests server
/// shutdown.
pub const TERMINATE_TOKEN: &str = "terminate";

/// Whether `bytes` contains [`TERMINATE_TOKEN`].
pub fn contains_terminate_token(bytes: &[u8]) -> bool {
    let token = TERMINATE_TOKEN.as_bytes();
    bytes.windows(token.len()).any(|w| w == token)
}

/// A validated nine digit record.
///
/// Records are string keys, not numbers: leading zeros are significant, so
/// `000000001` and `1` are never the same record (the latter is not even a
/// valid one). The digits are stored inline, which keeps the type `Copy` and
/// makes membership sets cheap to hash.
///
/// # Example
///
/// ```
/// use numlog_core::Record;
///
/// let record = Record::parse("000000042").unwrap();
/// assert_eq!(record.as_str(), "000000042");
/// assert!(Record::parse("42").is_err());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Record([u8; RECORD_LEN]);

impl Record {
    /// Parses exactly nine ASCII digits. No sign, no whitespace, no trailing
    /// line terminator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRecord`] for anything else.
    pub fn parse(line: &str) -> Result<Self> {
        Self::from_ascii(line.as_bytes()).ok_or_else(|| Error::InvalidRecord {
            line: line.to_string(),
        })
    }

    /// Byte-level counterpart of [`Record::parse`] for framed network input.
    pub fn from_ascii(bytes: &[u8]) -> Option<Self> {
        let digits: [u8; RECORD_LEN] = bytes.try_into().ok()?;
        digits.iter().all(u8::is_ascii_digit).then_some(Self(digits))
    }

    /// Returns the record's digits.
    pub fn as_str(&self) -> &str {
        // SAFETY: `self.0` holds only ASCII digits, checked in `from_ascii`
        unsafe { core::str::from_utf8_unchecked(&self.0) }
    }

    pub const fn as_bytes(&self) -> &[u8; RECORD_LEN] {
        &self.0
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Record").field(&self.as_str()).finish()
    }
}

impl FromStr for Record {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for Record {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

/// The three message classes of the line protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// The line contains [`TERMINATE_TOKEN`].
    Terminate,
    /// The whole line is a valid record.
    Record(Record),
    /// Anything else. Dropped without touching any counter.
    Malformed,
}

impl Message {
    /// Classifies one line of input.
    ///
    /// The shutdown token wins over everything else and may appear anywhere in
    /// the line. Record matching is whole-line; a single trailing `\r` is
    /// ignored so `\r\n` terminated clients are accepted.
    pub fn classify(line: &str) -> Self {
        Self::classify_bytes(line.as_bytes())
    }

    /// Classifies one line of raw input, excluding its `\n` terminator.
    ///
    /// Lines that are not valid UTF-8 can still carry the shutdown token;
    /// otherwise they are malformed.
    pub fn classify_bytes(line: &[u8]) -> Self {
        if contains_terminate_token(line) {
            return Self::Terminate;
        }

        let line = line.strip_suffix(b"\r").unwrap_or(line);
        Record::from_ascii(line).map_or(Self::Malformed, Self::Record)
    }
}
