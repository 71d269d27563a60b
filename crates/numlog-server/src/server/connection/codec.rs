use bytes::{Buf, BytesMut};
use numlog_core::{Message, TERMINATE_TOKEN, contains_terminate_token};
use tokio_util::codec::Decoder;

/// Bytes carried between discarded chunks so a shutdown token split across
/// them is still found.
const TOKEN_OVERLAP: usize = TERMINATE_TOKEN.len() - 1;

/// Splits a byte stream on `\n` and classifies each line.
///
/// Unlike a UTF-8 line codec this decoder never fails: invalid UTF-8 and
/// over-long lines are reported as [`Message::Malformed`] and decoding
/// continues with the next line. A line longer than `max_length` bytes is
/// never buffered whole; it is dropped chunk by chunk up to the next `\n`.
/// The dropped bytes are still searched for the shutdown token, so such a line
/// yields [`Message::Terminate`] if it carries one and a single `Malformed`
/// otherwise.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    max_length: usize,
    /// Index into the buffer up to which `\n` has already been searched for.
    next_index: usize,
    discard: Option<Discard>,
}

/// State of an over-long line being dropped.
#[derive(Debug, Clone, Default)]
struct Discard {
    /// Last [`TOKEN_OVERLAP`] bytes dropped so far.
    tail: Vec<u8>,
    /// Whether this line already produced a message.
    reported: bool,
}

impl Discard {
    /// Searches `dropped`, and the seam between it and the previous chunk, for
    /// the shutdown token.
    fn scan(&mut self, dropped: &[u8]) -> bool {
        let mut seam = core::mem::take(&mut self.tail);
        seam.extend_from_slice(&dropped[..dropped.len().min(TOKEN_OVERLAP)]);
        let found = contains_terminate_token(&seam) || contains_terminate_token(dropped);

        self.tail = if dropped.len() >= TOKEN_OVERLAP {
            dropped[dropped.len() - TOKEN_OVERLAP..].to_vec()
        } else {
            seam[seam.len().saturating_sub(TOKEN_OVERLAP)..].to_vec()
        };
        found
    }
}

impl MessageCodec {
    /// `max_length` excludes the `\n` terminator.
    pub const fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discard: None,
        }
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, Self::Error> {
        loop {
            // Never look further than one byte past the longest valid line.
            let read_to = core::cmp::min(self.max_length.saturating_add(1), buf.len());
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            if let Some(discard) = &mut self.discard {
                let end = newline.unwrap_or(read_to);
                let unreported = !discard.reported;
                let terminate = unreported && discard.scan(&buf[..end]);
                discard.reported |= terminate;
                self.next_index = 0;

                if newline.is_some() {
                    buf.advance(end + 1);
                    self.discard = None;
                    if terminate {
                        return Ok(Some(Message::Terminate));
                    }
                    if unreported {
                        return Ok(Some(Message::Malformed));
                    }
                } else {
                    buf.advance(end);
                    if terminate {
                        return Ok(Some(Message::Terminate));
                    }
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                continue;
            }

            match newline {
                Some(end) => {
                    self.next_index = 0;
                    let line = buf.split_to(end + 1);
                    return Ok(Some(Message::classify_bytes(&line[..end])));
                }
                None if buf.len() > self.max_length => {
                    self.next_index = 0;
                    self.discard = Some(Discard::default());
                }
                None => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, Self::Error> {
        if let Some(message) = self.decode(buf)? {
            return Ok(Some(message));
        }

        self.next_index = 0;
        if let Some(discard) = self.discard.take() {
            buf.clear();
            return Ok((!discard.reported).then_some(Message::Malformed));
        }
        if buf.is_empty() {
            return Ok(None);
        }

        // Unterminated final line.
        let line = buf.split();
        Ok(Some(Message::classify_bytes(&line)))
    }
}
