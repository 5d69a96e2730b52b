//! Manager-interface wire format
//!
//! Every message is a block of `Key: Value` lines terminated by an empty
//! line. The only exception is the one-line greeting the switch sends right
//! after the TCP connection is accepted.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use uuid::Uuid;

use super::AmiError;

/// Inbound block: either a response to one of our actions or an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmiMessage {
    headers: Vec<(String, String)>,
}

impl AmiMessage {
    pub fn from_headers(headers: Vec<(String, String)>) -> Self {
        Self { headers }
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// First value for a key; keys compare case-insensitively.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for a repeated key, in arrival order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn action_id(&self) -> Option<&str> {
        self.get("ActionID")
    }

    pub fn response(&self) -> Option<&str> {
        self.get("Response")
    }

    pub fn event_name(&self) -> Option<&str> {
        self.get("Event")
    }

    pub fn message(&self) -> Option<&str> {
        self.get("Message")
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.response().map(|r| r.to_ascii_lowercase()).as_deref(),
            Some("success") | Some("follows") | Some("goodbye")
        )
    }

    /// CLI output carried by a `Command` response, one line per `Output` header.
    pub fn output(&self) -> String {
        self.get_all("Output").collect::<Vec<_>>().join("\n")
    }
}

/// Outbound command. Every action carries a fresh correlation id.
#[derive(Debug, Clone)]
pub struct AmiAction {
    name: String,
    id: String,
    headers: Vec<(String, String)>,
}

impl AmiAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(name, Uuid::new_v4().to_string())
    }

    /// Use a correlation id chosen by the caller, for actions whose later
    /// events must be matched before the response arrives.
    pub fn with_id(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn header_opt(self, key: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.header(key, value),
            None => self,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    fn encode_into(&self, dst: &mut BytesMut) {
        put_line(dst, "Action", &self.name);
        put_line(dst, "ActionID", &self.id);
        for (key, value) in &self.headers {
            put_line(dst, key, value);
        }
        dst.put_slice(b"\r\n");
    }
}

fn put_line(dst: &mut BytesMut, key: &str, value: &str) {
    // A stray newline inside a value would end the block early
    let value = value.replace(['\r', '\n'], " ");
    dst.reserve(key.len() + value.len() + 4);
    dst.put_slice(key.as_bytes());
    dst.put_slice(b": ");
    dst.put_slice(value.as_bytes());
    dst.put_slice(b"\r\n");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// `Asterisk Call Manager/x.y.z`
    Banner(String),
    Message(AmiMessage),
}

/// Splits the byte stream into blocks regardless of how TCP chunks it.
#[derive(Debug)]
pub struct AmiCodec {
    expect_banner: bool,
}

impl AmiCodec {
    /// Client side: the first line received is the greeting.
    pub fn new() -> Self {
        Self { expect_banner: true }
    }

    /// Server side (used by test doubles): blocks only.
    pub fn without_banner() -> Self {
        Self { expect_banner: false }
    }
}

impl Default for AmiCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for AmiCodec {
    type Item = Inbound;
    type Error = AmiError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>, AmiError> {
        if self.expect_banner {
            let Some(pos) = src.iter().position(|b| *b == b'\n') else {
                return Ok(None);
            };
            let line = src.split_to(pos + 1);
            self.expect_banner = false;
            let text = String::from_utf8_lossy(&line).trim().to_string();
            return Ok(Some(Inbound::Banner(text)));
        }

        loop {
            let skip = src.iter().take_while(|b| **b == b'\r' || **b == b'\n').count();
            let _ = src.split_to(skip);

            let Some((end, terminator)) = find_block_end(src) else {
                return Ok(None);
            };
            let block = src.split_to(end + terminator);
            let message = parse_block(&block[..end]);
            if !message.is_empty() {
                return Ok(Some(Inbound::Message(message)));
            }
        }
    }
}

impl Encoder<AmiAction> for AmiCodec {
    type Error = AmiError;

    fn encode(&mut self, action: AmiAction, dst: &mut BytesMut) -> Result<(), AmiError> {
        action.encode_into(dst);
        Ok(())
    }
}

/// Returns the length of the block (final newline included) and the size of
/// the blank line that terminates it.
fn find_block_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut from = 0;
    while let Some(offset) = buf[from..].iter().position(|b| *b == b'\n') {
        let newline = from + offset;
        let rest = &buf[newline + 1..];
        if rest.starts_with(b"\r\n") {
            return Some((newline + 1, 2));
        }
        if rest.starts_with(b"\n") {
            return Some((newline + 1, 1));
        }
        from = newline + 1;
    }
    None
}

fn parse_block(block: &[u8]) -> AmiMessage {
    let text = String::from_utf8_lossy(block);
    let mut headers = Vec::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line == "--END COMMAND--" {
            continue;
        }
        match line.split_once(':') {
            Some((key, value)) if !key.contains(' ') => {
                let value = value.strip_prefix(' ').unwrap_or(value).trim_end();
                headers.push((key.trim().to_string(), value.to_string()));
            }
            // Pre-13 `Response: Follows` bodies carry bare CLI lines
            _ => headers.push(("Output".to_string(), line.to_string())),
        }
    }

    AmiMessage { headers }
}
