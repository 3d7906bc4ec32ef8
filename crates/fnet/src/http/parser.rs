use fnet_core::NetResult;

use crate::trie::CbTrie;

use super::request::{HttpRequest, HttpState, Method, RequestLine};

/// Outcome of one [`HttpParser::process`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseStatus {
    /// Buffered bytes ran out mid-request; feed more and call again.
    Suspended,
    /// One full request was parsed; the next call starts the next request.
    Completed,
    /// Malformed input; the request cannot be recovered.
    Error,
}

type FieldCb = Box<dyn FnMut(&mut HttpRequest, &[u8])>;

/// Server-side parse configuration: the field-dispatch table plus the
/// request-line and body sinks.
pub struct HttpParser {
    fields: CbTrie<FieldCb>,
    reqline_cb: Option<Box<dyn FnMut(&RequestLine)>>,
    body_cb: Option<Box<dyn FnMut(&[u8])>>,
    scratch: Vec<u8>,
}

impl HttpParser {
    pub fn new() -> Self {
        Self {
            fields: CbTrie::new(),
            reqline_cb: None,
            body_cb: None,
            scratch: Vec::new(),
        }
    }

    /// Called once per request, after the request line parses.
    pub fn on_request_line(&mut self, cb: impl FnMut(&RequestLine) + 'static) {
        self.reqline_cb = Some(Box::new(cb));
    }

    /// Dispatch `cb` whenever a header named `name` arrives. Matching is
    /// case-insensitive and ignores hyphens, so `"Content-Length"` here
    /// matches `content-length` on the wire. The callback receives the
    /// request being parsed and the field value with leading whitespace
    /// trimmed.
    pub fn on_field(
        &mut self,
        name: &str,
        cb: impl FnMut(&mut HttpRequest, &[u8]) + 'static,
    ) -> NetResult<()> {
        let folded = fold_name(name.as_bytes());
        self.fields.insert(&folded, Box::new(cb))
    }

    /// Called for each chunk of body bytes as they become available.
    pub fn on_body(&mut self, cb: impl FnMut(&[u8]) + 'static) {
        self.body_cb = Some(Box::new(cb));
    }

    /// Consume buffered bytes, advancing `req`'s parse as far as they
    /// allow. Refills the buffer from the socket only once the buffered
    /// bytes are exhausted.
    pub fn process(&mut self, req: &mut HttpRequest) -> ParseStatus {
        loop {
            match req.state {
                HttpState::OnReqLine => {
                    match req.rbuf.read_line(b"\r\n") {
                        Some(raw) => {
                            self.scratch.clear();
                            self.scratch.extend_from_slice(raw);
                        }
                        None => {
                            req.resume = HttpState::OnReqLine;
                            req.state = HttpState::OnReqMore;
                            continue;
                        }
                    }
                    match parse_request_line(&self.scratch) {
                        Some(line) => {
                            if let Some(cb) = self.reqline_cb.as_mut() {
                                cb(&line);
                            }
                            req.line = Some(line);
                            req.state = HttpState::OnReqHead;
                        }
                        None => req.state = HttpState::OnReqError,
                    }
                }
                HttpState::OnReqHead => {
                    match req.rbuf.read_line(b"\r\n") {
                        Some(raw) if raw.is_empty() => {
                            // Blank line: headers done.
                            req.body_remaining = req.content_length;
                            req.state = if req.body_remaining > 0 {
                                HttpState::OnReqBody
                            } else {
                                HttpState::OnReqDone
                            };
                            continue;
                        }
                        Some(raw) => {
                            self.scratch.clear();
                            self.scratch.extend_from_slice(raw);
                        }
                        None => {
                            req.resume = HttpState::OnReqHead;
                            req.state = HttpState::OnReqMore;
                            continue;
                        }
                    }
                    let colon = match self.scratch.iter().position(|&b| b == b':') {
                        Some(at) => at,
                        None => {
                            req.state = HttpState::OnReqError;
                            continue;
                        }
                    };
                    let folded = fold_name(&self.scratch[..colon]);
                    let value = trim_leading(&self.scratch[colon + 1..]);
                    // Unregistered fields are skipped, not errors.
                    if let Some(cb) = self.fields.lookup_mut(&folded) {
                        cb(req, value);
                    }
                }
                HttpState::OnReqBody => {
                    let want = req.body_remaining;
                    let chunk = req.rbuf.read_text(want);
                    if chunk.is_empty() {
                        req.resume = HttpState::OnReqBody;
                        req.state = HttpState::OnReqMore;
                        continue;
                    }
                    let n = chunk.len();
                    if let Some(cb) = self.body_cb.as_mut() {
                        cb(chunk);
                    }
                    req.body_remaining -= n;
                    if req.body_remaining == 0 {
                        req.state = HttpState::OnReqDone;
                    }
                }
                HttpState::OnReqMore => {
                    if req.rbuf.free_space() == 0 {
                        req.rbuf.compact();
                        if req.rbuf.free_space() == 0 {
                            // A single line larger than the whole buffer.
                            req.state = HttpState::OnReqError;
                            continue;
                        }
                    }
                    if req.rbuf.fill() == 0 {
                        return ParseStatus::Suspended;
                    }
                    req.state = req.resume;
                    req.resume = HttpState::OnReqMore;
                }
                HttpState::OnReqDone => {
                    req.rbuf.compact();
                    req.content_length = 0;
                    req.body_remaining = 0;
                    req.state = HttpState::OnReqLine;
                    return ParseStatus::Completed;
                }
                HttpState::OnReqError => return ParseStatus::Error,
            }
        }
    }
}

impl Default for HttpParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Fold a field name for trie dispatch: lowercase ASCII letters, drop
/// hyphens, pass anything else through (an invalid byte then simply never
/// matches).
fn fold_name(name: &[u8]) -> Vec<u8> {
    name.iter()
        .filter(|&&b| b != b'-')
        .map(|&b| b.to_ascii_lowercase())
        .collect()
}

fn trim_leading(value: &[u8]) -> &[u8] {
    let start = value
        .iter()
        .position(|&b| b != b' ' && b != b'\t')
        .unwrap_or(value.len());
    &value[start..]
}

/// `METHOD SP url SP version`, extra spaces tolerated, anything else
/// malformed.
fn parse_request_line(raw: &[u8]) -> Option<RequestLine> {
    let mut parts = raw.split(|&b| b == b' ').filter(|p| !p.is_empty());
    let method = Method::from_bytes(parts.next()?)?;
    let url = std::str::from_utf8(parts.next()?).ok()?.to_owned();
    let version = std::str::from_utf8(parts.next()?).ok()?.to_owned();
    if parts.next().is_some() {
        return None;
    }
    Some(RequestLine {
        method,
        url,
        version,
    })
}
