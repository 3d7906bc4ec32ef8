use std::os::fd::RawFd;

use crate::buffer::SockBuffer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"GET" => Some(Method::Get),
            b"POST" => Some(Method::Post),
            _ => None,
        }
    }
}

/// Parsed first line of a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub url: String,
    pub version: String,
}

/// Where a request's parse currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpState {
    /// Expecting the request line.
    OnReqLine,
    /// Expecting header lines.
    OnReqHead,
    /// Consuming body bytes.
    OnReqBody,
    /// Out of buffered bytes; `resume` records where to continue.
    OnReqMore,
    /// Request fully parsed.
    OnReqDone,
    /// Malformed input; the connection should be dropped.
    OnReqError,
}

/// Per-connection request state: receive buffer plus parse position.
pub struct HttpRequest {
    pub(super) rbuf: SockBuffer,
    pub(super) state: HttpState,
    pub(super) resume: HttpState,
    pub(super) content_length: usize,
    pub(super) body_remaining: usize,
    pub(super) line: Option<RequestLine>,
}

impl HttpRequest {
    /// New request state reading from `fd` through a buffer of `buf_sz`
    /// bytes. Pass `fd = -1` to drive the parser purely from memory via
    /// [`HttpRequest::buffer_mut`] and `append`.
    pub fn new(fd: RawFd, buf_sz: usize) -> Self {
        Self {
            rbuf: SockBuffer::new(fd, buf_sz),
            state: HttpState::OnReqLine,
            resume: HttpState::OnReqMore,
            content_length: 0,
            body_remaining: 0,
            line: None,
        }
    }

    pub fn state(&self) -> HttpState {
        self.state
    }

    /// The state a suspended parse will resume in.
    pub fn resume_state(&self) -> HttpState {
        self.resume
    }

    /// Expected body length; typically called from a Content-Length field
    /// callback.
    pub fn set_content_length(&mut self, len: usize) {
        self.content_length = len;
    }

    pub fn content_length(&self) -> usize {
        self.content_length
    }

    /// Request line of the request being parsed, once seen.
    pub fn request_line(&self) -> Option<&RequestLine> {
        self.line.as_ref()
    }

    pub fn buffer_mut(&mut self) -> &mut SockBuffer {
        &mut self.rbuf
    }
}

impl std::fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRequest")
            .field("state", &self.state)
            .field("resume", &self.resume)
            .field("content_length", &self.content_length)
            .field("body_remaining", &self.body_remaining)
            .field("buffer", &self.rbuf)
            .finish()
    }
}
