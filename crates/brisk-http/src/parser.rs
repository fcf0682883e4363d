//! Incremental HTTP/1.x request parser.
//!
//! Bytes are fed in as they arrive off the socket; the parser buffers
//! across feeds and advances a request-line / headers / body state
//! machine. Body bytes are appended to the request body in the chunks
//! they arrive in. An `Upgrade` header short-circuits at
//! headers-complete so the connection can switch protocols.

use brisk_core::{Error, HeaderTable, HttpVersion, Method, Request};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid request line")]
    InvalidRequestLine,
    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),
    #[error("invalid header")]
    InvalidHeader,
    #[error("request line too long")]
    RequestLineTooLong,
    #[error("header line too long")]
    HeaderLineTooLong,
    #[error("too many headers")]
    TooManyHeaders,
    #[error("unsupported transfer-encoding")]
    InvalidTransferEncoding,
    #[error("ambiguous body length")]
    AmbiguousBodyLength,
    #[error("invalid chunked body")]
    InvalidChunk,
    #[error("request too large")]
    TooLarge,
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::TooLarge => {
                Error::PayloadTooLarge("request exceeds the configured size limit".into())
            }
            _ => Error::InvalidUsage("Bad Request".into()),
        }
    }
}

/// Parsing limits.
#[derive(Debug, Clone)]
pub struct ParseLimits {
    pub max_request_size: usize,
    pub max_request_line_len: usize,
    pub max_header_count: usize,
    pub max_header_line_len: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_request_size: 1024 * 1024,
            max_request_line_len: 8 * 1024,
            max_header_count: 100,
            max_header_line_len: 8 * 1024,
        }
    }
}

/// Result of a feed.
#[derive(Debug)]
pub enum ParseStatus {
    /// A full request, body included.
    Complete { request: Request },
    /// Headers complete and an `Upgrade` header is present. The body,
    /// if any, is not parsed; remaining bytes stay buffered.
    Upgrade { request: Request },
    /// More data required.
    Incomplete,
}

#[derive(Debug)]
enum BodyKind {
    Length { remaining: usize },
    Chunked { state: ChunkState },
}

#[derive(Debug, Clone, Copy)]
enum ChunkState {
    Size,
    Data { remaining: usize },
    DataCrlf,
    Trailer,
}

#[derive(Debug)]
enum State {
    RequestLine,
    Headers {
        method: Method,
        target: String,
        version: HttpVersion,
        headers: HeaderTable,
        count: usize,
    },
    Body {
        request: Request,
        kind: BodyKind,
    },
}

/// Incremental parser. One instance per connection; state carries over
/// between requests for keep-alive pipelining.
#[derive(Debug)]
pub struct RequestParser {
    limits: ParseLimits,
    buffer: Vec<u8>,
    current_size: usize,
    state: State,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::with_limits(ParseLimits::default())
    }

    pub fn with_limits(limits: ParseLimits) -> Self {
        Self {
            limits,
            buffer: Vec::new(),
            current_size: 0,
            state: State::RequestLine,
        }
    }

    pub fn with_max_request_size(mut self, max: usize) -> Self {
        self.limits.max_request_size = max;
        self
    }

    /// True when no request is in flight and nothing is buffered.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::RequestLine) && self.buffer.is_empty()
    }

    /// Take whatever is buffered beyond the parsed head. Used after an
    /// upgrade to seed the frame reader.
    pub fn take_buffered(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// Feed new bytes and advance. Call again with an empty slice to
    /// parse a pipelined request already in the buffer.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<ParseStatus, ParseError> {
        self.buffer.extend_from_slice(bytes);
        if self.current_size + self.buffer.len() > self.limits.max_request_size {
            return Err(ParseError::TooLarge);
        }

        loop {
            match std::mem::replace(&mut self.state, State::RequestLine) {
                State::RequestLine => {
                    let Some(line_end) = find_crlf(&self.buffer) else {
                        if self.buffer.len() > self.limits.max_request_line_len {
                            return Err(ParseError::RequestLineTooLong);
                        }
                        return Ok(ParseStatus::Incomplete);
                    };
                    if line_end > self.limits.max_request_line_len {
                        return Err(ParseError::RequestLineTooLong);
                    }
                    let (method, target, version) = parse_request_line(&self.buffer[..line_end])?;
                    self.consume(line_end + 2);
                    self.state = State::Headers {
                        method,
                        target,
                        version,
                        headers: HeaderTable::empty(),
                        count: 0,
                    };
                }
                State::Headers {
                    method,
                    target,
                    version,
                    mut headers,
                    mut count,
                } => {
                    let Some(line_end) = find_crlf(&self.buffer) else {
                        if self.buffer.len() > self.limits.max_header_line_len {
                            return Err(ParseError::HeaderLineTooLong);
                        }
                        self.state = State::Headers { method, target, version, headers, count };
                        return Ok(ParseStatus::Incomplete);
                    };

                    if line_end == 0 {
                        // Blank line: headers complete.
                        self.consume(2);
                        let request = Request::new(method, &target, version, headers);
                        if request.headers.contains("upgrade") {
                            return Ok(ParseStatus::Upgrade { request });
                        }
                        match body_kind(&request)? {
                            None => {
                                self.current_size = 0;
                                return Ok(ParseStatus::Complete { request });
                            }
                            Some(kind) => {
                                self.state = State::Body { request, kind };
                            }
                        }
                        continue;
                    }

                    if line_end > self.limits.max_header_line_len {
                        return Err(ParseError::HeaderLineTooLong);
                    }
                    count += 1;
                    if count > self.limits.max_header_count {
                        return Err(ParseError::TooManyHeaders);
                    }
                    let line = &self.buffer[..line_end];
                    if line.contains(&0) || matches!(line.first(), Some(b' ' | b'\t')) {
                        return Err(ParseError::InvalidHeader);
                    }
                    let line = String::from_utf8_lossy(line).into_owned();
                    if !headers.parse_line(&line) {
                        return Err(ParseError::InvalidHeader);
                    }
                    self.consume(line_end + 2);
                    self.state = State::Headers { method, target, version, headers, count };
                }
                State::Body { mut request, kind } => match kind {
                    BodyKind::Length { remaining } => {
                        let take = remaining.min(self.buffer.len());
                        if take > 0 {
                            request.body.append(self.buffer[..take].to_vec());
                            self.consume(take);
                        }
                        let remaining = remaining - take;
                        if remaining == 0 {
                            self.current_size = 0;
                            return Ok(ParseStatus::Complete { request });
                        }
                        self.state = State::Body {
                            request,
                            kind: BodyKind::Length { remaining },
                        };
                        return Ok(ParseStatus::Incomplete);
                    }
                    BodyKind::Chunked { state } => {
                        match self.advance_chunked(&mut request, state)? {
                            ChunkProgress::Complete => {
                                self.current_size = 0;
                                return Ok(ParseStatus::Complete { request });
                            }
                            ChunkProgress::Pending(state) => {
                                self.state = State::Body {
                                    request,
                                    kind: BodyKind::Chunked { state },
                                };
                                return Ok(ParseStatus::Incomplete);
                            }
                        }
                    }
                },
            }
        }
    }

    fn advance_chunked(
        &mut self,
        request: &mut Request,
        mut state: ChunkState,
    ) -> Result<ChunkProgress, ParseError> {
        loop {
            match state {
                ChunkState::Size => {
                    let Some(line_end) = find_crlf(&self.buffer) else {
                        return Ok(ChunkProgress::Pending(state));
                    };
                    let line = String::from_utf8_lossy(&self.buffer[..line_end]).into_owned();
                    let size_token = line.split(';').next().unwrap_or("").trim();
                    let size = usize::from_str_radix(size_token, 16)
                        .map_err(|_| ParseError::InvalidChunk)?;
                    self.consume(line_end + 2);
                    state = if size == 0 {
                        ChunkState::Trailer
                    } else {
                        ChunkState::Data { remaining: size }
                    };
                }
                ChunkState::Data { remaining } => {
                    let take = remaining.min(self.buffer.len());
                    if take == 0 {
                        return Ok(ChunkProgress::Pending(state));
                    }
                    request.body.append(self.buffer[..take].to_vec());
                    self.consume(take);
                    let remaining = remaining - take;
                    state = if remaining == 0 {
                        ChunkState::DataCrlf
                    } else {
                        ChunkState::Data { remaining }
                    };
                }
                ChunkState::DataCrlf => {
                    if self.buffer.len() < 2 {
                        return Ok(ChunkProgress::Pending(state));
                    }
                    if &self.buffer[..2] != b"\r\n" {
                        return Err(ParseError::InvalidChunk);
                    }
                    self.consume(2);
                    state = ChunkState::Size;
                }
                ChunkState::Trailer => {
                    let Some(line_end) = find_crlf(&self.buffer) else {
                        return Ok(ChunkProgress::Pending(state));
                    };
                    self.consume(line_end + 2);
                    if line_end == 0 {
                        return Ok(ChunkProgress::Complete);
                    }
                }
            }
        }
    }

    fn consume(&mut self, n: usize) {
        self.buffer.drain(..n);
        self.current_size += n;
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

enum ChunkProgress {
    Complete,
    Pending(ChunkState),
}

fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n")
}

fn parse_request_line(line: &[u8]) -> Result<(Method, String, HttpVersion), ParseError> {
    if line.iter().any(|&b| b == 0) {
        return Err(ParseError::InvalidRequestLine);
    }
    let mut parts = line.split(|&b| b == b' ').filter(|p| !p.is_empty());

    // Shape first: exactly three tokens, or the line is not a request
    // line at all. Only then does the method token get classified.
    let method_bytes = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    let target_bytes = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    let version_bytes = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    if parts.next().is_some() {
        return Err(ParseError::InvalidRequestLine);
    }

    let method_token =
        std::str::from_utf8(method_bytes).map_err(|_| ParseError::InvalidRequestLine)?;
    let method =
        Method::parse(method_token).ok_or_else(|| ParseError::InvalidMethod(method_token.into()))?;

    let target =
        std::str::from_utf8(target_bytes).map_err(|_| ParseError::InvalidRequestLine)?;

    let version_token =
        std::str::from_utf8(version_bytes).map_err(|_| ParseError::InvalidRequestLine)?;
    let version = HttpVersion::parse(version_token).unwrap_or(HttpVersion::Http11);

    Ok((method, target.to_string(), version))
}

fn body_kind(request: &Request) -> Result<Option<BodyKind>, ParseError> {
    let content_length = match request.headers.get("content-length") {
        Some(header) => Some(
            header
                .value()
                .trim()
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidHeader)?,
        ),
        None => None,
    };

    let chunked = match request.headers.get("transfer-encoding") {
        Some(header) => {
            let chunked = header
                .value()
                .split(',')
                .any(|v| v.trim().eq_ignore_ascii_case("chunked"));
            if !chunked {
                return Err(ParseError::InvalidTransferEncoding);
            }
            true
        }
        None => false,
    };

    if chunked && content_length.is_some() {
        return Err(ParseError::AmbiguousBodyLength);
    }
    if chunked {
        return Ok(Some(BodyKind::Chunked { state: ChunkState::Size }));
    }
    match content_length {
        Some(0) | None => Ok(None),
        Some(len) => Ok(Some(BodyKind::Length { remaining: len })),
    }
}
