//! Websocket upgrade handshake and frame codec (RFC 6455).
//!
//! SHA-1 and base64 are implemented here; the handshake needs nothing
//! stronger and it keeps the crypto surface out of the dependency
//! tree. The codec works over any async stream so tests can run it
//! over an in-memory duplex.

use brisk_core::{ChannelMessage, Error, Request, Response, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Handshake GUID (RFC 6455 section 4.2.2).
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Maximum accepted frame payload.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Maximum assembled message size across continuation frames.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("websocket i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket protocol error: {0}")]
    Protocol(String),
    #[error("websocket message too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },
    #[error("invalid utf-8 in text message")]
    InvalidUtf8,
}

// ============================================================================
// SHA-1 (RFC 3174)
// ============================================================================

#[allow(clippy::many_single_char_names)]
fn sha1(data: &[u8]) -> [u8; 20] {
    let mut h0: u32 = 0x6745_2301;
    let mut h1: u32 = 0xEFCD_AB89;
    let mut h2: u32 = 0x98BA_DCFE;
    let mut h3: u32 = 0x1032_5476;
    let mut h4: u32 = 0xC3D2_E1F0;

    let bit_len = (data.len() as u64) * 8;
    let mut msg = data.to_vec();
    msg.push(0x80);
    while (msg.len() % 64) != 56 {
        msg.push(0);
    }
    msg.extend_from_slice(&bit_len.to_be_bytes());

    for block in msg.chunks_exact(64) {
        let mut w = [0u32; 80];
        for (idx, word) in w.iter_mut().take(16).enumerate() {
            *word = u32::from_be_bytes([
                block[idx * 4],
                block[idx * 4 + 1],
                block[idx * 4 + 2],
                block[idx * 4 + 3],
            ]);
        }
        for idx in 16..80 {
            w[idx] = (w[idx - 3] ^ w[idx - 8] ^ w[idx - 14] ^ w[idx - 16]).rotate_left(1);
        }

        let (mut a, mut b, mut c, mut d, mut e) = (h0, h1, h2, h3, h4);

        #[allow(clippy::needless_range_loop)]
        for idx in 0..80 {
            let (f, k) = match idx {
                0..=19 => ((b & c) | ((!b) & d), 0x5A82_7999_u32),
                20..=39 => (b ^ c ^ d, 0x6ED9_EBA1_u32),
                40..=59 => ((b & c) | (b & d) | (c & d), 0x8F1B_BCDC_u32),
                _ => (b ^ c ^ d, 0xCA62_C1D6_u32),
            };

            let temp = a
                .rotate_left(5)
                .wrapping_add(f)
                .wrapping_add(e)
                .wrapping_add(k)
                .wrapping_add(w[idx]);
            e = d;
            d = c;
            c = b.rotate_left(30);
            b = a;
            a = temp;
        }

        h0 = h0.wrapping_add(a);
        h1 = h1.wrapping_add(b);
        h2 = h2.wrapping_add(c);
        h3 = h3.wrapping_add(d);
        h4 = h4.wrapping_add(e);
    }

    let mut result = [0u8; 20];
    result[0..4].copy_from_slice(&h0.to_be_bytes());
    result[4..8].copy_from_slice(&h1.to_be_bytes());
    result[8..12].copy_from_slice(&h2.to_be_bytes());
    result[12..16].copy_from_slice(&h3.to_be_bytes());
    result[16..20].copy_from_slice(&h4.to_be_bytes());
    result
}

// ============================================================================
// Base64
// ============================================================================

const BASE64_CHARS: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn base64_encode(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len().div_ceil(3) * 4);
    for chunk in data.chunks(3) {
        let b0 = u32::from(chunk[0]);
        let b1 = if chunk.len() > 1 { u32::from(chunk[1]) } else { 0 };
        let b2 = if chunk.len() > 2 { u32::from(chunk[2]) } else { 0 };
        let triple = (b0 << 16) | (b1 << 8) | b2;

        result.push(BASE64_CHARS[((triple >> 18) & 0x3F) as usize] as char);
        result.push(BASE64_CHARS[((triple >> 12) & 0x3F) as usize] as char);
        if chunk.len() > 1 {
            result.push(BASE64_CHARS[((triple >> 6) & 0x3F) as usize] as char);
        } else {
            result.push('=');
        }
        if chunk.len() > 2 {
            result.push(BASE64_CHARS[(triple & 0x3F) as usize] as char);
        } else {
            result.push('=');
        }
    }
    result
}

fn base64_decoded_len(input: &str) -> Option<usize> {
    let bytes = input.as_bytes();
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return None;
    }
    let padding = bytes.iter().rev().take_while(|&&b| b == b'=').count();
    if padding > 2 {
        return None;
    }
    let valid = bytes[..bytes.len() - padding]
        .iter()
        .all(|b| BASE64_CHARS.contains(b));
    if !valid {
        return None;
    }
    Some(bytes.len() / 4 * 3 - padding)
}

// ============================================================================
// Handshake
// ============================================================================

/// Compute the `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(client_key: &str) -> String {
    let mut input = String::with_capacity(client_key.len() + WS_GUID.len());
    input.push_str(client_key.trim());
    input.push_str(WS_GUID);
    base64_encode(&sha1(input.as_bytes()))
}

/// Validate an upgrade request and return the client key.
///
/// Checks per RFC 6455 section 4.2.1: `Upgrade: websocket`,
/// `Connection: upgrade`, a key that decodes to 16 bytes, and
/// `Sec-WebSocket-Version: 13`.
pub fn validate_upgrade(request: &Request) -> Result<String, Error> {
    let invalid = || Error::InvalidUsage("Invalid websocket request".into());

    let upgrade = request.headers.get("upgrade").ok_or_else(invalid)?;
    if !upgrade
        .value()
        .split(',')
        .any(|v| v.trim().eq_ignore_ascii_case("websocket"))
    {
        return Err(invalid());
    }

    let connection = request.headers.get("connection").ok_or_else(invalid)?;
    if !connection
        .value()
        .split(',')
        .any(|v| v.trim().eq_ignore_ascii_case("upgrade"))
    {
        return Err(invalid());
    }

    let key = request
        .headers
        .get("sec-websocket-key")
        .map(|h| h.value().trim().to_string())
        .ok_or_else(invalid)?;
    if base64_decoded_len(&key) != Some(16) {
        return Err(invalid());
    }

    let version = request
        .headers
        .get("sec-websocket-version")
        .ok_or_else(invalid)?;
    if version.value().trim() != "13" {
        return Err(invalid());
    }

    Ok(key)
}

/// The `101 Switching Protocols` response for an accepted handshake.
/// Serialised with [`Response::channel`] by the connection.
pub fn build_upgrade_response(client_key: &str, subprotocol: Option<&str>) -> Response {
    let mut response = Response::text("", StatusCode::SWITCHING_PROTOCOLS);
    response.append_header("upgrade", "websocket");
    response.append_header("connection", "Upgrade");
    response.append_header("sec-websocket-accept", accept_key(client_key));
    if let Some(protocol) = subprotocol {
        response.append_header("sec-websocket-protocol", protocol.to_string());
    }
    response
}

// ============================================================================
// Frame codec
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_byte(value: u8) -> Result<Self, WsError> {
        match value & 0x0F {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(WsError::Protocol(format!("unknown opcode: 0x{other:X}"))),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

#[derive(Debug)]
struct Frame {
    fin: bool,
    opcode: Opcode,
    payload: Vec<u8>,
}

/// A de-framed websocket session over an upgraded stream.
///
/// Bytes the HTTP parser buffered past the upgrade head are replayed
/// before the stream is read again.
#[derive(Debug)]
pub struct WebSocketChannel<S> {
    stream: S,
    pending: Vec<u8>,
    closed: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> WebSocketChannel<S> {
    pub fn new(stream: S, leftover: Vec<u8>) -> Self {
        Self { stream, pending: leftover, closed: false }
    }

    /// Receive the next data message. Pings are answered inline; a
    /// close frame is echoed and yields `None`.
    pub async fn receive(&mut self) -> Result<Option<ChannelMessage>, WsError> {
        let mut message_opcode: Option<Opcode> = None;
        let mut message_data: Vec<u8> = Vec::new();

        loop {
            let frame = self.read_frame().await?;

            if frame.opcode.is_control() {
                match frame.opcode {
                    Opcode::Close => {
                        self.close().await?;
                        return Ok(None);
                    }
                    Opcode::Ping => {
                        self.write_frame(true, Opcode::Pong, &frame.payload).await?;
                        continue;
                    }
                    _ => continue,
                }
            }

            match frame.opcode {
                Opcode::Continuation => {
                    if message_opcode.is_none() {
                        return Err(WsError::Protocol(
                            "continuation frame without initial frame".into(),
                        ));
                    }
                }
                Opcode::Text | Opcode::Binary => {
                    if message_opcode.is_some() {
                        return Err(WsError::Protocol(
                            "new data frame while previous message is incomplete".into(),
                        ));
                    }
                    message_opcode = Some(frame.opcode);
                }
                _ => {}
            }

            let new_size = message_data.len() + frame.payload.len();
            if new_size > MAX_MESSAGE_SIZE {
                return Err(WsError::TooLarge { size: new_size, limit: MAX_MESSAGE_SIZE });
            }
            message_data.extend_from_slice(&frame.payload);

            if frame.fin {
                break;
            }
        }

        match message_opcode {
            Some(Opcode::Text) => {
                let text =
                    String::from_utf8(message_data).map_err(|_| WsError::InvalidUtf8)?;
                Ok(Some(ChannelMessage::Text(text)))
            }
            Some(Opcode::Binary) => Ok(Some(ChannelMessage::Binary(message_data))),
            _ => Err(WsError::Protocol("empty message".into())),
        }
    }

    /// Send a data message as a single unmasked frame.
    pub async fn send(&mut self, message: &ChannelMessage) -> Result<(), WsError> {
        let opcode = match message {
            ChannelMessage::Text(_) => Opcode::Text,
            ChannelMessage::Binary(_) => Opcode::Binary,
        };
        self.write_frame(true, opcode, message.as_bytes()).await
    }

    /// Send a normal-closure close frame. Idempotent.
    pub async fn close(&mut self) -> Result<(), WsError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.write_frame(true, Opcode::Close, &1000u16.to_be_bytes()).await
    }

    async fn read_frame(&mut self) -> Result<Frame, WsError> {
        let mut header = [0u8; 2];
        self.fill(&mut header).await?;

        let fin = (header[0] & 0x80) != 0;
        let rsv = (header[0] >> 4) & 0x07;
        if rsv != 0 {
            return Err(WsError::Protocol("reserved bits must be 0".into()));
        }

        let opcode = Opcode::from_byte(header[0])?;
        let masked = (header[1] & 0x80) != 0;
        if !masked {
            return Err(WsError::Protocol(
                "client-to-server frames must be masked".into(),
            ));
        }

        let payload_len: usize = match header[1] & 0x7F {
            len @ 0..=125 => len as usize,
            126 => {
                let mut len_bytes = [0u8; 2];
                self.fill(&mut len_bytes).await?;
                u16::from_be_bytes(len_bytes) as usize
            }
            _ => {
                let mut len_bytes = [0u8; 8];
                self.fill(&mut len_bytes).await?;
                let len = u64::from_be_bytes(len_bytes);
                usize::try_from(len).map_err(|_| WsError::TooLarge {
                    size: usize::MAX,
                    limit: MAX_FRAME_SIZE,
                })?
            }
        };

        if opcode.is_control() {
            if !fin {
                return Err(WsError::Protocol(
                    "control frames must not be fragmented".into(),
                ));
            }
            if payload_len > 125 {
                return Err(WsError::Protocol(
                    "control frame payload must not exceed 125 bytes".into(),
                ));
            }
        }
        if payload_len > MAX_FRAME_SIZE {
            return Err(WsError::TooLarge { size: payload_len, limit: MAX_FRAME_SIZE });
        }

        let mut mask = [0u8; 4];
        self.fill(&mut mask).await?;

        let mut payload = vec![0u8; payload_len];
        if payload_len > 0 {
            self.fill(&mut payload).await?;
        }
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }

        Ok(Frame { fin, opcode, payload })
    }

    async fn write_frame(
        &mut self,
        fin: bool,
        opcode: Opcode,
        payload: &[u8],
    ) -> Result<(), WsError> {
        let mut header = Vec::with_capacity(10);
        header.push(if fin { 0x80 } else { 0x00 } | opcode.to_byte());

        let len = payload.len();
        if len < 126 {
            header.push(len as u8);
        } else if len <= 0xFFFF {
            header.push(126);
            header.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            header.push(127);
            header.extend_from_slice(&(len as u64).to_be_bytes());
        }

        self.stream.write_all(&header).await?;
        if !payload.is_empty() {
            self.stream.write_all(payload).await?;
        }
        self.stream.flush().await?;
        Ok(())
    }

    /// Fill `buf`, draining replayed bytes before touching the stream.
    async fn fill(&mut self, buf: &mut [u8]) -> Result<(), WsError> {
        let from_pending = self.pending.len().min(buf.len());
        if from_pending > 0 {
            buf[..from_pending].copy_from_slice(&self.pending[..from_pending]);
            self.pending.drain(..from_pending);
        }
        if from_pending < buf.len() {
            self.stream.read_exact(&mut buf[from_pending..]).await?;
        }
        Ok(())
    }
}
