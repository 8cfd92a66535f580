//! Binary framing for the bidirectional synthesis protocol
//!
//! Every frame is a 4-byte header, an optional block and a length-prefixed
//! payload. All integers are big-endian.
//!
//! ```text
//! byte 0: version << 4 | header size in 4-byte words
//! byte 1: message type << 4 | type flags
//! byte 2: serialization << 4 | compression
//! byte 3: reserved
//! ```
//!
//! With the event flag set, the optional block starts with an `i32` event
//! code. Connection-level events follow it directly with the payload; every
//! other event first carries a length-prefixed session id. Error frames carry
//! an `i32` error code instead of an event.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Cursor, Read};

use crate::error::{VoiceError, VoiceResult};

pub const PROTOCOL_VERSION: u8 = 0b0001;
pub const HEADER_WORDS: u8 = 0b0001;

/// Type flag: the optional block carries an event code
pub const FLAG_WITH_EVENT: u8 = 0b0100;

pub const NAMESPACE: &str = "BidirectionalTTS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    ClientRequest,
    ServerFullResponse,
    ServerAudioOnly,
    ErrorInfo,
}

impl MessageType {
    pub fn nibble(self) -> u8 {
        match self {
            MessageType::ClientRequest => 0b0001,
            MessageType::ServerFullResponse => 0b1001,
            MessageType::ServerAudioOnly => 0b1011,
            MessageType::ErrorInfo => 0b1111,
        }
    }

    pub fn from_nibble(value: u8) -> VoiceResult<Self> {
        match value {
            0b0001 => Ok(MessageType::ClientRequest),
            0b1001 => Ok(MessageType::ServerFullResponse),
            0b1011 => Ok(MessageType::ServerAudioOnly),
            0b1111 => Ok(MessageType::ErrorInfo),
            other => Err(VoiceError::MalformedFrame(format!(
                "unknown message type {:#06b}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Serialization {
    Raw,
    Json,
    Other(u8),
}

impl Serialization {
    fn nibble(self) -> u8 {
        match self {
            Serialization::Raw => 0,
            Serialization::Json => 1,
            Serialization::Other(v) => v & 0x0f,
        }
    }

    fn from_nibble(value: u8) -> Self {
        match value {
            0 => Serialization::Raw,
            1 => Serialization::Json,
            other => Serialization::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    StartConnection,
    FinishConnection,
    ConnectionStarted,
    ConnectionFailed,
    ConnectionFinished,
    StartSession,
    FinishSession,
    SessionStarted,
    SessionFinished,
    SessionFailed,
    TaskRequest,
    SentenceStart,
    SentenceEnd,
    TtsResponse,
    Other(i32),
}

impl Event {
    pub fn code(self) -> i32 {
        match self {
            Event::StartConnection => 1,
            Event::FinishConnection => 2,
            Event::ConnectionStarted => 50,
            Event::ConnectionFailed => 51,
            Event::ConnectionFinished => 52,
            Event::StartSession => 100,
            Event::FinishSession => 102,
            Event::SessionStarted => 150,
            Event::SessionFinished => 152,
            Event::SessionFailed => 153,
            Event::TaskRequest => 200,
            Event::SentenceStart => 350,
            Event::SentenceEnd => 351,
            Event::TtsResponse => 352,
            Event::Other(code) => code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Event::StartConnection,
            2 => Event::FinishConnection,
            50 => Event::ConnectionStarted,
            51 => Event::ConnectionFailed,
            52 => Event::ConnectionFinished,
            100 => Event::StartSession,
            102 => Event::FinishSession,
            150 => Event::SessionStarted,
            152 => Event::SessionFinished,
            153 => Event::SessionFailed,
            200 => Event::TaskRequest,
            350 => Event::SentenceStart,
            351 => Event::SentenceEnd,
            352 => Event::TtsResponse,
            other => Event::Other(other),
        }
    }

    /// Whether a session id precedes the payload
    pub fn carries_session_id(self) -> bool {
        !matches!(
            self,
            Event::StartConnection
                | Event::FinishConnection
                | Event::ConnectionStarted
                | Event::ConnectionFailed
        )
    }
}

/// One decoded protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: MessageType,
    pub flags: u8,
    pub serialization: Serialization,
    pub event: Option<Event>,
    pub session_id: Option<String>,
    /// Only on `ErrorInfo` frames
    pub error_code: Option<i32>,
    /// Audio bytes, JSON metadata or a connection id depending on the event
    pub payload: Vec<u8>,
}

impl Frame {
    fn client(event: Event, serialization: Serialization, session_id: Option<&str>, payload: Vec<u8>) -> Self {
        Self {
            message_type: MessageType::ClientRequest,
            flags: FLAG_WITH_EVENT,
            serialization,
            event: Some(event),
            session_id: session_id.map(str::to_string),
            error_code: None,
            payload,
        }
    }

    pub fn start_connection() -> Self {
        Self::client(Event::StartConnection, Serialization::Raw, None, b"{}".to_vec())
    }

    pub fn finish_connection() -> Self {
        Self::client(Event::FinishConnection, Serialization::Raw, None, b"{}".to_vec())
    }

    pub fn start_session(session_id: &str, payload: Vec<u8>) -> Self {
        Self::client(Event::StartSession, Serialization::Json, Some(session_id), payload)
    }

    pub fn task_request(session_id: &str, payload: Vec<u8>) -> Self {
        Self::client(Event::TaskRequest, Serialization::Json, Some(session_id), payload)
    }

    pub fn finish_session(session_id: &str) -> Self {
        Self::client(Event::FinishSession, Serialization::Json, Some(session_id), b"{}".to_vec())
    }

    /// Server-side event frame
    ///
    /// Every event except the connection-level ones needs a session id to
    /// encode; the provider sends an empty one for ConnectionFinished.
    pub fn server(event: Event, session_id: Option<&str>, payload: Vec<u8>) -> Self {
        let message_type = if event == Event::TtsResponse {
            MessageType::ServerAudioOnly
        } else {
            MessageType::ServerFullResponse
        };
        let serialization = if event == Event::TtsResponse {
            Serialization::Raw
        } else {
            Serialization::Json
        };
        Self {
            message_type,
            flags: FLAG_WITH_EVENT,
            serialization,
            event: Some(event),
            session_id: session_id.map(str::to_string),
            error_code: None,
            payload,
        }
    }

    pub fn audio(session_id: &str, audio: Vec<u8>) -> Self {
        Self::server(Event::TtsResponse, Some(session_id), audio)
    }

    pub fn error(code: i32, message: &str) -> Self {
        Self {
            message_type: MessageType::ErrorInfo,
            flags: 0,
            serialization: Serialization::Json,
            event: None,
            session_id: None,
            error_code: Some(code),
            payload: message.as_bytes().to_vec(),
        }
    }

    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Whether this frame belongs to `session_id` (frames without one match)
    pub fn is_for_session(&self, session_id: &str) -> bool {
        self.session_id.as_deref().map_or(true, |id| id == session_id)
    }
}

fn write_block(out: &mut Vec<u8>, bytes: &[u8]) -> VoiceResult<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| VoiceError::Protocol(format!("block of {} bytes is too large", bytes.len())))?;
    out.write_u32::<BigEndian>(len)?;
    out.extend_from_slice(bytes);
    Ok(())
}

pub fn encode(frame: &Frame) -> VoiceResult<Vec<u8>> {
    let mut out = Vec::with_capacity(16 + frame.payload.len());
    out.push((PROTOCOL_VERSION << 4) | HEADER_WORDS);
    out.push((frame.message_type.nibble() << 4) | (frame.flags & 0x0f));
    out.push(frame.serialization.nibble() << 4);
    out.push(0);

    if frame.message_type == MessageType::ErrorInfo {
        out.write_i32::<BigEndian>(frame.error_code.unwrap_or(0))?;
    } else if frame.flags & FLAG_WITH_EVENT != 0 {
        let event = frame
            .event
            .ok_or_else(|| VoiceError::Protocol("event flag set without an event".to_string()))?;
        out.write_i32::<BigEndian>(event.code())?;
        if event.carries_session_id() {
            let session_id = frame.session_id.as_deref().ok_or_else(|| {
                VoiceError::MalformedFrame(format!("{:?} frame without a session id", event))
            })?;
            write_block(&mut out, session_id.as_bytes())?;
        }
    }

    write_block(&mut out, &frame.payload)?;
    Ok(out)
}

fn truncated(what: &str) -> VoiceError {
    VoiceError::MalformedFrame(format!("truncated {}", what))
}

fn read_block(cursor: &mut Cursor<&[u8]>, what: &str) -> VoiceResult<Vec<u8>> {
    let len = cursor.read_u32::<BigEndian>().map_err(|_| truncated(what))? as usize;
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(VoiceError::MalformedFrame(format!(
            "{} length {} exceeds {} remaining bytes",
            what, len, remaining
        )));
    }
    let mut block = vec![0u8; len];
    cursor.read_exact(&mut block).map_err(|_| truncated(what))?;
    Ok(block)
}

pub fn decode(bytes: &[u8]) -> VoiceResult<Frame> {
    if bytes.len() < 4 {
        return Err(truncated("header"));
    }
    let header_words = (bytes[0] & 0x0f) as usize;
    if header_words == 0 {
        return Err(VoiceError::MalformedFrame("zero header size".to_string()));
    }
    let message_type = MessageType::from_nibble(bytes[1] >> 4)?;
    let flags = bytes[1] & 0x0f;
    let serialization = Serialization::from_nibble(bytes[2] >> 4);
    let compression = bytes[2] & 0x0f;
    if compression != 0 {
        return Err(VoiceError::MalformedFrame(format!(
            "unsupported compression {}",
            compression
        )));
    }

    let header_len = header_words * 4;
    if bytes.len() < header_len {
        return Err(truncated("extended header"));
    }
    let mut cursor = Cursor::new(bytes);
    cursor.set_position(header_len as u64);

    let mut frame = Frame {
        message_type,
        flags,
        serialization,
        event: None,
        session_id: None,
        error_code: None,
        payload: Vec::new(),
    };

    if message_type == MessageType::ErrorInfo {
        frame.error_code = Some(cursor.read_i32::<BigEndian>().map_err(|_| truncated("error code"))?);
    } else if flags & FLAG_WITH_EVENT != 0 {
        let event = Event::from_code(cursor.read_i32::<BigEndian>().map_err(|_| truncated("event code"))?);
        frame.event = Some(event);
        if event.carries_session_id() {
            let id = read_block(&mut cursor, "session id")?;
            frame.session_id = Some(
                String::from_utf8(id)
                    .map_err(|_| VoiceError::MalformedFrame("session id is not UTF-8".to_string()))?,
            );
        }
    }

    if (cursor.position() as usize) < bytes.len() {
        frame.payload = read_block(&mut cursor, "payload")?;
    }
    Ok(frame)
}

/// Voice settings sent with every session request
#[derive(Debug, Clone)]
pub struct SpeechParams {
    pub speaker: String,
    pub format: String,
    pub sample_rate: u32,
    pub speech_rate: i32,
}

#[derive(Serialize)]
struct RequestUser<'a> {
    uid: &'a str,
}

#[derive(Serialize)]
struct AudioParams<'a> {
    format: &'a str,
    sample_rate: u32,
    speech_rate: i32,
}

#[derive(Serialize)]
struct RequestParams<'a> {
    text: &'a str,
    speaker: &'a str,
    audio_params: AudioParams<'a>,
}

#[derive(Serialize)]
struct Request<'a> {
    user: RequestUser<'a>,
    event: i32,
    namespace: &'static str,
    req_params: RequestParams<'a>,
}

/// JSON payload for StartSession and TaskRequest frames
pub fn request_payload(event: Event, uid: &str, text: &str, params: &SpeechParams) -> VoiceResult<Vec<u8>> {
    let request = Request {
        user: RequestUser { uid },
        event: event.code(),
        namespace: NAMESPACE,
        req_params: RequestParams {
            text,
            speaker: &params.speaker,
            audio_params: AudioParams {
                format: &params.format,
                sample_rate: params.sample_rate,
                speech_rate: params.speech_rate,
            },
        },
    };
    Ok(serde_json::to_vec(&request)?)
}
