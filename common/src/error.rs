use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HardwareError {
    #[error("duty {0} exceeds the 10-bit PWM range")]
    DutyOutOfRange(u16),
    #[error("frequency {0} Hz is not supported by the PWM peripheral")]
    UnsupportedFrequency(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TlvError {
    #[error("datagram of {0} bytes is shorter than the header")]
    TooShort(usize),
    #[error("bad magic marker {0:#06x}")]
    BadMagic(u16),
    #[error("checksum mismatch (datagram {received:#06x}, computed {computed:#06x})")]
    ChecksumMismatch { received: u16, computed: u16 },
    #[error("entry at offset {0} runs past the end of the datagram")]
    Truncated(usize),
    #[error("missing or incorrect auth token")]
    Unauthorized,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    #[error("malformed request line: {0:?}")]
    RequestLine(String),
    #[error("malformed header line: {0:?}")]
    Header(String),
    #[error("invalid Content-Length: {0:?}")]
    ContentLength(String),
    #[error("request body of {0} bytes exceeds the limit")]
    BodyTooLarge(usize),
    #[error("connection closed before the request was complete")]
    Incomplete,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("bad request: {0}")]
    BadRequest(#[from] serde_json::Error),
    #[error("bad request: payload is not a JSON object")]
    NotAnObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DatagramError {
    #[error(transparent)]
    Tlv(#[from] TlvError),
    #[error(transparent)]
    Hardware(#[from] HardwareError),
}
