use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModemError {
    #[error("Bit position {position} out of range (limit {limit})")]
    OutOfRange { position: usize, limit: usize },

    #[error("Bit buffer capacity of {capacity} bits exceeded")]
    BufferOverflow { capacity: usize },

    #[error("Invalid chunk width: {0} bits")]
    InvalidChunkWidth(usize),

    #[error("Required field '{0}' is not set")]
    InvalidField(&'static str),

    #[error("Field '{field}' value {value} does not fit in {width} bits")]
    FieldOverflow {
        field: &'static str,
        value: u32,
        width: usize,
    },

    #[error("Character 0x{byte:02X} has no {coding} code")]
    Unencodable { byte: u8, coding: &'static str },

    #[error("Payload length {0} bytes is outside the supported range")]
    InvalidLength(usize),

    #[error("Unsupported method combination: {0}")]
    UnsupportedMethod(String),

    #[error("No interleaver depth available for a section of {0} bits")]
    NoInterleaverDepth(usize),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Insufficient data")]
    InsufficientData,

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    #[error("Transmit snapshot lock is contended")]
    LockContention,

    #[error("Message queue is full")]
    QueueFull,

    #[error("FFT error: {0}")]
    FftError(String),
}

pub type Result<T> = std::result::Result<T, ModemError>;
