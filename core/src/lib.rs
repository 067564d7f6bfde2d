//! Acoustic modem core for low-rate underwater links
//!
//! Packets are framed with a header and a payload section, each protected by
//! a validation code and optional error correction, then sent as binary FSK
//! or frequency-hopped BFSK tones. The custom protocol and a JANUS-compatible
//! SMS profile share the same pipeline.

pub mod bits;
pub mod cargo;
pub mod config;
pub mod convolutional;
pub mod correction;
pub mod demodulator;
pub mod detection;
pub mod error;
pub mod evaluate;
pub mod frequency;
pub mod goertzel;
pub mod hamming;
pub mod interleaver;
pub mod message;
pub mod modem;
pub mod modulator;
pub mod noise;
pub mod packet;
pub mod preamble;
pub mod sample_buffer;
pub mod sync;
pub mod window;

pub use bits::BitBuffer;
pub use config::{
    ConvolutionalCode, CorrectionMethod, DemodDecision, DetectionMethod, DspConfig, Hopper, Modulation, Protocol,
    SyncMethod, WindowFunction,
};
pub use error::{ModemError, Result};
pub use evaluate::{bit_error_rate, EvalPattern, EVAL_MESSAGE_LENGTH};
pub use message::{DataType, EvalInfo, Message, MessageType, PreambleFields, SmsCoding};
pub use modem::{Modem, ModemOptions, ModemState, MSG_QUEUE_SIZE};
pub use modulator::{Modulator, WaveformStep, WaveformStepper};
pub use noise::{FixedNoise, NoiseConfig, NoiseEstimator, RollingNoiseEstimator};
pub use packet::{BitMessage, PacketFlags, PACKET_CAPACITY_BITS};
pub use sample_buffer::{SampleRing, SampleSource};
pub use sync::{SyncConfig, SyncStatus, Synchronizer};
