mod wav;

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn};
use thiserror::Error;
use uamodem_core::{
    BitMessage, ConvolutionalCode, CorrectionMethod, DspConfig, Message, Modem, ModemError, ModemOptions,
    Modulation, Modulator, NoiseConfig, PreambleFields, Protocol, SmsCoding, SyncMethod,
};

#[derive(Debug, Error)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Config error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Modem(#[from] ModemError),

    #[error("Unsupported WAV format: {0} bits per sample")]
    UnsupportedWav(u16),

    #[error("WAV is sampled at {found} Hz but the modem expects {expected} Hz")]
    SampleRate { found: u32, expected: u32 },

    #[error("No message found in {0}")]
    NoMessage(PathBuf),

    #[error("{0}")]
    Usage(String),
}

#[derive(Parser)]
#[command(name = "uamodem")]
#[command(about = "Acoustic modem packets to and from WAV files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a file as one packet and render it to a WAV file
    Encode {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        #[command(flatten)]
        link: LinkArgs,

        #[command(flatten)]
        header: HeaderArgs,

        /// Silence before the packet, in milliseconds
        #[arg(long, default_value = "400")]
        lead_in_ms: u32,

        /// Standard deviation of the added Gaussian noise
        #[arg(long, default_value = "0.002")]
        noise_level: f32,

        /// Output amplitude relative to full scale
        #[arg(long, default_value = "0.1")]
        amplitude: f32,

        #[arg(long, default_value = "1")]
        seed: u64,
    },

    /// Receive a packet from a WAV file and write its payload
    Decode {
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        #[command(flatten)]
        link: LinkArgs,
    },

    /// Print the waveform steps for a file as JSON
    Steps {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        #[command(flatten)]
        link: LinkArgs,

        #[command(flatten)]
        header: HeaderArgs,
    },
}

#[derive(Args)]
struct LinkArgs {
    /// JSON file with a full or partial DSP configuration
    #[arg(long, value_name = "FILE.JSON")]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    protocol: Option<ProtocolArg>,

    #[arg(long, value_enum)]
    modulation: Option<ModulationArg>,

    /// Error correction for both sections
    #[arg(long, value_enum)]
    ecc: Option<EccArg>,

    /// Interleave the coded sections
    #[arg(long)]
    interleave: bool,

    #[arg(long, value_enum)]
    sync: Option<SyncArg>,

    #[arg(long)]
    baud: Option<f32>,
}

#[derive(Args)]
struct HeaderArgs {
    /// Modem id (custom) or sender id (JANUS)
    #[arg(long, default_value = "1")]
    id: u8,

    /// JANUS destination id
    #[arg(long, default_value = "0")]
    destination: u8,

    /// JANUS SMS character coding
    #[arg(long, value_enum, default_value = "ascii8")]
    coding: CodingArg,

    /// Custom header stationary flag
    #[arg(long)]
    stationary: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProtocolArg {
    Custom,
    Janus,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModulationArg {
    Fsk,
    Fhbfsk,
}

#[derive(Clone, Copy, ValueEnum)]
enum EccArg {
    None,
    Hamming,
    Convolutional,
}

#[derive(Clone, Copy, ValueEnum)]
enum SyncArg {
    None,
    Pn32,
}

#[derive(Clone, Copy, ValueEnum)]
enum CodingArg {
    Ascii8,
    Ascii7,
    Ascii6,
    Utf8,
}

impl From<CodingArg> for SmsCoding {
    fn from(arg: CodingArg) -> Self {
        match arg {
            CodingArg::Ascii8 => SmsCoding::Ascii8,
            CodingArg::Ascii7 => SmsCoding::Ascii7,
            CodingArg::Ascii6 => SmsCoding::Ascii6,
            CodingArg::Utf8 => SmsCoding::Utf8,
        }
    }
}

impl LinkArgs {
    /// The config file (or the defaults), with command line overrides on top.
    fn dsp_config(&self) -> Result<DspConfig, CliError> {
        let mut cfg = match &self.config {
            Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
            None => match self.protocol {
                Some(ProtocolArg::Janus) => DspConfig::janus(),
                _ => DspConfig::default(),
            },
        };
        if let Some(protocol) = self.protocol {
            cfg.protocol = match protocol {
                ProtocolArg::Custom => Protocol::Custom,
                ProtocolArg::Janus => Protocol::Janus,
            };
        }
        if let Some(modulation) = self.modulation {
            cfg.modulation = match modulation {
                ModulationArg::Fsk => Modulation::Fsk,
                ModulationArg::Fhbfsk => Modulation::Fhbfsk,
            };
        }
        if let Some(ecc) = self.ecc {
            let method = match ecc {
                EccArg::None => CorrectionMethod::None,
                EccArg::Hamming => CorrectionMethod::Hamming,
                EccArg::Convolutional => CorrectionMethod::Convolutional(ConvolutionalCode::Janus),
            };
            cfg.preamble_ecc = method;
            cfg.cargo_ecc = method;
        }
        if self.interleave {
            cfg.interleaver_enabled = true;
        }
        if let Some(sync) = self.sync {
            cfg.sync_method = match sync {
                SyncArg::None => SyncMethod::None,
                SyncArg::Pn32 => SyncMethod::Pn32Janus,
            };
        }
        if let Some(baud) = self.baud {
            cfg.baud_rate = baud;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

impl HeaderArgs {
    fn message(&self, data: &[u8], cfg: &DspConfig) -> Message {
        let msg = match std::str::from_utf8(data) {
            Ok(text) => Message::from_text(text),
            Err(_) => Message::from_bits(data, data.len() * 8),
        };
        let header = match cfg.protocol {
            Protocol::Custom => PreambleFields::custom(self.id, self.stationary),
            Protocol::Janus => PreambleFields::janus_sms(self.id, self.destination, self.coding.into()),
        };
        msg.with_preamble(header)
    }
}

/// Noise averaging short enough for the lead-in of a file.
fn file_noise_config() -> NoiseConfig {
    NoiseConfig {
        entry_ms: 20,
        average_entries: 10,
        warmup_entries: 3,
        ..NoiseConfig::default()
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Encode {
            input,
            output,
            link,
            header,
            lead_in_ms,
            noise_level,
            amplitude,
            seed,
        } => encode_command(&input, &output, &link, &header, lead_in_ms, noise_level, amplitude, seed),
        Commands::Decode { input, output, link } => decode_command(&input, &output, &link),
        Commands::Steps { input, link, header } => steps_command(&input, &link, &header),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

#[allow(clippy::too_many_arguments)]
fn encode_command(
    input: &Path,
    output: &Path,
    link: &LinkArgs,
    header: &HeaderArgs,
    lead_in_ms: u32,
    noise_level: f32,
    amplitude: f32,
    seed: u64,
) -> Result<(), CliError> {
    let cfg = link.dsp_config()?;
    let data = std::fs::read(input)?;
    info!("Read {} bytes from {}", data.len(), input.display());

    let packet = BitMessage::prepare_tx(&header.message(&data, &cfg), &cfg)?;
    let modulator = Modulator::new(&cfg)?.with_amplitude(amplitude)?;
    let steps = modulator.steps(&packet)?;

    let lead_in = (u64::from(lead_in_ms) * u64::from(cfg.sample_rate) / 1000) as usize;
    let tail = 4 * cfg.samples_per_symbol();
    let samples = wav::render(&steps, cfg.sample_rate, lead_in, tail, noise_level, seed)?;
    wav::write(output, &samples, cfg.sample_rate)?;

    info!(
        "Encoded {} bits as {} steps, {} samples ({:.2} s) to {}",
        packet.final_length(),
        steps.len(),
        samples.len(),
        samples.len() as f32 / cfg.sample_rate as f32,
        output.display()
    );
    Ok(())
}

fn decode_command(input: &Path, output: &Path, link: &LinkArgs) -> Result<(), CliError> {
    let cfg = link.dsp_config()?;
    let (samples, sample_rate) = wav::read(input)?;
    if sample_rate != cfg.sample_rate {
        return Err(CliError::SampleRate {
            found: sample_rate,
            expected: cfg.sample_rate,
        });
    }
    info!("Read {} samples from {}", samples.len(), input.display());

    let options = ModemOptions {
        noise: file_noise_config(),
        ..ModemOptions::default()
    };
    let mut modem = Modem::new(cfg, options)?;
    for chunk in samples.chunks(1024) {
        modem.push_samples(chunk)?;
        if let Err(e) = modem.tick() {
            warn!("Receiver reset: {e}");
        }
        if let Some(msg) = modem.receive() {
            if msg.error_detected {
                warn!("Message received with errors");
            }
            std::fs::write(output, &msg.data)?;
            info!(
                "Decoded {} bytes ({:?}) from sender {}, corrected: {}",
                msg.data.len(),
                msg.data_type,
                msg.sender_id,
                msg.corrected
            );
            info!("Wrote {}", output.display());
            return Ok(());
        }
    }
    Err(CliError::NoMessage(input.to_path_buf()))
}

fn steps_command(input: &Path, link: &LinkArgs, header: &HeaderArgs) -> Result<(), CliError> {
    let cfg = link.dsp_config()?;
    let data = std::fs::read(input)?;
    let packet = BitMessage::prepare_tx(&header.message(&data, &cfg), &cfg)?;
    let steps = Modulator::new(&cfg)?.steps(&packet)?;
    println!("{}", serde_json::to_string_pretty(&steps)?);
    Ok(())
}
