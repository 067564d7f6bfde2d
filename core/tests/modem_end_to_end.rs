// Full audio path: one modem renders a transmission, the samples pick up
// noise, and a second modem synchronizes, demodulates and decodes them.

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use uamodem_core::{
    DataType, DspConfig, EvalPattern, Hopper, Message, Modem, ModemOptions, ModemState, Modulation, NoiseConfig,
    PreambleFields, SmsCoding, SyncMethod, WaveformStep,
};

const NOISE_SIGMA: f32 = 0.01;
const LEAD_IN: usize = 20_000;
const TAIL: usize = 3_000;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fast(cfg: DspConfig) -> DspConfig {
    DspConfig {
        baud_rate: 1000.0,
        ..cfg
    }
}

/// Everything the transmitting modem hands to its waveform generator.
fn transmit(cfg: &DspConfig, msg: Message) -> Vec<WaveformStep> {
    let mut modem = Modem::new(cfg.clone(), ModemOptions::default()).expect("Failed to create modem");
    let stepper = modem.stepper();
    modem.send(msg).unwrap();
    modem.tick().unwrap();
    assert_eq!(modem.state(), ModemState::DrivingTransducer);
    let mut steps = Vec::new();
    while let Some(step) = stepper.next_step().unwrap() {
        steps.push(step);
    }
    modem.tick().unwrap();
    assert_eq!(modem.state(), ModemState::Listening);
    steps
}

/// Phase-continuous rendering of the steps with noise around and on top.
fn render(steps: &[WaveformStep], sample_rate: u32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0f32, NOISE_SIGMA).unwrap();
    let mut samples = vec![0.0f32; LEAD_IN];
    let mut phase = 0.0f64;
    for step in steps {
        let count = (u64::from(step.duration_us) * u64::from(sample_rate) / 1_000_000) as usize;
        let delta = 2.0 * PI * f64::from(step.freq_hz) / f64::from(sample_rate);
        for _ in 0..count {
            samples.push(step.relative_amplitude * phase.sin() as f32);
            phase = (phase + delta) % (2.0 * PI);
        }
    }
    samples.extend(std::iter::repeat(0.0).take(TAIL));
    for sample in samples.iter_mut() {
        *sample += noise.sample(&mut rng);
    }
    samples
}

fn receive(cfg: &DspConfig, options: ModemOptions, samples: &[f32]) -> Vec<Message> {
    let mut modem = Modem::new(cfg.clone(), options).expect("Failed to create modem");
    let mut received = Vec::new();
    for chunk in samples.chunks(512) {
        modem.push_samples(chunk).unwrap();
        modem.tick().unwrap();
        while let Some(msg) = modem.receive() {
            received.push(msg);
        }
    }
    received
}

fn small_noise_config() -> NoiseConfig {
    NoiseConfig {
        entry_ms: 10,
        average_entries: 5,
        warmup_entries: 2,
        ..NoiseConfig::default()
    }
}

#[test]
fn test_fsk_onset_with_measured_noise() {
    init_logging();
    let cfg = fast(DspConfig::default());
    let msg = Message::from_text("ping 7").with_preamble(PreambleFields::custom(7, false));
    let samples = render(&transmit(&cfg, msg), cfg.sample_rate, 1);

    let options = ModemOptions {
        noise: small_noise_config(),
        ..ModemOptions::default()
    };
    let received = receive(&cfg, options, &samples);
    assert_eq!(received.len(), 1, "expected exactly one message");
    let msg = &received[0];
    assert!(!msg.error_detected);
    assert_eq!(msg.text().as_deref(), Some("ping 7"));
    assert_eq!(msg.sender_id, 7);
}

#[test]
fn test_janus_pn_sync() {
    init_logging();
    let cfg = fast(DspConfig::janus());
    let msg = Message::from_text("ALL CLEAR").with_preamble(PreambleFields::janus_sms(2, 4, SmsCoding::Ascii6));
    let samples = render(&transmit(&cfg, msg), cfg.sample_rate, 2);

    let options = ModemOptions {
        fixed_noise_floor: Some(NOISE_SIGMA * NOISE_SIGMA),
        ..ModemOptions::default()
    };
    let received = receive(&cfg, options, &samples);
    assert_eq!(received.len(), 1, "expected exactly one message");
    let msg = &received[0];
    assert!(!msg.error_detected);
    assert_eq!(msg.text().as_deref(), Some("ALL CLEAR"));
    assert_eq!(msg.preamble.destination_id, Some(4));
    assert!(msg.viterbi_metric.is_some());
}

#[test]
fn test_pn_sync_on_custom_links() {
    init_logging();
    let links = [
        (Modulation::Fsk, Hopper::Increment),
        (Modulation::Fhbfsk, Hopper::Increment),
        (Modulation::Fhbfsk, Hopper::Prime),
    ];
    for (modulation, hopper) in links {
        let cfg = fast(DspConfig {
            modulation,
            hopper,
            sync_method: SyncMethod::Pn32Janus,
            ..DspConfig::default()
        });
        let msg = Message::from_text("hold depth").with_preamble(PreambleFields::custom(6, true));
        let steps = transmit(&cfg, msg);
        for scale in [1.0f32, 0.2] {
            let quieter: Vec<WaveformStep> = steps
                .iter()
                .map(|step| WaveformStep {
                    relative_amplitude: step.relative_amplitude * scale,
                    ..*step
                })
                .collect();
            let samples = render(&quieter, cfg.sample_rate, 4);
            let options = ModemOptions {
                fixed_noise_floor: Some(NOISE_SIGMA * NOISE_SIGMA),
                ..ModemOptions::default()
            };
            let received = receive(&cfg, options, &samples);
            assert_eq!(received.len(), 1, "{modulation:?}/{hopper:?} at {scale}");
            let msg = &received[0];
            assert!(!msg.error_detected, "{modulation:?}/{hopper:?} at {scale}");
            assert_eq!(msg.text().as_deref(), Some("hold depth"));
            assert_eq!(msg.sender_id, 6);
        }
    }
}

#[test]
fn test_evaluation_pattern_over_the_air() {
    init_logging();
    let cfg = fast(DspConfig::default());
    let pattern = EvalPattern::Mixed;
    let samples = render(&transmit(&cfg, Message::evaluation(pattern)), cfg.sample_rate, 3);

    let options = ModemOptions {
        fixed_noise_floor: Some(NOISE_SIGMA * NOISE_SIGMA),
        evaluation: Some(pattern),
        ..ModemOptions::default()
    };
    let received = receive(&cfg, options, &samples);
    assert_eq!(received.len(), 1);
    let msg = &received[0];
    assert_eq!(msg.data_type, DataType::Eval);
    let info = msg.eval_info.as_ref().expect("evaluation details");
    assert_eq!(info.pattern, pattern.index());
    assert_eq!(info.energy_f0.len(), 100);
    assert!(info.bit_error_rate < 0.05, "BER {}", info.bit_error_rate);
}

#[test]
fn test_silence_produces_nothing() {
    init_logging();
    let cfg = fast(DspConfig::default());
    let samples = render(&[], cfg.sample_rate, 4);
    let options = ModemOptions {
        fixed_noise_floor: Some(NOISE_SIGMA * NOISE_SIGMA),
        ..ModemOptions::default()
    };
    assert!(receive(&cfg, options, &samples).is_empty());
}
