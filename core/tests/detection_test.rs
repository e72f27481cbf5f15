//! End-to-end encode -> analyze -> detect passes over synthetic program
//! material, covering trigger timing, debounce, noise robustness and
//! multi-channel input.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use sonicmark_core::{
    BarcodeId, CampaignRecord, CodecParams, Detector, DetectorConfig, EncoderConfig,
    InMemoryRegistry, PcmBuffer, WatermarkEncoder, WatermarkError, BURIED_WATERMARK_RATIO,
    NOISE_TOLERANCE_SIGMA,
};
use std::f32::consts::PI;

const SAMPLE_RATE: u32 = 44_100;

fn campaign(id: u32, center_hz: f32, trigger: f64) -> CampaignRecord {
    CampaignRecord {
        barcode_id: BarcodeId(id),
        title: "Spot".into(),
        brand: "Acme".into(),
        trigger_timestamp: trigger,
        frequency_band_hz: center_hz,
        redirect_url: format!("https://example.com/{id}"),
    }
}

fn sine(duration_secs: f32, frequency_hz: f32, amplitude: f32) -> PcmBuffer {
    let len = (duration_secs * SAMPLE_RATE as f32) as usize;
    let samples = (0..len)
        .map(|n| amplitude * (2.0 * PI * frequency_hz * n as f32 / SAMPLE_RATE as f32).sin())
        .collect();
    PcmBuffer::mono(SAMPLE_RATE, samples)
}

fn add_noise(samples: &mut [f32], sigma: f32, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0f32, sigma).expect("valid sigma");
    for sample in samples.iter_mut() {
        *sample += normal.sample(&mut rng);
    }
}

fn detector_for(campaigns: &[CampaignRecord]) -> Detector<InMemoryRegistry> {
    let _ = env_logger::builder().is_test(true).try_init();
    let params = CodecParams::default();
    let mut registry = InMemoryRegistry::new(&params);
    for record in campaigns {
        registry.register(record.clone()).expect("valid campaign");
    }
    let snapshot = registry.snapshot(1);
    Detector::new(params, snapshot, registry, DetectorConfig::default())
}

fn encode(source: &PcmBuffer, record: &CampaignRecord) -> Vec<f32> {
    let encoder = WatermarkEncoder::new(
        sonicmark_core::ToneSymbolCodec::new(CodecParams::default()),
        EncoderConfig::default(),
    );
    encoder.encode(source, record).expect("encode").samples
}

#[test]
fn test_detects_watermark_at_trigger_time() {
    // 30s of program material, watermark triggered at 12.0s
    let record = campaign(0xDEAD_BEEF, 18_000.0, 12.0);
    let source = sine(30.0, 440.0, 0.3);
    let samples = encode(&source, &record);

    let report = detector_for(&[record.clone()])
        .detect(&samples)
        .expect("ordered stream");
    assert_eq!(report.events.len(), 1, "expired: {:?}", report.expired);

    let event = &report.events[0];
    assert_eq!(event.barcode_id, BarcodeId(0xDEAD_BEEF));
    assert_eq!(event.redirect_url, record.redirect_url);
    assert!(
        (event.detected_at_secs - 12.0).abs() < 0.050,
        "detected at {:.4}s, expected within 50ms of 12.0s",
        event.detected_at_secs
    );
    assert!(event.confidence > 0.5, "confidence {}", event.confidence);
}

#[test]
fn test_clean_program_material_never_triggers() {
    let record = campaign(0xDEAD_BEEF, 18_000.0, 12.0);
    let source = sine(30.0, 440.0, 0.3);

    let report = detector_for(&[record])
        .detect(&source.samples)
        .expect("ordered stream");
    assert!(report.events.is_empty());
}

#[test]
fn test_replay_inside_debounce_interval_is_suppressed() {
    // Same watermark twice, 3s apart: inside the 5s debounce interval
    let first = campaign(0xDEAD_BEEF, 18_000.0, 2.0);
    let second = campaign(0xDEAD_BEEF, 18_000.0, 5.0);
    let source = sine(12.0, 440.0, 0.3);
    let samples = encode(&PcmBuffer::mono(SAMPLE_RATE, encode(&source, &first)), &second);

    let report = detector_for(&[first])
        .detect(&samples)
        .expect("ordered stream");
    assert_eq!(report.events.len(), 1);
    assert!((report.events[0].detected_at_secs - 2.0).abs() < 0.050);
}

#[test]
fn test_replay_beyond_debounce_interval_triggers_again() {
    // 9s apart: two distinct playback occurrences
    let first = campaign(0xDEAD_BEEF, 18_000.0, 2.0);
    let second = campaign(0xDEAD_BEEF, 18_000.0, 11.0);
    let source = sine(15.0, 440.0, 0.3);
    let samples = encode(&PcmBuffer::mono(SAMPLE_RATE, encode(&source, &first)), &second);

    let report = detector_for(&[first])
        .detect(&samples)
        .expect("ordered stream");
    assert_eq!(report.events.len(), 2);
    assert!((report.events[0].detected_at_secs - 2.0).abs() < 0.050);
    assert!((report.events[1].detected_at_secs - 11.0).abs() < 0.050);
}

#[test]
fn test_detection_survives_gaussian_noise() {
    let record = campaign(0xDEAD_BEEF, 18_000.0, 5.0);
    let source = sine(12.0, 440.0, 0.8); // loud program -> healthy watermark gain
    let mut samples = encode(&source, &record);
    add_noise(&mut samples, NOISE_TOLERANCE_SIGMA, 0xC0FFEE);

    let report = detector_for(&[record])
        .detect(&samples)
        .expect("ordered stream");
    assert_eq!(report.events.len(), 1, "expired: {:?}", report.expired);
    assert!((report.events[0].detected_at_secs - 5.0).abs() < 0.050);
}

#[test]
fn test_buried_watermark_does_not_trigger() {
    // Watermark far below the noise: reliably no event rather than a
    // low-confidence guess
    let record = campaign(0xDEAD_BEEF, 18_000.0, 5.0);
    let codec = sonicmark_core::ToneSymbolCodec::new(CodecParams::default());
    let sequence = codec.encode(record.barcode_id, record.frequency_band_hz).unwrap();
    let tone = codec.render(&sequence);

    let noise_sigma = 0.2;
    let gain = BURIED_WATERMARK_RATIO * noise_sigma;
    let mut samples = vec![0.0f32; (12.0 * SAMPLE_RATE as f64) as usize];
    let start = (5.0 * SAMPLE_RATE as f64) as usize;
    for (offset, &t) in tone.iter().enumerate() {
        samples[start + offset] += gain * t;
    }
    add_noise(&mut samples, noise_sigma, 0xBAD_5EED);

    let report = detector_for(&[record])
        .detect(&samples)
        .expect("ordered stream");
    assert!(report.events.is_empty(), "events: {:?}", report.events);
}

#[test]
fn test_two_campaigns_on_separate_bands() {
    let a = campaign(0x1111_2222, 17_800.0, 3.0);
    let b = campaign(0x3333_4444, 19_400.0, 8.0);
    let source = sine(15.0, 440.0, 0.3);
    let samples = encode(&PcmBuffer::mono(SAMPLE_RATE, encode(&source, &a)), &b);

    let mut report = detector_for(&[a.clone(), b.clone()])
        .detect(&samples)
        .expect("ordered stream");
    report
        .events
        .sort_by(|x, y| x.detected_at_secs.total_cmp(&y.detected_at_secs));
    assert_eq!(report.events.len(), 2);
    assert_eq!(report.events[0].barcode_id, a.barcode_id);
    assert_eq!(report.events[1].barcode_id, b.barcode_id);
}

#[test]
fn test_stereo_watermark_in_one_channel_is_found() {
    let record = campaign(0xDEAD_BEEF, 18_000.0, 4.0);
    let left = sine(10.0, 440.0, 0.3);
    let right = encode(&sine(10.0, 330.0, 0.3), &record);

    let mut interleaved = Vec::with_capacity(left.samples.len() * 2);
    for (l, r) in left.samples.iter().zip(&right) {
        interleaved.push(*l);
        interleaved.push(*r);
    }

    let report = detector_for(&[record])
        .detect_interleaved(&interleaved, 2)
        .expect("ordered stream");
    assert_eq!(report.events.len(), 1, "expired: {:?}", report.expired);
    assert!((report.events[0].detected_at_secs - 4.0).abs() < 0.050);
}

#[test]
fn test_trigger_beyond_track_end_is_rejected() {
    let params = CodecParams::default();
    let codec = sonicmark_core::ToneSymbolCodec::new(params.clone());
    let record = campaign(0xDEAD_BEEF, 18_000.0, 0.0);
    let sequence = codec.encode(record.barcode_id, record.frequency_band_hz).unwrap();

    let source = sine(10.0, 440.0, 0.3);
    let too_late = campaign(
        0xDEAD_BEEF,
        18_000.0,
        source.duration_secs() - sequence.duration_secs() + 0.001,
    );
    let encoder = WatermarkEncoder::new(codec, EncoderConfig::default());
    match encoder.encode(&source, &too_late) {
        Err(WatermarkError::OutOfRangeTrigger) => {}
        other => panic!("expected OutOfRangeTrigger, got {:?}", other),
    }
}
