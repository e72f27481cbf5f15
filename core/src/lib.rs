//! Watermark codec and detection engine for sonic barcoding
//!
//! Encodes a campaign's barcode identifier as a near-ultrasonic tone sequence
//! mixed into an audio track, and recovers it from live audio with windowed
//! spectral analysis plus a debounced detection pipeline.

pub mod analyzer;
pub mod campaign;
pub mod detector;
pub mod encoder;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod symbol;

pub use analyzer::{
    merge_windows, AnalyzerConfig, AudioFrame, SpectralAnalyzer, SpectralObservation,
    WindowObservations,
};
pub use campaign::{min_band_separation_hz, BandSnapshot, BarcodeId, CampaignRecord, WatchBand};
pub use detector::{DetectionReport, Detector};
pub use encoder::{EncodeOutput, EncoderConfig, PcmBuffer, WatermarkEncoder};
pub use error::{Result, WatermarkError};
pub use pipeline::{DetectionPipeline, DetectorConfig, ExpiredCandidate, TriggerEvent};
pub use registry::{CampaignLookup, InMemoryRegistry};
pub use symbol::{
    CodecParams, DecodeOutcome, NoMatchReason, SequenceMatch, SlotObservation, Symbol,
    SymbolSequence, ToneSymbolCodec,
};

// Configuration constants (defaults; runtime values live in the config structs)
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

// Spectral analysis
pub const ANALYSIS_WINDOW_SAMPLES: usize = 2048;
pub const ANALYSIS_HOP_SAMPLES: usize = 512;

// Symbol timing
pub const SYMBOL_DURATION_SECS: f32 = 0.060;
pub const SYMBOL_GAP_SECS: f32 = 0.075; // fits at least one full analysis window
pub const SYMBOL_DURATION_TOLERANCE_SECS: f32 = 0.030;

// Code table: a 32-bit barcode id as 8 nibbles plus a CRC-8 check pair
pub const ID_NIBBLES: usize = 8;
pub const CHECK_NIBBLES: usize = 2;
pub const SYMBOLS_PER_SEQUENCE: usize = ID_NIBBLES + CHECK_NIBBLES;
pub const SYMBOL_SLOTS: usize = 16;

// Frequency plan: 16 slots spaced 60 Hz around a campaign's center frequency.
// Slot spacing is ~2.8x the analysis bin resolution at the default window
// (44100 / 2048 ~= 21.5 Hz), which bounds cross-talk between adjacent slots.
pub const SYMBOL_SPACING_HZ: f32 = 60.0;
pub const WATERMARK_BAND_MIN_HZ: f32 = 17_000.0;
pub const WATERMARK_BAND_MAX_HZ: f32 = 21_000.0;
pub const BAND_GUARD_HZ: f32 = 200.0;

// Detection
pub const DEBOUNCE_SECS: f64 = 5.0;

// Robustness contract at the default analyzer settings. A watermark at
// nominal gain must survive additive white Gaussian noise up to this
// standard deviation (in full-scale sample units).
pub const NOISE_TOLERANCE_SIGMA: f32 = 0.05;
// A watermark whose amplitude is at or below this fraction of the noise
// standard deviation must reliably produce no trigger at all, rather than
// a low-confidence guess.
pub const BURIED_WATERMARK_RATIO: f32 = 0.015;
