use crate::campaign::{BandSnapshot, BarcodeId};
use crate::error::{Result, WatermarkError};
use crate::{ANALYSIS_HOP_SAMPLES, ANALYSIS_WINDOW_SAMPLES};
use std::f32::consts::PI;

/// Spectral analysis configuration. Window and hop are chosen so the
/// shortest symbol spans several hops; thresholds are tuning constants.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub window_len: usize,
    pub hop_len: usize,
    /// EMA coefficient for the rolling noise floor on quiet windows.
    pub noise_floor_alpha: f32,
    /// Slow EMA coefficient applied when a window looks like signal, so the
    /// floor still converges in sustained noise without absorbing a short
    /// watermark into the baseline.
    pub noise_floor_slow_alpha: f32,
    /// Magnitudes above `gate * floor` are treated as signal, not noise.
    pub noise_gate_factor: f32,
    pub initial_noise_floor: f32,
    pub min_noise_floor: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            window_len: ANALYSIS_WINDOW_SAMPLES,
            hop_len: ANALYSIS_HOP_SAMPLES,
            noise_floor_alpha: 0.1,
            noise_floor_slow_alpha: 0.002,
            noise_gate_factor: 3.0,
            initial_noise_floor: 0.002,
            min_noise_floor: 1e-5,
        }
    }
}

/// Fixed-size, timestamped block of mono samples; the unit of exchange
/// between the media source and the analyzer.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Absolute index of the first sample in the stream.
    pub start_sample: u64,
    pub samples: Vec<f32>,
}

/// Magnitude of one watched frequency over one analysis window, together
/// with the rolling noise floor in effect for that frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralObservation {
    pub window_start_secs: f64,
    pub frequency_hz: f32,
    /// Normalized so a full-window tone of amplitude A reads roughly A.
    pub magnitude: f32,
    pub noise_floor: f32,
}

/// All observations for one analysis window. Windows are strictly ordered
/// by `index`; the pipeline rejects any other ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowObservations {
    pub index: u64,
    pub start_secs: f64,
    pub observations: Vec<SpectralObservation>,
}

/// Merge the same-index windows of two channels by taking the stronger
/// magnitude per frequency (watermark presence in any channel suffices).
pub fn merge_windows(a: &WindowObservations, b: &WindowObservations) -> Result<WindowObservations> {
    if a.index != b.index || a.observations.len() != b.observations.len() {
        return Err(WatermarkError::InvalidInputSize);
    }

    let observations = a
        .observations
        .iter()
        .zip(b.observations.iter())
        .map(|(oa, ob)| {
            if oa.magnitude >= ob.magnitude {
                oa.clone()
            } else {
                ob.clone()
            }
        })
        .collect();

    Ok(WindowObservations {
        index: a.index,
        start_secs: a.start_secs,
        observations,
    })
}

struct BandFloors {
    barcode_id: BarcodeId,
    floors: Vec<f32>,
}

/// Windowed Goertzel analysis over the slot frequencies of the registered
/// bands only, so compute scales with active campaigns rather than spectrum
/// resolution. Emits one `WindowObservations` per elapsed hop.
pub struct SpectralAnalyzer {
    config: AnalyzerConfig,
    sample_rate: u32,
    snapshot: BandSnapshot,
    floors: Vec<BandFloors>,
    window_fn: Vec<f32>,
    buffer: Vec<f32>,
    /// Absolute stream index of `buffer[0]`.
    buffer_start: u64,
    /// Total samples accepted since the last reset, for frame ordering.
    accepted: u64,
    next_index: u64,
}

impl SpectralAnalyzer {
    pub fn new(sample_rate: u32, snapshot: BandSnapshot, config: AnalyzerConfig) -> Self {
        let window_fn = hann_window(config.window_len);
        let floors = build_floors(&snapshot, config.initial_noise_floor, &[]);
        Self {
            config,
            sample_rate,
            snapshot,
            floors,
            window_fn,
            buffer: Vec::new(),
            buffer_start: 0,
            accepted: 0,
            next_index: 0,
        }
    }

    pub fn snapshot(&self) -> &BandSnapshot {
        &self.snapshot
    }

    pub fn hop_len(&self) -> usize {
        self.config.hop_len
    }

    /// Swap in a new registered-band snapshot. Takes effect for the next
    /// window; noise floor estimates survive for bands that persist.
    pub fn set_snapshot(&mut self, snapshot: BandSnapshot) {
        self.floors = build_floors(&snapshot, self.config.initial_noise_floor, &self.floors);
        self.snapshot = snapshot;
    }

    /// Restart for a new stream: buffered samples and timing are released,
    /// noise floor estimates are kept.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.buffer_start = 0;
        self.accepted = 0;
        self.next_index = 0;
    }

    /// Push a timestamped frame. Frames must arrive contiguous and in order.
    pub fn push_frame(&mut self, frame: &AudioFrame) -> Result<Vec<WindowObservations>> {
        if frame.start_sample != self.accepted {
            return Err(WatermarkError::SequenceError {
                expected: self.accepted,
                got: frame.start_sample,
            });
        }
        Ok(self.push_samples(&frame.samples))
    }

    /// Push raw samples, returning every window completed by them.
    pub fn push_samples(&mut self, samples: &[f32]) -> Vec<WindowObservations> {
        self.ingest(samples);
        let mut windows = Vec::new();
        while let Some(window) = self.try_emit() {
            windows.push(window);
        }
        windows
    }

    /// Lazy per-stream analysis of a full sample buffer.
    pub fn analyze<'a>(&'a mut self, samples: &'a [f32]) -> AnalyzeIter<'a> {
        AnalyzeIter {
            analyzer: self,
            samples,
            pos: 0,
        }
    }

    fn ingest(&mut self, samples: &[f32]) {
        self.buffer.extend_from_slice(samples);
        self.accepted += samples.len() as u64;
    }

    fn try_emit(&mut self) -> Option<WindowObservations> {
        if self.buffer.len() < self.config.window_len {
            return None;
        }

        let start_secs = self.buffer_start as f64 / self.sample_rate as f64;
        let observations = self.observe_window(start_secs);
        let window = WindowObservations {
            index: self.next_index,
            start_secs,
            observations,
        };

        self.buffer.drain(..self.config.hop_len);
        self.buffer_start += self.config.hop_len as u64;
        self.next_index += 1;
        Some(window)
    }

    fn observe_window(&mut self, start_secs: f64) -> Vec<SpectralObservation> {
        let n = self.config.window_len;
        let windowed: Vec<f32> = self.buffer[..n]
            .iter()
            .zip(self.window_fn.iter())
            .map(|(s, w)| s * w)
            .collect();

        let mut observations = Vec::new();
        for (band, floors) in self.snapshot.bands.iter().zip(self.floors.iter_mut()) {
            for (slot, &frequency_hz) in band.slot_frequencies.iter().enumerate() {
                let power = goertzel_power(&windowed, frequency_hz, self.sample_rate as f32);
                // Normalize so a unit-amplitude exact-bin tone reads ~1.0
                // (Hann coherent gain is N/4 on the half-amplitude line).
                let magnitude = power.sqrt() * 4.0 / n as f32;

                let floor = floors.floors[slot];
                observations.push(SpectralObservation {
                    window_start_secs: start_secs,
                    frequency_hz,
                    magnitude,
                    noise_floor: floor,
                });

                // Quiet windows update the floor quickly; loud ones are
                // assumed to be signal and only nudge it.
                let alpha = if magnitude < self.config.noise_gate_factor * floor {
                    self.config.noise_floor_alpha
                } else {
                    self.config.noise_floor_slow_alpha
                };
                let updated = floor + alpha * (magnitude - floor);
                floors.floors[slot] = updated.max(self.config.min_noise_floor);
            }
        }
        observations
    }
}

/// Lazy window iterator over a borrowed sample buffer.
pub struct AnalyzeIter<'a> {
    analyzer: &'a mut SpectralAnalyzer,
    samples: &'a [f32],
    pos: usize,
}

impl Iterator for AnalyzeIter<'_> {
    type Item = WindowObservations;

    fn next(&mut self) -> Option<WindowObservations> {
        loop {
            if let Some(window) = self.analyzer.try_emit() {
                return Some(window);
            }
            if self.pos >= self.samples.len() {
                return None;
            }
            let end = (self.pos + self.analyzer.config.hop_len).min(self.samples.len());
            self.analyzer.ingest(&self.samples[self.pos..end]);
            self.pos = end;
        }
    }
}

fn build_floors(
    snapshot: &BandSnapshot,
    initial: f32,
    previous: &[BandFloors],
) -> Vec<BandFloors> {
    snapshot
        .bands
        .iter()
        .map(|band| {
            let floors = previous
                .iter()
                .find(|f| f.barcode_id == band.barcode_id)
                .map(|f| f.floors.clone())
                .unwrap_or_else(|| vec![initial; band.slot_frequencies.len()]);
            BandFloors {
                barcode_id: band.barcode_id,
                floors,
            }
        })
        .collect()
}

fn hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let phase = 2.0 * PI * i as f32 / len as f32;
            0.5 * (1.0 - phase.cos())
        })
        .collect()
}

/// Goertzel power at the DFT bin nearest `frequency_hz`.
fn goertzel_power(samples: &[f32], frequency_hz: f32, sample_rate: f32) -> f32 {
    let n = samples.len();
    let k = (0.5 + (n as f32 * frequency_hz / sample_rate)) as usize;
    let omega = 2.0 * PI * k as f32 / n as f32;
    let coeff = 2.0 * omega.cos();

    let mut q1 = 0.0f32;
    let mut q2 = 0.0f32;
    for &sample in samples {
        let q0 = coeff * q1 - q2 + sample;
        q2 = q1;
        q1 = q0;
    }

    let real = q1 - q2 * omega.cos();
    let imag = q2 * omega.sin();
    real * real + imag * imag
}
