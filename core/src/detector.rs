use crate::analyzer::{merge_windows, AnalyzerConfig, SpectralAnalyzer, WindowObservations};
use crate::campaign::BandSnapshot;
use crate::error::{Result, WatermarkError};
use crate::pipeline::{DetectionPipeline, DetectorConfig, ExpiredCandidate, TriggerEvent};
use crate::registry::CampaignLookup;
use crate::symbol::{CodecParams, ToneSymbolCodec};
use log::info;

/// Everything one detection pass produced.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionReport {
    pub events: Vec<TriggerEvent>,
    /// Candidates still collecting when the input ended.
    pub expired: Vec<ExpiredCandidate>,
    pub windows_processed: u64,
}

/// Batch façade wiring the spectral analyzer and the detection pipeline over
/// a finite sample buffer. Streaming callers drive the two pieces directly.
pub struct Detector<L: CampaignLookup + Clone> {
    params: CodecParams,
    analyzer_config: AnalyzerConfig,
    detector_config: DetectorConfig,
    snapshot: BandSnapshot,
    lookup: L,
}

impl<L: CampaignLookup + Clone> Detector<L> {
    pub fn new(
        params: CodecParams,
        snapshot: BandSnapshot,
        lookup: L,
        detector_config: DetectorConfig,
    ) -> Self {
        let analyzer_config = AnalyzerConfig::default();
        // The decoder's run timing is phrased in analysis hops
        let params = CodecParams {
            observation_hop_secs: analyzer_config.hop_len as f64 / params.sample_rate as f64,
            ..params
        };
        Self {
            params,
            analyzer_config,
            detector_config,
            snapshot,
            lookup,
        }
    }

    /// Scan a mono buffer for registered watermarks.
    pub fn detect(&self, samples: &[f32]) -> Result<DetectionReport> {
        let mut analyzer = self.analyzer();
        let mut pipeline = self.pipeline();

        let mut events = Vec::new();
        let mut windows_processed = 0u64;
        for window in analyzer.analyze(samples) {
            events.extend(pipeline.process_window(&window)?);
            windows_processed += 1;
        }
        let expired = pipeline.flush();
        info!(
            "detection pass: {} windows, {} triggers, {} expired candidates",
            windows_processed,
            events.len(),
            expired.len()
        );
        Ok(DetectionReport {
            events,
            expired,
            windows_processed,
        })
    }

    /// Scan interleaved multi-channel audio. Channels are analyzed
    /// independently and merged per window, keeping the stronger magnitude
    /// per frequency, so a watermark present in any channel is found.
    pub fn detect_interleaved(&self, samples: &[f32], channels: usize) -> Result<DetectionReport> {
        if channels == 0 || samples.len() % channels != 0 {
            return Err(WatermarkError::InvalidInputSize);
        }
        if channels == 1 {
            return self.detect(samples);
        }

        let frames = samples.len() / channels;
        let mut analyzers: Vec<SpectralAnalyzer> =
            (0..channels).map(|_| self.analyzer()).collect();
        let mut pipeline = self.pipeline();

        // Deinterleave once; per-channel analyzers stay sample-aligned
        let mut planes: Vec<Vec<f32>> = vec![Vec::with_capacity(frames); channels];
        for frame in samples.chunks_exact(channels) {
            for (plane, &sample) in planes.iter_mut().zip(frame) {
                plane.push(sample);
            }
        }

        let mut events = Vec::new();
        let mut windows_processed = 0u64;
        let per_channel: Vec<Vec<WindowObservations>> = analyzers
            .iter_mut()
            .zip(&planes)
            .map(|(analyzer, plane)| analyzer.push_samples(plane))
            .collect();

        let window_count = per_channel[0].len();
        for windows in &per_channel {
            if windows.len() != window_count {
                return Err(WatermarkError::InvalidInputSize);
            }
        }
        for index in 0..window_count {
            let mut merged = per_channel[0][index].clone();
            for windows in per_channel.iter().skip(1) {
                merged = merge_windows(&merged, &windows[index])?;
            }
            events.extend(pipeline.process_window(&merged)?);
            windows_processed += 1;
        }

        let expired = pipeline.flush();
        info!(
            "detection pass ({} ch): {} windows, {} triggers, {} expired candidates",
            channels,
            windows_processed,
            events.len(),
            expired.len()
        );
        Ok(DetectionReport {
            events,
            expired,
            windows_processed,
        })
    }

    fn analyzer(&self) -> SpectralAnalyzer {
        SpectralAnalyzer::new(
            self.params.sample_rate,
            self.snapshot.clone(),
            self.analyzer_config.clone(),
        )
    }

    fn pipeline(&self) -> DetectionPipeline<L> {
        DetectionPipeline::new(
            ToneSymbolCodec::new(self.params.clone()),
            self.snapshot.clone(),
            self.lookup.clone(),
            self.detector_config.clone(),
        )
    }
}
