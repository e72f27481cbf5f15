use crate::campaign::CampaignRecord;
use crate::error::{Result, WatermarkError};
use crate::symbol::ToneSymbolCodec;
use log::{debug, warn};

/// Interleaved PCM in normalized float samples.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl PcmBuffer {
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            channels,
            samples,
        }
    }

    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self::new(sample_rate, 1, samples)
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Embedding levels. The ratio and floor are design constants to be tuned
/// against real program material.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Watermark amplitude as a fraction of the local source peak.
    pub watermark_to_peak_ratio: f32,
    /// Floor so the watermark stays decodable over quiet passages.
    pub min_watermark_amplitude: f32,
    /// How far around the embedding region the local peak is measured.
    pub peak_window_secs: f32,
    /// Mixed samples must stay below this magnitude.
    pub clip_ceiling: f32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            watermark_to_peak_ratio: 0.25,
            min_watermark_amplitude: 0.05,
            peak_window_secs: 0.25,
            clip_ceiling: 0.999,
        }
    }
}

/// Result of an embedding pass.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeOutput {
    pub samples: Vec<f32>,
    /// Amplitude the tone sequence was mixed at.
    pub watermark_gain: f32,
    /// True when the gain was reduced below its nominal level to avoid
    /// clipping. The source is never touched.
    pub attenuated: bool,
}

/// Mixes a campaign's tone sequence into source audio at its trigger
/// timestamp, into every channel. Stateless; owns no buffers beyond a
/// single call.
pub struct WatermarkEncoder {
    codec: ToneSymbolCodec,
    config: EncoderConfig,
}

impl WatermarkEncoder {
    pub fn new(codec: ToneSymbolCodec, config: EncoderConfig) -> Self {
        Self { codec, config }
    }

    /// Embed `campaign`'s watermark into `source`. Deterministic: the same
    /// inputs produce byte-identical output.
    pub fn encode(&self, source: &PcmBuffer, campaign: &CampaignRecord) -> Result<EncodeOutput> {
        let params = self.codec.params();
        if source.sample_rate != params.sample_rate {
            return Err(WatermarkError::InvalidConfig(format!(
                "source sample rate {} does not match the codec's {}",
                source.sample_rate, params.sample_rate
            )));
        }
        let channels = source.channels as usize;
        if channels == 0 || source.samples.len() % channels != 0 {
            return Err(WatermarkError::InvalidInputSize);
        }
        campaign.validate(params)?;

        let sequence = self
            .codec
            .encode(campaign.barcode_id, campaign.frequency_band_hz)?;
        let tone = self.codec.render(&sequence);
        let start_frame =
            (campaign.trigger_timestamp * source.sample_rate as f64).round() as usize;
        // Inclusive boundary: a sequence ending exactly at the last frame fits.
        if start_frame + tone.len() > source.frames() {
            return Err(WatermarkError::OutOfRangeTrigger);
        }

        let gain = self.gain_for(source, start_frame, tone.len());
        let (gain, attenuated) = self.fit_headroom(source, start_frame, &tone, gain, campaign);

        let mut samples = source.samples.clone();
        for (offset, &t) in tone.iter().enumerate() {
            let base = (start_frame + offset) * channels;
            for sample in samples[base..base + channels].iter_mut() {
                *sample += gain * t;
            }
        }
        debug!(
            "embedded {} at {:.3}s on {:.0} Hz, gain {:.4}{}",
            campaign.barcode_id,
            campaign.trigger_timestamp,
            campaign.frequency_band_hz,
            gain,
            if attenuated { " (attenuated)" } else { "" }
        );

        Ok(EncodeOutput {
            samples,
            watermark_gain: gain,
            attenuated,
        })
    }

    /// Nominal gain: a fraction of the local source peak around the embedding
    /// region (any channel), never below the decodability floor.
    fn gain_for(&self, source: &PcmBuffer, start_frame: usize, frames: usize) -> f32 {
        let channels = source.channels as usize;
        let pad = (self.config.peak_window_secs * source.sample_rate as f32).round() as usize;
        let lo = start_frame.saturating_sub(pad) * channels;
        let hi = ((start_frame + frames + pad) * channels).min(source.samples.len());
        let peak = source.samples[lo..hi]
            .iter()
            .fold(0.0f32, |acc, &s| acc.max(s.abs()));
        (peak * self.config.watermark_to_peak_ratio).max(self.config.min_watermark_amplitude)
    }

    /// Reduce the gain when the mix would clip. Only the watermark gives way;
    /// a source already at the ceiling gets a silent watermark.
    fn fit_headroom(
        &self,
        source: &PcmBuffer,
        start_frame: usize,
        tone: &[f32],
        gain: f32,
        campaign: &CampaignRecord,
    ) -> (f32, bool) {
        let channels = source.channels as usize;
        let lo = start_frame * channels;
        let hi = (start_frame + tone.len()) * channels;
        let source_peak = source.samples[lo..hi]
            .iter()
            .fold(0.0f32, |acc, &s| acc.max(s.abs()));
        let headroom = self.config.clip_ceiling - source_peak;
        if gain <= headroom {
            return (gain, false);
        }
        let fitted = headroom.max(0.0);
        warn!(
            "clipping risk embedding {}: watermark attenuated {:.4} -> {:.4}",
            campaign.barcode_id, gain, fitted
        );
        (fitted, true)
    }
}
