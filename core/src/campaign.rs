use crate::error::{Result, WatermarkError};
use crate::symbol::{band_edges, band_width_hz, slot_frequency, CodecParams};
use crate::{BAND_GUARD_HZ, SYMBOL_SLOTS, WATERMARK_BAND_MAX_HZ, WATERMARK_BAND_MIN_HZ};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable 32-bit campaign identifier carried by the watermark.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BarcodeId(pub u32);

impl fmt::Display for BarcodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

/// Campaign record exchanged with the external registry/CMS. Field names on
/// the wire follow the CMS contract (`barcodeId`, `timestamp`, `frequency`,
/// `url`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRecord {
    #[serde(rename = "barcodeId")]
    pub barcode_id: BarcodeId,
    pub title: String,
    pub brand: String,
    /// Seconds from the start of the source media.
    #[serde(rename = "timestamp")]
    pub trigger_timestamp: f64,
    /// Center frequency of the campaign's watermark band in Hz.
    #[serde(rename = "frequency")]
    pub frequency_band_hz: f32,
    #[serde(rename = "url")]
    pub redirect_url: String,
}

impl CampaignRecord {
    /// Check the record against the allowed watermark range and the codec's
    /// sample rate. The registry additionally enforces barcode/band
    /// uniqueness; this only validates the record in isolation.
    pub fn validate(&self, params: &CodecParams) -> Result<()> {
        if self.trigger_timestamp < 0.0 || !self.trigger_timestamp.is_finite() {
            return Err(WatermarkError::InvalidConfig(format!(
                "trigger timestamp {} must be finite and non-negative",
                self.trigger_timestamp
            )));
        }

        let (low, high) = band_edges(self.frequency_band_hz, params.symbol_spacing_hz);
        if low < WATERMARK_BAND_MIN_HZ || high > WATERMARK_BAND_MAX_HZ {
            return Err(WatermarkError::InvalidBand(format!(
                "band {:.0} Hz spans {:.0}-{:.0} Hz outside the allowed {:.0}-{:.0} Hz",
                self.frequency_band_hz, low, high, WATERMARK_BAND_MIN_HZ, WATERMARK_BAND_MAX_HZ
            )));
        }
        let nyquist = params.sample_rate as f32 / 2.0;
        if high >= nyquist {
            return Err(WatermarkError::InvalidBand(format!(
                "band edge {:.0} Hz is not representable at {} Hz",
                high, params.sample_rate
            )));
        }

        if !(self.redirect_url.starts_with("http://") || self.redirect_url.starts_with("https://"))
        {
            return Err(WatermarkError::InvalidConfig(format!(
                "redirect url {:?} is not an http(s) URI",
                self.redirect_url
            )));
        }

        Ok(())
    }
}

/// Minimum center-to-center separation between two campaign bands: one full
/// slot layout plus a guard band, so adjacent campaigns never share slots.
pub fn min_band_separation_hz(spacing_hz: f32) -> f32 {
    band_width_hz(spacing_hz) + BAND_GUARD_HZ
}

/// One campaign band the analyzer and pipeline watch.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchBand {
    pub barcode_id: BarcodeId,
    pub center_hz: f32,
    /// The 16 slot frequencies, indexed by nibble value.
    pub slot_frequencies: Vec<f32>,
}

impl WatchBand {
    pub fn new(barcode_id: BarcodeId, center_hz: f32, spacing_hz: f32) -> Self {
        let slot_frequencies = (0..SYMBOL_SLOTS)
            .map(|slot| slot_frequency(center_hz, slot as u8, spacing_hz))
            .collect();
        Self {
            barcode_id,
            center_hz,
            slot_frequencies,
        }
    }
}

/// Versioned, immutable snapshot of the currently registered bands. Swapped
/// into the analyzer and pipeline between window-processing steps; there is
/// no ambient mutable registry inside the engine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BandSnapshot {
    pub version: u64,
    pub bands: Vec<WatchBand>,
}

impl BandSnapshot {
    pub fn from_campaigns(
        version: u64,
        campaigns: &[CampaignRecord],
        params: &CodecParams,
    ) -> Result<Self> {
        let mut bands = Vec::with_capacity(campaigns.len());
        for campaign in campaigns {
            campaign.validate(params)?;
            bands.push(WatchBand::new(
                campaign.barcode_id,
                campaign.frequency_band_hz,
                params.symbol_spacing_hz,
            ));
        }
        Ok(Self { version, bands })
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }
}
