use crate::campaign::{min_band_separation_hz, BandSnapshot, BarcodeId, CampaignRecord};
use crate::error::{Result, WatermarkError};
use crate::symbol::CodecParams;
use log::info;
use std::collections::BTreeMap;

/// Boundary to the external campaign registry. The engine only ever resolves
/// a decoded barcode; how the records got there is the adapter's business.
pub trait CampaignLookup {
    fn active_campaigns(&self) -> Vec<CampaignRecord>;

    /// `NotFound` on miss.
    fn resolve_barcode(&self, id: BarcodeId) -> Result<CampaignRecord>;
}

/// Registry adapter backed by a plain map. Used by the CLI and tests; a
/// deployment would put its CMS client behind the same trait.
#[derive(Debug, Clone)]
pub struct InMemoryRegistry {
    params: CodecParams,
    campaigns: BTreeMap<BarcodeId, CampaignRecord>,
}

impl InMemoryRegistry {
    pub fn new(params: &CodecParams) -> Self {
        Self {
            params: params.clone(),
            campaigns: BTreeMap::new(),
        }
    }

    /// Register a campaign. Rejects invalid records, duplicate barcode ids
    /// and bands closer than the guard-band minimum to an existing campaign.
    pub fn register(&mut self, record: CampaignRecord) -> Result<()> {
        record.validate(&self.params)?;

        if self.campaigns.contains_key(&record.barcode_id) {
            return Err(WatermarkError::InvalidConfig(format!(
                "barcode {} is already registered",
                record.barcode_id
            )));
        }

        let min_separation = min_band_separation_hz(self.params.symbol_spacing_hz);
        for existing in self.campaigns.values() {
            let separation = (existing.frequency_band_hz - record.frequency_band_hz).abs();
            if separation < min_separation {
                return Err(WatermarkError::InvalidBand(format!(
                    "band {:.0} Hz is {:.0} Hz from {} ({:.0} Hz); minimum separation is {:.0} Hz",
                    record.frequency_band_hz,
                    separation,
                    existing.barcode_id,
                    existing.frequency_band_hz,
                    min_separation
                )));
            }
        }

        info!(
            "registered campaign {} on band {:.0} Hz",
            record.barcode_id, record.frequency_band_hz
        );
        self.campaigns.insert(record.barcode_id, record);
        Ok(())
    }

    /// Remove a campaign, e.g. when it ends. `NotFound` if it was never
    /// registered.
    pub fn deregister(&mut self, id: BarcodeId) -> Result<CampaignRecord> {
        self.campaigns
            .remove(&id)
            .ok_or(WatermarkError::NotFound(id))
    }

    pub fn len(&self) -> usize {
        self.campaigns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }

    /// Versioned band snapshot of everything currently registered, for the
    /// analyzer and pipeline.
    pub fn snapshot(&self, version: u64) -> BandSnapshot {
        let campaigns: Vec<CampaignRecord> = self.campaigns.values().cloned().collect();
        // Records were validated on registration, so this cannot fail
        BandSnapshot::from_campaigns(version, &campaigns, &self.params)
            .unwrap_or_else(|_| BandSnapshot {
                version,
                bands: Vec::new(),
            })
    }
}

impl CampaignLookup for InMemoryRegistry {
    fn active_campaigns(&self) -> Vec<CampaignRecord> {
        self.campaigns.values().cloned().collect()
    }

    fn resolve_barcode(&self, id: BarcodeId) -> Result<CampaignRecord> {
        self.campaigns
            .get(&id)
            .cloned()
            .ok_or(WatermarkError::NotFound(id))
    }
}
