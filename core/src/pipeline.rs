use crate::analyzer::WindowObservations;
use crate::campaign::{BandSnapshot, BarcodeId, WatchBand};
use crate::error::{Result, WatermarkError};
use crate::registry::CampaignLookup;
use crate::symbol::{DecodeOutcome, SlotObservation, ToneSymbolCodec};
use crate::{DEBOUNCE_SECS, SYMBOLS_PER_SEQUENCE};
use log::{debug, warn};
use serde::Serialize;
use std::collections::HashMap;

/// Detection tuning. Thresholds are design constants to be tuned against the
/// deployment environment, not fixed by the codec.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// A slot qualifies when its magnitude exceeds this factor times the
    /// rolling noise floor.
    pub threshold_factor: f32,
    /// Absolute magnitude floor, so silence never qualifies.
    pub min_magnitude: f32,
    /// Repeat detections of the same barcode within this interval are
    /// suppressed. Covers looped watermarks and re-sampled playback. An
    /// accepted trade-off: a genuinely distinct trigger of the same barcode
    /// inside the interval is swallowed by the active debounce window.
    pub debounce_secs: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold_factor: 2.5,
            min_magnitude: 0.01,
            debounce_secs: DEBOUNCE_SECS,
        }
    }
}

/// Terminal output of the engine: one per physical playback occurrence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerEvent {
    #[serde(rename = "barcodeId")]
    pub barcode_id: BarcodeId,
    /// Estimated start of the watermark in stream time.
    #[serde(rename = "detectedAt")]
    pub detected_at_secs: f64,
    pub confidence: f32,
    /// Redirect target of the resolved campaign, for the trigger sink.
    #[serde(rename = "url")]
    pub redirect_url: String,
}

/// A candidate that ended without completing its sequence. Reported on
/// flush so cancellation never silently drops in-flight state.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiredCandidate {
    pub band_center_hz: f32,
    pub first_seen_secs: f64,
    pub observations: usize,
}

struct Candidate {
    band: WatchBand,
    first_seen_secs: f64,
    last_obs_secs: f64,
    observations: Vec<SlotObservation>,
    /// Slot of the currently open run, None right after a run closed.
    current_slot: Option<u8>,
    completed_runs: usize,
}

impl Candidate {
    fn new(band: &WatchBand, obs: SlotObservation) -> Self {
        Self {
            band: band.clone(),
            first_seen_secs: obs.window_start_secs,
            last_obs_secs: obs.window_start_secs,
            current_slot: Some(obs.slot),
            observations: vec![obs],
            completed_runs: 0,
        }
    }
}

/// Streaming consumer of analyzer windows. Maintains one detection candidate
/// per watched band, decodes completed symbol sequences, debounces repeats,
/// and resolves matches through the campaign lookup.
pub struct DetectionPipeline<L: CampaignLookup> {
    codec: ToneSymbolCodec,
    lookup: L,
    snapshot: BandSnapshot,
    config: DetectorConfig,
    candidates: HashMap<BarcodeId, Candidate>,
    last_index: Option<u64>,
    last_trigger: HashMap<BarcodeId, f64>,
}

impl<L: CampaignLookup> DetectionPipeline<L> {
    pub fn new(
        codec: ToneSymbolCodec,
        snapshot: BandSnapshot,
        lookup: L,
        config: DetectorConfig,
    ) -> Self {
        Self {
            codec,
            lookup,
            snapshot,
            config,
            candidates: HashMap::new(),
            last_index: None,
            last_trigger: HashMap::new(),
        }
    }

    /// Swap in a new band snapshot. Callers hold `&mut self`, so the swap is
    /// always between window-processing steps; candidates collecting against
    /// a removed band run to natural expiry rather than being cancelled.
    pub fn apply_snapshot(&mut self, snapshot: BandSnapshot) {
        debug!(
            "band snapshot v{} -> v{} ({} bands)",
            self.snapshot.version,
            snapshot.version,
            snapshot.bands.len()
        );
        self.snapshot = snapshot;
    }

    /// Advance the candidate table by one strictly-ordered analysis window.
    ///
    /// An out-of-order or duplicate window is a stream-integrity fault: the
    /// whole candidate table is reset and the error surfaced to the caller.
    pub fn process_window(&mut self, window: &WindowObservations) -> Result<Vec<TriggerEvent>> {
        if let Some(last) = self.last_index {
            if window.index != last + 1 {
                self.candidates.clear();
                self.last_index = None;
                return Err(WatermarkError::SequenceError {
                    expected: last + 1,
                    got: window.index,
                });
            }
        }
        self.last_index = Some(window.index);

        let now = window.start_secs;
        let mut events = Vec::new();

        let bands: Vec<WatchBand> = self.snapshot.bands.clone();
        for band in &bands {
            match self.best_slot(band, window) {
                Some(obs) => self.advance_with_observation(band, obs, &mut events),
                None => self.advance_quiet(band.barcode_id, now, &mut events),
            }
        }

        // Candidates whose band left the snapshot only ever age out
        let orphans: Vec<BarcodeId> = self
            .candidates
            .keys()
            .filter(|id| !bands.iter().any(|b| b.barcode_id == **id))
            .copied()
            .collect();
        for id in orphans {
            self.advance_quiet(id, now, &mut events);
        }

        Ok(events)
    }

    /// Expire every collecting candidate and release buffered state. Used as
    /// the external stop signal; in-flight candidates are reported, never
    /// silently dropped.
    pub fn flush(&mut self) -> Vec<ExpiredCandidate> {
        let mut expired: Vec<ExpiredCandidate> = Vec::new();
        for (_, candidate) in self.candidates.drain() {
            debug!(
                "flush: candidate on band {:.0} Hz expired with {} observations",
                candidate.band.center_hz,
                candidate.observations.len()
            );
            expired.push(ExpiredCandidate {
                band_center_hz: candidate.band.center_hz,
                first_seen_secs: candidate.first_seen_secs,
                observations: candidate.observations.len(),
            });
        }
        self.last_index = None;
        expired
    }

    /// Restart for a new stream. Debounce history survives: the physical
    /// environment did not change because the stream was reopened.
    pub fn reset(&mut self) {
        self.candidates.clear();
        self.last_index = None;
    }

    /// Strongest qualifying slot of a band in this window, if any.
    fn best_slot(&self, band: &WatchBand, window: &WindowObservations) -> Option<SlotObservation> {
        let mut best: Option<SlotObservation> = None;
        for (slot, &frequency_hz) in band.slot_frequencies.iter().enumerate() {
            let Some(obs) = window
                .observations
                .iter()
                .find(|o| (o.frequency_hz - frequency_hz).abs() < 0.5)
            else {
                continue;
            };
            let threshold = (self.config.threshold_factor * obs.noise_floor)
                .max(self.config.min_magnitude);
            if obs.magnitude < threshold {
                continue;
            }
            if best.as_ref().map_or(true, |b| obs.magnitude > b.magnitude) {
                best = Some(SlotObservation {
                    window_start_secs: window.start_secs,
                    slot: slot as u8,
                    magnitude: obs.magnitude,
                    threshold,
                });
            }
        }
        best
    }

    fn advance_with_observation(
        &mut self,
        band: &WatchBand,
        obs: SlotObservation,
        events: &mut Vec<TriggerEvent>,
    ) {
        let now = obs.window_start_secs;
        let split_gap = self.codec.run_split_gap_secs();

        let Some(candidate) = self.candidates.get_mut(&band.barcode_id) else {
            debug!(
                "spawn candidate on band {:.0} Hz (slot {}, magnitude {:.4})",
                band.center_hz, obs.slot, obs.magnitude
            );
            self.candidates
                .insert(band.barcode_id, Candidate::new(band, obs));
            return;
        };

        let splits = candidate.current_slot != Some(obs.slot)
            || now - candidate.last_obs_secs > split_gap;
        if splits {
            if candidate.current_slot.take().is_some() {
                candidate.completed_runs += 1;
            }
            if candidate.completed_runs >= SYMBOLS_PER_SEQUENCE {
                // Sequence complete; this observation starts something new
                let finished = self.candidates.remove(&band.barcode_id).expect("present");
                self.try_decode(finished, events);
                self.candidates
                    .insert(band.barcode_id, Candidate::new(band, obs));
                return;
            }
            candidate.current_slot = Some(obs.slot);
        }
        candidate.last_obs_secs = now;
        candidate.observations.push(obs);
    }

    fn advance_quiet(&mut self, id: BarcodeId, now: f64, events: &mut Vec<TriggerEvent>) {
        let Some(candidate) = self.candidates.get_mut(&id) else {
            return;
        };
        let elapsed = now - candidate.last_obs_secs;

        if candidate.current_slot.is_some() && elapsed > self.codec.run_split_gap_secs() {
            candidate.current_slot = None;
            candidate.completed_runs += 1;
        }
        if candidate.completed_runs >= SYMBOLS_PER_SEQUENCE {
            let finished = self.candidates.remove(&id).expect("present");
            self.try_decode(finished, events);
            return;
        }
        if elapsed > self.codec.symbol_timeout_secs() {
            let candidate = self.candidates.remove(&id).expect("present");
            debug!(
                "candidate on band {:.0} Hz expired after {} observations",
                candidate.band.center_hz,
                candidate.observations.len()
            );
        }
    }

    fn try_decode(&mut self, candidate: Candidate, events: &mut Vec<TriggerEvent>) {
        match self.codec.decode(&candidate.observations) {
            DecodeOutcome::Match(matched) => {
                if let Some(&previous) = self.last_trigger.get(&matched.barcode_id) {
                    if matched.sequence_start_secs - previous < self.config.debounce_secs {
                        debug!(
                            "debounce: suppressed repeat of {} at {:.3}s",
                            matched.barcode_id, matched.sequence_start_secs
                        );
                        return;
                    }
                }
                match self.lookup.resolve_barcode(matched.barcode_id) {
                    Ok(campaign) => {
                        self.last_trigger
                            .insert(matched.barcode_id, matched.sequence_start_secs);
                        events.push(TriggerEvent {
                            barcode_id: matched.barcode_id,
                            detected_at_secs: matched.sequence_start_secs,
                            confidence: matched.confidence,
                            redirect_url: campaign.redirect_url,
                        });
                    }
                    Err(_) => {
                        // A matched watermark should always resolve
                        warn!(
                            "decoded watermark {} did not resolve to a campaign; trigger dropped",
                            matched.barcode_id
                        );
                    }
                }
            }
            DecodeOutcome::NoMatch(reason) => {
                debug!(
                    "candidate on band {:.0} Hz ended without a match: {:?}",
                    candidate.band.center_hz, reason
                );
            }
        }
    }
}
