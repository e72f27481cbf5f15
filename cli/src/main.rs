use clap::{Parser, Subcommand};
use hound::WavSpec;
use sonicmark_core::{
    CampaignRecord, CodecParams, Detector, DetectorConfig, EncoderConfig, InMemoryRegistry,
    PcmBuffer, ToneSymbolCodec, WatermarkEncoder,
};
use std::fs::File;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sonicmark")]
#[command(about = "Sonic barcoding: embed and detect near-ultrasonic audio watermarks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed a campaign's watermark into an audio track
    Encode {
        /// Input WAV file (source audio)
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Output WAV file (watermarked audio)
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        /// Campaign record JSON (barcodeId, timestamp, frequency, url)
        #[arg(short, long, value_name = "CAMPAIGN.JSON")]
        campaign: PathBuf,
    },

    /// Scan an audio track for registered watermarks
    Detect {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// JSON array of registered campaign records
        #[arg(short, long, value_name = "CAMPAIGNS.JSON")]
        campaigns: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Encode {
            input,
            output,
            campaign,
        } => encode_command(&input, &output, &campaign)?,
        Commands::Detect { input, campaigns } => detect_command(&input, &campaigns)?,
    }

    Ok(())
}

fn encode_command(
    input_path: &PathBuf,
    output_path: &PathBuf,
    campaign_path: &PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let record: CampaignRecord = serde_json::from_reader(File::open(campaign_path)?)?;
    println!(
        "Campaign {} at {:.3}s on {:.0} Hz",
        record.barcode_id, record.trigger_timestamp, record.frequency_band_hz
    );

    let source = read_wav(input_path)?;
    let encoder = WatermarkEncoder::new(
        ToneSymbolCodec::new(CodecParams::default().at_sample_rate(source.sample_rate)),
        EncoderConfig::default(),
    );
    let encoded = encoder.encode(&source, &record)?;
    println!(
        "Embedded at gain {:.4}{}",
        encoded.watermark_gain,
        if encoded.attenuated {
            " (attenuated to avoid clipping)"
        } else {
            ""
        }
    );

    write_wav(output_path, source.sample_rate, source.channels, &encoded.samples)?;
    println!("Wrote {}", output_path.display());
    Ok(())
}

fn detect_command(
    input_path: &PathBuf,
    campaigns_path: &PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let records: Vec<CampaignRecord> = serde_json::from_reader(File::open(campaigns_path)?)?;
    let source = read_wav(input_path)?;

    let params = CodecParams::default().at_sample_rate(source.sample_rate);
    let mut registry = InMemoryRegistry::new(&params);
    for record in records {
        registry.register(record)?;
    }
    println!(
        "Scanning {} channel(s) at {} Hz against {} campaign(s)",
        source.channels,
        source.sample_rate,
        registry.len()
    );

    let snapshot = registry.snapshot(1);
    let detector = Detector::new(params, snapshot, registry, DetectorConfig::default());
    let report = if source.channels == 1 {
        detector.detect(&source.samples)?
    } else {
        detector.detect_interleaved(&source.samples, source.channels as usize)?
    };

    for event in &report.events {
        println!("{}", serde_json::to_string(event)?);
    }
    println!(
        "{} trigger(s) in {} window(s), {} expired candidate(s)",
        report.events.len(),
        report.windows_processed,
        report.expired.len()
    );
    Ok(())
}

/// Read a WAV file into an interleaved sample buffer. Handles 16-bit integer
/// and 32-bit float PCM.
fn read_wav(path: &PathBuf) -> Result<PcmBuffer, Box<dyn std::error::Error>> {
    let mut reader = hound::WavReader::new(File::open(path)?)?;
    let spec = reader.spec();
    println!(
        "Read WAV: {} Hz, {} channels, {} bits",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    );

    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => {
            let int_samples: Result<Vec<i16>, _> = reader.samples::<i16>().collect();
            int_samples?
                .into_iter()
                .map(|s| s as f32 / 32768.0)
                .collect()
        }
        (hound::SampleFormat::Float, 32) => {
            let float_samples: Result<Vec<f32>, _> = reader.samples::<f32>().collect();
            float_samples?
        }
        (format, bits) => {
            return Err(format!("Unsupported WAV format: {:?} {} bits", format, bits).into());
        }
    };

    Ok(PcmBuffer::new(spec.sample_rate, spec.channels, samples))
}

/// Write an interleaved buffer as 16-bit PCM.
fn write_wav(
    path: &PathBuf,
    sample_rate: u32,
    channels: u16,
    samples: &[f32],
) -> Result<(), Box<dyn std::error::Error>> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::new(File::create(path)?, spec)?;

    for sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        writer.write_sample((clamped * 32767.0) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}
