use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use duplex::audio::{AudioEncoding, ClipValidator, RecordedClip};
use duplex::SessionConfig;

/// Check recorded clips for silence and length. Prints one JSON line per file.
#[derive(Debug, Parser)]
#[command(name = "validate_clip")]
struct Args {
    /// Clips to check. `.wav`, raw PCM16 (`.pcm`/`.raw`) or µ-law (`.ulaw`/`.mulaw`).
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Sample rate for headerless files.
    #[arg(long, default_value_t = 16000)]
    rate: u32,

    /// Duration measured by the recorder, in milliseconds.
    #[arg(long)]
    tracked_ms: Option<u64>,

    /// Session config whose `[validation]` section sets the thresholds.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn encoding_for(path: &Path) -> anyhow::Result<AudioEncoding> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "wav" | "wave" => Ok(AudioEncoding::Wav),
        "pcm" | "raw" | "l16" => Ok(AudioEncoding::Pcm16),
        "ulaw" | "mulaw" | "au" => Ok(AudioEncoding::MuLaw),
        other => anyhow::bail!("{}: unknown clip type '{}'", path.display(), other),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let validation = match &args.config {
        Some(path) => SessionConfig::from_file(path)?.validation,
        None => SessionConfig::default().validation,
    };
    let validator = ClipValidator::new(validation);

    for path in &args.files {
        let encoding = encoding_for(path)?;
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let mut clip = RecordedClip::new(encoding, args.rate, data);
        if let Some(ms) = args.tracked_ms {
            clip = clip.with_tracked_duration(Duration::from_millis(ms));
        }

        let verdict = validator.validate(&clip).await;
        let line = json!({ "file": path.display().to_string(), "validation": verdict });
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(())
}
