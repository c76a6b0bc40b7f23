use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use clap::Parser;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use duplex::audio::{Analyser, CpalMicrophone, PlaybackOutput, SpeakerOutput, VirtualOutput};
use duplex::transport::StdioTransport;
use duplex::{SessionConfig, SessionController};

/// Live voice session. Wire frames go over stdin/stdout to a bridge process
/// that holds the network connection; logs go to stderr.
#[derive(Debug, Parser)]
#[command(name = "duplex")]
struct Args {
    /// TOML session config. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run without a speaker; inbound audio is scheduled on a wall clock only.
    #[arg(long)]
    headless: bool,
}

/// State behind the example `update_simulation` tool.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulationState {
    is_active: bool,
    parameters: Map<String, Value>,
}

impl SimulationState {
    fn apply(&mut self, args: &Value) -> anyhow::Result<Value> {
        let Some(fields) = args.as_object() else {
            return Err(anyhow!("update_simulation expects an object, got {args}"));
        };
        for (key, value) in fields {
            match (key.as_str(), value) {
                ("isActive", Value::Bool(active)) => self.is_active = *active,
                ("isActive", other) => return Err(anyhow!("isActive must be a boolean, got {other}")),
                _ => {
                    self.parameters.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(json!({ "status": "updated", "simulation": serde_json::to_value(&*self)? }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => SessionConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SessionConfig::default(),
    };

    let analyser = Analyser::new();
    let output: Box<dyn PlaybackOutput> = if args.headless {
        Box::new(VirtualOutput::realtime(48000))
    } else {
        Box::new(SpeakerOutput::open(analyser.clone())?)
    };

    let mut controller = SessionController::new(
        Arc::new(StdioTransport::new()),
        Box::new(CpalMicrophone::new()),
        output,
        analyser,
    );

    let simulation = Arc::new(Mutex::new(SimulationState::default()));
    let state = simulation.clone();
    controller.register_tool("update_simulation", move |args| {
        let mut state = state.lock().map_err(|_| anyhow!("simulation state poisoned"))?;
        state.apply(args)
    });

    let mut view = controller.subscribe();
    tokio::spawn(async move {
        let mut shown = 0;
        while view.changed().await.is_ok() {
            let snapshot = view.borrow_and_update().clone();
            for entry in snapshot.transcripts.iter().skip(shown) {
                info!("[{:?}] {}", entry.sender, entry.text);
            }
            shown = snapshot.transcripts.len();
            if let Some(error) = &snapshot.error {
                info!("Session error: {}", error);
            }
        }
    });

    controller.connect(config).await?;
    info!("Session live. Press Ctrl+C to stop.");

    tokio::select! {
        _ = controller.run() => {}
        _ = tokio::signal::ctrl_c() => info!("Stopping"),
    }
    controller.disconnect().await;

    let snapshot = controller.telemetry().snapshot();
    info!("Session summary: {}", serde_json::to_string(&snapshot)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulation_update_merges_parameters() {
        let mut state = SimulationState::default();
        let result = state.apply(&json!({ "isActive": true, "speed": 2 })).unwrap();
        assert_eq!(result["simulation"]["isActive"], true);
        assert_eq!(result["simulation"]["parameters"]["speed"], 2);
        assert!(state.apply(&json!({ "isActive": "yes" })).is_err());
        assert!(state.apply(&json!(3)).is_err());
    }
}
