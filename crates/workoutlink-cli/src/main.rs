//! WorkoutLink CLI
//!
//! Thin wrapper around workoutlink-core for simulating a session and
//! inspecting wire envelopes.
//!
//! ## Usage
//!
//! ```bash
//! # Run a controller and a sensor in-process through a scripted workout
//! workoutlink simulate --samples 5
//!
//! # Same, with one JSONL log file per peer under ./logs/raw/
//! workoutlink -vv --log-dir ./logs simulate
//!
//! # Decode an envelope
//! workoutlink decode '{"v":1,"kind":"command","payload":{"command":"start"}}'
//!
//! # Build an envelope
//! workoutlink encode command '{"command":"end"}'
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use workoutlink_core::logging::JsonlLayer;
use workoutlink_core::{
    ControllerPeer, Envelope, LinkMessage, LiveMetrics, MemoryLink, MessageKind, OwnerRegistry,
    PeerConfig, PeerDiagnostics, PeerRole, SensorPeer, WireEnvelope, WorkoutId,
    WorkoutSessionOwner, WorkoutState,
};

/// WorkoutLink - controller/sensor workout session protocol
#[derive(Parser)]
#[command(name = "workoutlink")]
#[command(version = "0.1.0")]
#[command(about = "WorkoutLink - controller/sensor workout session protocol")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Also write JSONL logs under this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Peer config file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run both peers over an in-memory link through a scripted workout
    Simulate {
        /// Telemetry samples to stream while connected
        #[arg(short, long, default_value_t = 3)]
        samples: u32,

        /// Delay between samples in milliseconds
        #[arg(long, default_value_t = 1_000)]
        sample_interval_ms: u64,

        /// Activity code sent with the start command
        #[arg(long, default_value_t = 37)]
        activity_type: u32,

        /// Location code sent with the start command
        #[arg(long, default_value_t = 1)]
        location_type: i64,
    },

    /// Decode a wire envelope given as JSON
    Decode {
        /// Envelope JSON, e.g. '{"v":1,"kind":"ping","payload":{}}'
        json: String,
    },

    /// Wrap a payload in a wire envelope
    Encode {
        /// ping, command, workoutState, liveMetrics or error
        kind: String,

        /// Payload JSON object
        payload: String,
    },
}

fn setup_logging(verbosity: u8, log_dir: Option<&Path>) -> Result<()> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let jsonl = match log_dir {
        Some(dir) => Some(
            JsonlLayer::new(dir, "workoutlink")
                .with_context(|| format!("Failed to open log directory {}", dir.display()))?,
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(jsonl)
        .init();
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PeerConfig> {
    match path {
        Some(path) => PeerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(PeerConfig::default()),
    }
}

// ============================================================================
// Simulation
// ============================================================================

/// What the simulated wrist owner was asked to do
#[derive(Debug)]
enum OwnerCall {
    Start { activity_type: u32, location_type: i64 },
    End,
}

/// Owner that forwards calls to the simulation driver
struct SimulatedOwner {
    calls: mpsc::UnboundedSender<OwnerCall>,
}

impl WorkoutSessionOwner for SimulatedOwner {
    fn start(&self, activity_type: u32, location_type: i64) {
        let _ = self.calls.send(OwnerCall::Start {
            activity_type,
            location_type,
        });
    }

    fn end(&self) {
        let _ = self.calls.send(OwnerCall::End);
    }
}

struct Simulation {
    link: MemoryLink,
    controller: ControllerPeer,
    sensor: SensorPeer,
    owner_calls: mpsc::UnboundedReceiver<OwnerCall>,
}

impl Simulation {
    fn new(config: PeerConfig) -> Self {
        let link = MemoryLink::new();
        let registry = OwnerRegistry::new();
        let (calls, owner_calls) = mpsc::unbounded_channel();
        let owner = registry.register(Arc::new(SimulatedOwner { calls }));

        let controller = ControllerPeer::spawn(
            Arc::new(link.transport(PeerRole::Controller)),
            config.clone().with_instance_name("controller"),
        );
        let sensor = SensorPeer::spawn(
            Arc::new(link.transport(PeerRole::Sensor)),
            registry,
            Some(owner),
            config.with_instance_name("sensor"),
        );

        Self {
            link,
            controller,
            sensor,
            owner_calls,
        }
    }

    /// Drain both peers; handling on one side can enqueue on the other
    async fn settle(&self) -> Result<()> {
        for _ in 0..2 {
            self.controller.flush().await?;
            self.sensor.flush().await?;
        }
        Ok(())
    }

    async fn next_owner_call(&mut self) -> Result<OwnerCall> {
        tokio::time::timeout(Duration::from_secs(1), self.owner_calls.recv())
            .await
            .map_err(|_| anyhow!("Sensor owner was never called"))?
            .ok_or_else(|| anyhow!("Sensor owner channel closed"))
    }

    fn set_reachable(&self, reachable: bool) {
        println!("link: reachable = {}", reachable);
        self.link.set_reachable(reachable);
    }

    async fn run(
        &mut self,
        samples: u32,
        sample_interval: Duration,
        activity_type: u32,
        location_type: i64,
    ) -> Result<WorkoutId> {
        self.settle().await?;
        self.set_reachable(true);
        self.settle().await?;

        println!("controller: start({}, {})", activity_type, location_type);
        self.controller
            .send_start_command(activity_type, location_type)?;
        self.settle().await?;

        let (activity_type, location_type) = match self.next_owner_call().await? {
            OwnerCall::Start {
                activity_type,
                location_type,
            } => (activity_type, location_type),
            other => bail!("Expected a start call on the sensor owner, got {:?}", other),
        };
        let workout_id = WorkoutId::new();
        println!(
            "sensor: owner started workout {} (activity {}, location {})",
            workout_id, activity_type, location_type
        );
        self.sensor
            .publish_workout_state(workout_id.clone(), WorkoutState::Started)?;

        for i in 0..samples {
            let elapsed = f64::from(i + 1) * sample_interval.as_secs_f64();
            let metrics = LiveMetrics::now(
                118.0 + f64::from(i) * 3.0,
                elapsed * 0.2,
                elapsed * 2.8,
                elapsed,
            );
            self.sensor
                .publish_live_metrics(workout_id.clone(), metrics)?;
            self.settle().await?;
            tokio::time::sleep(sample_interval).await;
        }

        self.set_reachable(false);
        self.settle().await?;

        println!("sensor: workout ended on the wrist while disconnected");
        self.sensor.publish_live_metrics(
            workout_id.clone(),
            LiveMetrics::now(96.0, 0.0, 0.0, 0.0),
        )?;
        self.sensor
            .publish_workout_state(workout_id.clone(), WorkoutState::Ended)?;
        self.settle().await?;
        println!(
            "sensor: {} envelope(s) waiting in the queue",
            self.link.queued_count(PeerRole::Sensor)
        );

        self.set_reachable(true);
        let delivered = self.link.flush_queued();
        println!("link: delivered {} queued envelope(s)", delivered);
        self.settle().await?;

        Ok(workout_id)
    }

    fn report(&self, workout_id: &WorkoutId) {
        println!();
        match self.controller.workout(workout_id) {
            Some(workout) => {
                println!("Workout {}", workout.workout_id);
                println!("  phase: {:?}", workout.phase);
                println!("  samples received: {}", workout.samples_received);
                if let Some(metrics) = workout.last_metrics {
                    println!(
                        "  last sample: {:.0} bpm, {:.1} kcal, {:.0} m, {:.0} s",
                        metrics.heart_rate, metrics.active_energy, metrics.distance, metrics.elapsed
                    );
                }
            }
            None => println!("Workout {}: never seen by the controller", workout_id),
        }
        print_diagnostics("Controller", &self.controller.diagnostics());
        print_diagnostics("Sensor", &self.sensor.diagnostics());
    }

    fn teardown(&self) -> Result<()> {
        self.controller.teardown()?;
        self.sensor.teardown()?;
        Ok(())
    }
}

fn print_diagnostics(label: &str, diag: &PeerDiagnostics) {
    println!(
        "{}: {}, sent {}, received {}, dropped {}",
        label, diag.activation_state, diag.messages_sent, diag.messages_received, diag.messages_dropped
    );
    if let Some(error) = &diag.last_error {
        println!("  last error: {}", error);
    }
}

// ============================================================================
// Envelope inspection
// ============================================================================

fn decode_envelope(json: &str) -> Result<()> {
    let wire: WireEnvelope =
        serde_json::from_str(json).context("Envelope must be a JSON object")?;
    let envelope = Envelope::decode(&wire)?;
    let message = LinkMessage::from_envelope(&envelope)?;

    println!("kind: {}", envelope.kind);
    println!("version: {}", envelope.version);
    if let Some(workout_id) = message.workout_id() {
        println!("workoutID: {}", workout_id);
    }
    println!("{:#?}", message);
    Ok(())
}

fn encode_envelope(kind: &str, payload: &str) -> Result<()> {
    let kind: MessageKind = kind.parse()?;
    let payload = serde_json::from_str(payload).context("Payload must be a JSON object")?;

    // Round-trip through the typed message so bad payloads are rejected here.
    let message = LinkMessage::from_envelope(&Envelope::new(kind, payload))?;
    println!("{}", serde_json::to_string(&message.encode()?)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.log_dir.as_deref())?;

    match cli.command {
        Commands::Simulate {
            samples,
            sample_interval_ms,
            activity_type,
            location_type,
        } => {
            let config = load_config(cli.config.as_deref())?;
            info!(samples, sample_interval_ms, "Starting simulation");

            let mut simulation = Simulation::new(config);
            let workout_id = simulation
                .run(
                    samples,
                    Duration::from_millis(sample_interval_ms),
                    activity_type,
                    location_type,
                )
                .await?;
            simulation.report(&workout_id);
            simulation.teardown()?;
        }

        Commands::Decode { json } => decode_envelope(&json)?,

        Commands::Encode { kind, payload } => encode_envelope(&kind, &payload)?,
    }

    Ok(())
}
