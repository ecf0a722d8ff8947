//! Command implementations

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::app::{Message, Orchestrator, RunOutcome, UiInput};
use crate::cli::args::{ConvertArgs, ProbeArgs};
use crate::config::AppConfig;
use crate::domain::model::ProbeMetadata;
use crate::domain::rules::{ScalePolicy, ScaleTarget};
use crate::engine::Transcoder;
use crate::output::stdout_renderer;
use crate::planner::JobPlanner;
use crate::ports::ProbePort;
use crate::probe::FfprobeInspector;

/// Execute the convert command
pub async fn convert(args: ConvertArgs, mut config: AppConfig) -> Result<RunOutcome> {
    info!("Starting convert operation");
    info!("Input: {}", args.input.display());

    if let Some(dir) = &args.output_dir {
        config.output.directory = dir.clone();
    }
    if let Some(policy) = args.on_failure {
        config.run.on_failure = policy;
    }
    config.validate().context("Invalid configuration")?;

    if !args.input.is_file() {
        return Err(anyhow!("Input file does not exist: {}", args.input.display()));
    }

    let planner = JobPlanner::new(&config.output.directory);
    let plan = planner.plan(&args.input, &args.settings());
    info!(
        "Output: {} ({} of {} encodes enabled)",
        planner.output_dir().display(),
        plan.iter().filter(|job| !job.skipped).count(),
        plan.len()
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let transcoder = Transcoder::from_config(&config, tx.clone());
    let mut orchestrator =
        Orchestrator::new(transcoder, stdout_renderer(args.format), config.run.on_failure);

    let interrupt_tx = tx.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            let _ = interrupt_tx.send(UiInput::Cancel.into());
        }
    });

    for input in [
        UiInput::FileSelected(args.input.clone()),
        UiInput::SettingsCompleted(plan),
    ] {
        tx.send(input.into())
            .map_err(|_| anyhow!("Event queue closed before the run started"))?;
    }
    drop(tx);

    let outcome = orchestrator.run(&mut rx).await;
    interrupt.abort();
    Ok(outcome)
}

#[derive(Serialize)]
struct ProbeReport<'a> {
    #[serde(flatten)]
    metadata: &'a ProbeMetadata,
    scale: Option<ScaleTarget>,
}

/// Execute the probe command
pub async fn probe(args: ProbeArgs, config: &AppConfig) -> Result<()> {
    info!("Starting probe operation");

    let inspector = FfprobeInspector::from_config(config);
    let metadata = inspector
        .probe(&args.input)
        .await
        .context("Failed to inspect input file")?;
    let scale = ScalePolicy::new(config.output.max_dimension).target_for(&metadata);

    if args.json {
        let report = ProbeReport {
            metadata: &metadata,
            scale,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("File: {}", args.input.display());
    println!("Duration: {:.2}s", metadata.duration_seconds);
    match metadata.dimensions() {
        Some((width, height)) => println!("Frame size: {}x{}", width, height),
        None => println!("Frame size: unknown"),
    }
    match scale {
        Some(target) => println!("Downscale: {}x{}", target.width, target.height),
        None => println!("Downscale: none"),
    }
    Ok(())
}
