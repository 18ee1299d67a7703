use std::path::PathBuf;

use anyhow::Context;
use tracing::info;

use movement_server::{build_app, run_frames, HostConfig};

fn main() -> anyhow::Result<()> {
    // Config path: first argument, then MOVEMENT_HOST_CONFIG, else defaults
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("MOVEMENT_HOST_CONFIG").ok())
        .map(PathBuf::from);
    let config = match &path {
        Some(path) => HostConfig::load(path).with_context(|| format!("loading host config {}", path.display()))?,
        None => HostConfig::default(),
    };

    let frames = config.total_frames();
    let agents = config.agents;
    let link = config.link.clone();
    let mut app = build_app(config).context("building host app")?;

    info!(
        frames,
        agents,
        latency = link.latency,
        jitter = link.jitter,
        loss = link.loss,
        "starting movement host"
    );
    let stats = run_frames(&mut app, frames);
    info!(
        corrections = stats.corrections,
        acks = stats.acks,
        max_divergence = stats.max_divergence,
        fingerprint = %stats.fingerprint,
        "run finished"
    );
    println!("{}", stats.to_json());
    Ok(())
}
