use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use posture_sentinel::{
    camera::Camera, config::Config, inference::OnnxPoseDetector, overlay::WindowOverlay,
    sampler::FrameSampler,
};

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const WINDOW_NAME: &str = "Posture Sentinel";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load_or_create(&config_path)?;
    tracing::info!(path = %config_path, "AI Posture Sentinel starting");

    let camera = Camera::new(config.camera_id).context("initializing camera")?;
    let detector = OnnxPoseDetector::new(&config.model_path, config.presence_threshold)
        .context("loading pose model")?;

    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
    let overlay = WindowOverlay::new(WINDOW_NAME, shutdown_tx).context("opening window")?;

    // HighGUI wants the main thread, so the sampler runs here rather than on a worker.
    let mut sampler = FrameSampler::from_config(camera, detector, overlay, &config);
    sampler.run(config.sample_period(), &shutdown_rx);

    Ok(())
}
