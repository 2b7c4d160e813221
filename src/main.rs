use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(not(feature = "opencv"))]
use marker_fusion::geometry::LmPoseSolver;
#[cfg(feature = "opencv")]
use marker_fusion::geometry::OpenCvPoseSolver;
use marker_fusion::geometry::PoseSolver;
use marker_fusion::io::{FusionConfig, Recording};
use marker_fusion::system::FusionSystem;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let (config_path, recording_path) = match (args.next(), args.next()) {
        (Some(config), Some(recording)) => (Some(config), recording),
        (Some(recording), None) => (None, recording),
        _ => bail!("usage: marker-fusion [config.yaml] <recording.csv>"),
    };

    let config = match &config_path {
        Some(path) => FusionConfig::load(path)?,
        None => {
            warn!("no configuration given, using the competition defaults");
            FusionConfig::default()
        }
    };
    let recording = Recording::load(&recording_path)?;
    info!("loaded {} ticks from {}", recording.len(), recording_path);

    #[cfg(feature = "opencv")]
    let solver: Arc<dyn PoseSolver> = Arc::new(OpenCvPoseSolver);
    #[cfg(not(feature = "opencv"))]
    let solver: Arc<dyn PoseSolver> = Arc::new(LmPoseSolver::default());
    let mut system = FusionSystem::from_config(&config, solver).context("building fusion system")?;

    for recorded in recording.ticks {
        let output = system.process_observations(recorded.tick, recorded.observations);
        println!(
            "tick {} side {} ({} candidates, {} rejected, {} updated)",
            output.tick, output.side, output.stats.candidates, output.stats.rejected, output.stats.objects_updated
        );
        for record in output.objects() {
            let t = record.transform.translation;
            println!(
                "  {:<12} {:>2} {:<20} [{:>7.3}, {:>7.3}, {:>7.3}] yaw {:>6.1}°",
                record.identity.kind.to_string(),
                record.identity.numeral,
                record.identity.name,
                t.x,
                t.y,
                t.z,
                record.transform.yaw().to_degrees()
            );
        }
    }

    Ok(())
}
