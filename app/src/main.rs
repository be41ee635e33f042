#![forbid(unsafe_code)]

use analysis_config::{AnalysisConfig, ConfigError};
use locally_sparse_noise::LocallySparseNoise;
use log::{info, warn};
use observatory_core::digest::{digest_array, hex, MEAN_SWEEP_DIGEST_DOMAIN, PVAL_DIGEST_DOMAIN};
use observatory_core::{ShapeError, StimulusKind};
use observatory_dataset::{SessionParams, SyntheticSession};
use std::path::PathBuf;
use stimulus_analysis::{AnalysisError, DefaultResponseModel};
use thiserror::Error;

const DEFAULT_CONFIG_DIR: &str = "config";

#[derive(Debug, Error)]
enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("synthetic session could not be built: {0}")]
    Session(#[from] ShapeError),
    #[error("analysis failed: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("unexpected argument {0}")]
    UnexpectedArgument(String),
}

fn config_dir() -> Result<PathBuf, AppError> {
    let mut args = std::env::args().skip(1);
    let dir = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR));
    if let Some(extra) = args.next() {
        return Err(AppError::UnexpectedArgument(extra));
    }
    Ok(dir)
}

fn analyze(stimulus: StimulusKind, config: AnalysisConfig) -> Result<(), AppError> {
    let session = SyntheticSession::generate(SessionParams::for_stimulus(stimulus))?;
    let lsn = LocallySparseNoise::with_model(&session, stimulus, DefaultResponseModel, config)?;

    let field = lsn.receptive_field()?;
    let mean_sweep = lsn.mean_sweep_response()?;
    let pval = lsn.pval()?;
    info!(
        "{stimulus}: receptive field {} mean sweep {} pval {}",
        hex(&field.digest()),
        hex(&digest_array(MEAN_SWEEP_DIGEST_DOMAIN, &mean_sweep.cells)),
        hex(&digest_array(PVAL_DIGEST_DOMAIN, pval))
    );

    for cell in 0..field.cell_count() {
        let peak = lsn.peak_location(cell)?;
        let planted = session
            .planted_for(cell)
            .map(|p| format!("planted ({}, {})", p.row, p.col))
            .unwrap_or_else(|| "unplanted".to_string());
        info!(
            "{stimulus}: cell {cell} {planted} on {:?} off {:?}",
            peak.on.map(|p| (p.row, p.col)),
            peak.off.map(|p| (p.row, p.col))
        );
    }

    match lsn.base().peak_run() {
        Ok(peak_run) => {
            for (cell, run) in peak_run.iter().enumerate() {
                info!(
                    "{stimulus}: cell {cell} running modulation sp {:.3} vis {:.3}",
                    run.mod_sp, run.mod_vis
                );
            }
        }
        Err(err) => warn!("{stimulus}: speed tuning skipped: {err}"),
    }
    Ok(())
}

fn main() -> Result<(), AppError> {
    env_logger::init();

    let dir = config_dir()?;
    let config = AnalysisConfig::load_from_dir(&dir)?;
    info!("loaded analysis config from {}: {config:?}", dir.display());

    for stimulus in StimulusKind::LOCALLY_SPARSE_NOISE_VARIANTS {
        analyze(stimulus, config)?;
    }

    println!("analysis ok: {} stimuli", StimulusKind::LOCALLY_SPARSE_NOISE_VARIANTS.len());
    Ok(())
}
