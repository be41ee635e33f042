//! Running-speed tuning, spontaneous against visually driven activity.

use ndarray::{s, Array1, Array2, Array3};
use observatory_core::{StimulusKind, StimulusTable};

use crate::sweep::anova_pvalue;
use crate::AnalysisError;

/// Speeds at or above this (cm/s) count as running when sizing bins.
const RUNNING_THRESHOLD_CM_S: f64 = 1.0;

#[derive(Debug, Clone, Copy)]
pub struct SpeedInput<'a> {
    pub dfftraces: &'a Array2<f64>,
    pub dxcm: &'a Array1<f64>,
    pub spontaneous: &'a StimulusTable,
    pub binsize: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakRun {
    pub speed_max_sp: f64,
    pub speed_min_sp: f64,
    pub ptest_sp: f64,
    pub mod_sp: f64,
    pub speed_max_vis: f64,
    pub speed_min_vis: f64,
    pub ptest_vis: f64,
    pub mod_vis: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeedTuning {
    /// `bins x 2`: mean speed, SEM.
    pub binned_dx_sp: Array2<f64>,
    /// `cells x bins x 2`: mean dF/F, SEM.
    pub binned_cells_sp: Array3<f64>,
    pub binned_dx_vis: Array2<f64>,
    pub binned_cells_vis: Array3<f64>,
    pub peak_run: Vec<PeakRun>,
}

struct Binned {
    dx: Array2<f64>,
    cells: Array3<f64>,
    members: Vec<Vec<usize>>,
}

pub fn compute_speed_tuning(input: &SpeedInput<'_>) -> Result<SpeedTuning, AnalysisError> {
    if input.binsize == 0 {
        return Err(AnalysisError::InvalidParameter {
            name: "binsize",
            message: "bins must hold at least one frame".to_string(),
        });
    }
    let block = input
        .spontaneous
        .last()
        .ok_or(AnalysisError::EmptyStimulusTable {
            stimulus: StimulusKind::Spontaneous,
        })?;

    let frames = input.dxcm.len().min(input.dfftraces.ncols());
    let is_spontaneous = |frame: usize| {
        input
            .spontaneous
            .rows()
            .iter()
            .any(|row| row.start <= frame && frame < row.end)
    };
    let has_speed = |frame: &usize| !input.dxcm[*frame].is_nan();

    let sp_frames: Vec<usize> = (block.start.min(frames)..block.end.min(frames))
        .filter(has_speed)
        .collect();
    let vis_frames: Vec<usize> = (0..frames)
        .filter(|frame| !is_spontaneous(*frame))
        .filter(has_speed)
        .collect();

    let sp = bin_by_speed(input, sp_frames);
    let vis = bin_by_speed(input, vis_frames);

    let peak_run = (0..input.dfftraces.nrows())
        .map(|cell| {
            let (speed_max_sp, speed_min_sp) = extremes(&sp, cell);
            let (speed_max_vis, speed_min_vis) = extremes(&vis, cell);
            PeakRun {
                speed_max_sp,
                speed_min_sp,
                ptest_sp: bin_pvalue(input, &sp, cell),
                mod_sp: modulation(speed_max_sp, speed_min_sp),
                speed_max_vis,
                speed_min_vis,
                ptest_vis: bin_pvalue(input, &vis, cell),
                mod_vis: modulation(speed_max_vis, speed_min_vis),
            }
        })
        .collect();

    Ok(SpeedTuning {
        binned_dx_sp: sp.dx,
        binned_cells_sp: sp.cells,
        binned_dx_vis: vis.dx,
        binned_cells_vis: vis.cells,
        peak_run,
    })
}

fn bin_by_speed(input: &SpeedInput<'_>, mut frames: Vec<usize>) -> Binned {
    let dxcm = input.dxcm;
    frames.sort_by(|a, b| dxcm[*a].total_cmp(&dxcm[*b]));

    let running = frames
        .iter()
        .filter(|frame| dxcm[**frame] >= RUNNING_THRESHOLD_CM_S)
        .count();
    let nbins = (1 + running / input.binsize).min(frames.len().div_ceil(input.binsize));
    let members: Vec<Vec<usize>> = frames
        .chunks(input.binsize)
        .take(nbins)
        .map(<[usize]>::to_vec)
        .collect();

    let cells = input.dfftraces.nrows();
    let mut dx = Array2::zeros((nbins, 2));
    let mut binned = Array3::zeros((cells, nbins, 2));
    for (bin, chunk) in members.iter().enumerate() {
        let (mean, sem) = mean_sem(chunk.iter().map(|frame| dxcm[*frame]));
        dx[[bin, 0]] = mean;
        dx[[bin, 1]] = sem;
        for cell in 0..cells {
            let (mean, sem) =
                mean_sem(chunk.iter().map(|frame| input.dfftraces[[cell, *frame]]));
            binned[[cell, bin, 0]] = mean;
            binned[[cell, bin, 1]] = sem;
        }
    }

    Binned {
        dx,
        cells: binned,
        members,
    }
}

fn mean_sem(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let values: Array1<f64> = values.collect();
    match values.mean() {
        Some(mean) => (mean, values.std(0.0) / (values.len() as f64).sqrt()),
        None => (f64::NAN, f64::NAN),
    }
}

fn extremes(binned: &Binned, cell: usize) -> (f64, f64) {
    if binned.members.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    binned
        .cells
        .slice(s![cell, .., 0])
        .iter()
        .fold((f64::NEG_INFINITY, f64::INFINITY), |(max, min), value| {
            (max.max(*value), min.min(*value))
        })
}

fn bin_pvalue(input: &SpeedInput<'_>, binned: &Binned, cell: usize) -> f64 {
    let groups: Vec<Array1<f64>> = binned
        .members
        .iter()
        .map(|chunk| chunk.iter().map(|frame| input.dfftraces[[cell, *frame]]).collect())
        .collect();
    let views: Vec<_> = groups.iter().map(Array1::view).collect();
    anova_pvalue(&views)
}

/// Ratio of the dominant extreme to the other one, NaN when neither dominates.
fn modulation(max: f64, min: f64) -> f64 {
    if max > min.abs() {
        max / min
    } else if max < min.abs() {
        min / max
    } else {
        f64::NAN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use observatory_core::SweepRow;

    fn spontaneous(start: usize, end: usize) -> StimulusTable {
        StimulusTable::new(vec![SweepRow {
            frame: 0,
            start,
            end,
        }])
        .unwrap()
    }

    #[test]
    fn bins_follow_running_frames() {
        // frames 0..40 visual, 40..80 spontaneous; speed ramps with the frame index
        let dxcm = Array1::from_shape_fn(80, |frame| (frame % 40) as f64);
        let dfftraces = Array2::from_shape_fn((2, 80), |(cell, frame)| {
            if cell == 0 {
                (frame % 40) as f64 * 0.1
            } else {
                0.5
            }
        });
        let table = spontaneous(40, 80);

        let tuning = compute_speed_tuning(&SpeedInput {
            dfftraces: &dfftraces,
            dxcm: &dxcm,
            spontaneous: &table,
            binsize: 10,
        })
        .unwrap();

        // 39 running frames -> 1 + 39 / 10 = 4 bins
        assert_eq!(tuning.binned_dx_sp.dim(), (4, 2));
        assert_eq!(tuning.binned_cells_sp.dim(), (2, 4, 2));
        assert_eq!(tuning.binned_dx_vis.dim(), (4, 2));
        assert!((tuning.binned_dx_sp[[0, 0]] - 4.5).abs() < 1e-9);
        assert!((tuning.binned_dx_sp[[3, 0]] - 34.5).abs() < 1e-9);

        let tuned = tuning.peak_run[0];
        assert!((tuned.speed_max_sp - 3.45).abs() < 1e-9);
        assert!((tuned.speed_min_sp - 0.45).abs() < 1e-9);
        assert!(tuned.ptest_sp < 0.01);
        assert!((tuned.mod_sp - 3.45 / 0.45).abs() < 1e-9);

        let flat = tuning.peak_run[1];
        assert_eq!(flat.speed_max_vis, 0.5);
        assert!(flat.mod_vis.is_nan());
    }

    #[test]
    fn nan_speeds_are_dropped() {
        let dxcm = Array1::from_shape_fn(60, |frame| {
            if frame % 2 == 0 {
                f64::NAN
            } else {
                5.0
            }
        });
        let dfftraces = Array2::from_elem((1, 60), 0.2);
        let table = spontaneous(30, 60);

        let tuning = compute_speed_tuning(&SpeedInput {
            dfftraces: &dfftraces,
            dxcm: &dxcm,
            spontaneous: &table,
            binsize: 100,
        })
        .unwrap();

        assert_eq!(tuning.binned_dx_sp.dim(), (1, 2));
        assert_eq!(tuning.binned_dx_sp[[0, 0]], 5.0);
        assert!(tuning.peak_run[0].ptest_sp.is_nan());
    }

    #[test]
    fn empty_spontaneous_table_is_an_error() {
        let dxcm = Array1::zeros(10);
        let dfftraces = Array2::zeros((1, 10));
        let table = StimulusTable::default();

        let err = compute_speed_tuning(&SpeedInput {
            dfftraces: &dfftraces,
            dxcm: &dxcm,
            spontaneous: &table,
            binsize: 4,
        })
        .unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::EmptyStimulusTable {
                stimulus: StimulusKind::Spontaneous
            }
        ));
    }

    #[test]
    fn modulation_picks_dominant_extreme() {
        assert_eq!(modulation(4.0, 2.0), 2.0);
        assert_eq!(modulation(1.0, -4.0), -4.0);
        assert!(modulation(2.0, -2.0).is_nan());
    }
}
