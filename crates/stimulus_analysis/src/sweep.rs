use aprender::stats::f_oneway;
use ndarray::{s, Array1, Array2, Array3, ArrayView1};
use observatory_core::StimulusTable;

use crate::AnalysisError;

/// Sweep window lengths, in acquisition frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepParams {
    pub sweeplength: usize,
    pub interlength: usize,
    pub extralength: usize,
}

impl SweepParams {
    /// Frames per extracted window: baseline, sweep, trailing baseline.
    pub fn window(&self) -> usize {
        self.sweeplength + 2 * self.interlength
    }

    fn response_range(&self) -> std::ops::Range<usize> {
        let start = self.interlength;
        let end = (start + self.sweeplength + self.extralength).min(self.window());
        start..end
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SweepInput<'a> {
    pub stim_table: &'a StimulusTable,
    pub celltraces: &'a Array2<f64>,
    pub dxcm: &'a Array1<f64>,
    pub params: SweepParams,
}

/// Baseline-normalised windows around every sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepResponse {
    /// `sweeps x cells x window`, in percent change from baseline.
    pub cells: Array3<f64>,
    /// `sweeps x window` running speed; NaN past the end of the speed trace.
    pub running: Array2<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeanSweepResponse {
    /// `sweeps x cells`
    pub cells: Array2<f64>,
    /// NaN-skipping mean speed per sweep.
    pub running: Array1<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepProducts {
    pub sweep_response: SweepResponse,
    pub mean_sweep_response: MeanSweepResponse,
    /// `sweeps x cells` one-way ANOVA p-value, baseline against response.
    pub pval: Array2<f64>,
}

pub fn extract_sweep_response(input: &SweepInput<'_>) -> Result<SweepProducts, AnalysisError> {
    let params = input.params;
    let window = params.window();
    let frames = input.celltraces.ncols();
    let cells = input.celltraces.nrows();
    let sweeps = input.stim_table.len();

    let mut responses = Array3::zeros((sweeps, cells, window));
    let mut running = Array2::from_elem((sweeps, window), f64::NAN);

    for (sweep, row) in input.stim_table.rows().iter().enumerate() {
        let start = row
            .start
            .checked_sub(params.interlength)
            .filter(|start| start + window <= frames)
            .ok_or_else(|| AnalysisError::WindowOutOfRange {
                sweep,
                start: row.start,
                interlength: params.interlength,
                window,
                frames,
            })?;
        let end = start + window;

        for cell in 0..cells {
            let trace = input.celltraces.slice(s![cell, start..end]);
            let baseline = mean(trace.slice(s![..params.interlength]));
            responses
                .slice_mut(s![sweep, cell, ..])
                .assign(&trace.mapv(|value| 100.0 * (value / baseline - 1.0)));
        }

        let speed_end = end.min(input.dxcm.len());
        if speed_end > start {
            running
                .slice_mut(s![sweep, ..speed_end - start])
                .assign(&input.dxcm.slice(s![start..speed_end]));
        }
    }

    let response = params.response_range();
    let mut mean_cells = Array2::zeros((sweeps, cells));
    let mut pval = Array2::zeros((sweeps, cells));
    for sweep in 0..sweeps {
        for cell in 0..cells {
            let trace = responses.slice(s![sweep, cell, ..]);
            mean_cells[[sweep, cell]] = mean(trace.slice(s![response.clone()]));
            pval[[sweep, cell]] = anova_pvalue(&[
                trace.slice(s![..params.interlength]),
                trace.slice(s![response.clone()]),
            ]);
        }
    }
    let mean_running = Array1::from_shape_fn(sweeps, |sweep| {
        nan_mean(running.slice(s![sweep, response.clone()]))
    });

    Ok(SweepProducts {
        sweep_response: SweepResponse {
            cells: responses,
            running,
        },
        mean_sweep_response: MeanSweepResponse {
            cells: mean_cells,
            running: mean_running,
        },
        pval,
    })
}

pub(crate) fn mean(values: ArrayView1<'_, f64>) -> f64 {
    values.mean().unwrap_or(f64::NAN)
}

pub(crate) fn nan_mean(values: ArrayView1<'_, f64>) -> f64 {
    let (sum, count) = values
        .iter()
        .filter(|value| !value.is_nan())
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// p-value of a one-way ANOVA across `groups`; NaN when the test is undefined.
pub(crate) fn anova_pvalue(groups: &[ArrayView1<'_, f64>]) -> f64 {
    let groups: Vec<Vec<f32>> = groups
        .iter()
        .map(|group| group.iter().map(|value| *value as f32).collect())
        .collect();
    match f_oneway(&groups) {
        Ok(result) if result.pvalue.is_finite() => f64::from(result.pvalue),
        _ => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, Array1};
    use observatory_core::SweepRow;

    fn params() -> SweepParams {
        SweepParams {
            sweeplength: 2,
            interlength: 2,
            extralength: 1,
        }
    }

    fn table(starts: &[usize]) -> StimulusTable {
        StimulusTable::new(
            starts
                .iter()
                .enumerate()
                .map(|(frame, &start)| SweepRow {
                    frame,
                    start,
                    end: start + 2,
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn window_spans_baseline_on_both_sides() {
        assert_eq!(params().window(), 6);
        assert_eq!(params().response_range(), 2..5);
    }

    #[test]
    fn responses_are_percent_change_from_baseline() {
        // baseline 10, response 15 then back to 10
        let celltraces = arr1(&[10.0, 10.0, 10.0, 15.0, 15.0, 15.0, 10.0, 10.0, 10.0, 10.0])
            .into_shape((1, 10))
            .unwrap();
        let dxcm = Array1::from_elem(10, 3.0);
        let stim_table = table(&[3]);

        let products = extract_sweep_response(&SweepInput {
            stim_table: &stim_table,
            celltraces: &celltraces,
            dxcm: &dxcm,
            params: params(),
        })
        .unwrap();

        let window = products.sweep_response.cells.slice(s![0, 0, ..]).to_vec();
        assert_eq!(window, vec![0.0, 0.0, 50.0, 50.0, 50.0, 0.0]);
        assert!((products.mean_sweep_response.cells[[0, 0]] - 50.0).abs() < 1e-9);
        assert_eq!(products.mean_sweep_response.running[0], 3.0);
    }

    #[test]
    fn running_window_is_nan_past_speed_trace() {
        let celltraces = Array2::from_elem((2, 12), 5.0);
        let dxcm = Array1::from_elem(7, 1.0);
        let stim_table = table(&[4]);

        let products = extract_sweep_response(&SweepInput {
            stim_table: &stim_table,
            celltraces: &celltraces,
            dxcm: &dxcm,
            params: params(),
        })
        .unwrap();

        let running = products.sweep_response.running.row(0).to_vec();
        assert_eq!(&running[..5], &[1.0; 5]);
        assert!(running[5].is_nan());
        assert_eq!(products.mean_sweep_response.running[0], 1.0);
    }

    #[test]
    fn sweep_too_close_to_start_is_rejected() {
        let celltraces = Array2::from_elem((1, 20), 5.0);
        let dxcm = Array1::from_elem(20, 0.0);
        let stim_table = table(&[1]);

        let err = extract_sweep_response(&SweepInput {
            stim_table: &stim_table,
            celltraces: &celltraces,
            dxcm: &dxcm,
            params: params(),
        })
        .unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::WindowOutOfRange {
                sweep: 0,
                start: 1,
                ..
            }
        ));
    }

    #[test]
    fn sweep_past_end_is_rejected() {
        let celltraces = Array2::from_elem((1, 10), 5.0);
        let dxcm = Array1::from_elem(10, 0.0);
        let stim_table = table(&[3, 7]);

        let err = extract_sweep_response(&SweepInput {
            stim_table: &stim_table,
            celltraces: &celltraces,
            dxcm: &dxcm,
            params: params(),
        })
        .unwrap_err();
        assert!(matches!(err, AnalysisError::WindowOutOfRange { sweep: 1, .. }));
    }

    #[test]
    fn strong_response_has_small_pvalue() {
        let baseline = arr1(&[1.0, 1.1, 0.9, 1.0, 1.05, 0.95]);
        let response = arr1(&[5.0, 5.1, 4.9, 5.0, 5.05, 4.95]);
        let noise = arr1(&[1.0, 1.1, 0.9, 1.0, 1.05, 0.95]);

        let strong = anova_pvalue(&[baseline.view(), response.view()]);
        let flat = anova_pvalue(&[baseline.view(), noise.view()]);
        assert!(strong < 0.01, "strong response p = {strong}");
        assert!(flat > 0.5, "flat response p = {flat}");
    }

    #[test]
    fn nan_mean_skips_gaps() {
        assert_eq!(nan_mean(arr1(&[1.0, f64::NAN, 3.0]).view()), 2.0);
        assert!(nan_mean(arr1(&[f64::NAN]).view()).is_nan());
    }
}
