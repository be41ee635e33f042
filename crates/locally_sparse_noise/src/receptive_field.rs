use ndarray::{s, Array2, Array3, Array4, ArrayView2};
use observatory_core::digest::{digest_array, digest_meta, RECEPTIVE_FIELD_DIGEST_DOMAIN};
use observatory_core::{StimulusTable, LSN_OFF, LSN_ON};
use stimulus_analysis::AnalysisError;

pub const ON: usize = 0;
pub const OFF: usize = 1;

/// Mean sweep response by pixel and polarity, one map pair per cell.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceptiveField {
    /// `rows x cols x cells x 2`, indexed by [`ON`] / [`OFF`] last.
    pub maps: Array4<f64>,
    /// `rows x cols x 2` mean running speed over the same sweeps.
    pub running: Array3<f64>,
    pub cell_ids: Vec<Option<u64>>,
    pub roi_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelPeak {
    pub row: usize,
    pub col: usize,
    pub response: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakLocation {
    pub on: Option<PixelPeak>,
    pub off: Option<PixelPeak>,
}

impl ReceptiveField {
    pub fn grid(&self) -> (usize, usize) {
        let (rows, cols, _, _) = self.maps.dim();
        (rows, cols)
    }

    pub fn cell_count(&self) -> usize {
        self.maps.dim().2
    }

    pub fn on(&self, cell: usize) -> ArrayView2<'_, f64> {
        self.maps.slice(s![.., .., cell, ON])
    }

    pub fn off(&self, cell: usize) -> ArrayView2<'_, f64> {
        self.maps.slice(s![.., .., cell, OFF])
    }

    /// Strongest ON and OFF pixel for `cell`; `None` past the last cell.
    pub fn peak_location(&self, cell: usize) -> Option<PeakLocation> {
        if cell >= self.cell_count() {
            return None;
        }
        Some(PeakLocation {
            on: strongest_pixel(self.on(cell)),
            off: strongest_pixel(self.off(cell)),
        })
    }

    pub fn running_on(&self) -> ArrayView2<'_, f64> {
        self.running.slice(s![.., .., ON])
    }

    pub fn running_off(&self) -> ArrayView2<'_, f64> {
        self.running.slice(s![.., .., OFF])
    }

    /// Covers the cell maps and the running-speed maps.
    pub fn digest(&self) -> [u8; 32] {
        let mut parts = Vec::with_capacity(64);
        parts.extend_from_slice(&digest_array(RECEPTIVE_FIELD_DIGEST_DOMAIN, &self.maps));
        parts.extend_from_slice(&digest_array(RECEPTIVE_FIELD_DIGEST_DOMAIN, &self.running));
        digest_meta(RECEPTIVE_FIELD_DIGEST_DOMAIN, &parts)
    }
}

fn strongest_pixel(map: ArrayView2<'_, f64>) -> Option<PixelPeak> {
    map.indexed_iter()
        .filter(|(_, value)| !value.is_nan())
        .fold(None, |best: Option<PixelPeak>, ((row, col), value)| match best {
            Some(peak) if peak.response >= *value => Some(peak),
            _ => Some(PixelPeak {
                row,
                col,
                response: *value,
            }),
        })
}

/// Averages `mean_sweep` (`sweeps x cells`) over the sweeps that showed each
/// pixel ON or OFF. Pixels never shown in a polarity are NaN, as are
/// off-screen pixels when `mask_off_screen` is set.
pub fn compute_receptive_field(
    stim_table: &StimulusTable,
    template: &Array3<u8>,
    mask: &Array2<bool>,
    mean_sweep: &Array2<f64>,
    mask_off_screen: bool,
) -> Result<Array4<f64>, AnalysisError> {
    let (frames, rows, cols) = template.dim();
    let (sweeps, cells) = mean_sweep.dim();
    if sweeps != stim_table.len() {
        return Err(AnalysisError::ShapeMismatch {
            message: format!(
                "mean sweep response has {sweeps} rows for {} sweeps",
                stim_table.len()
            ),
        });
    }
    if mask.dim() != (rows, cols) {
        return Err(AnalysisError::ShapeMismatch {
            message: format!(
                "mask is {:?} but template frames are {:?}",
                mask.dim(),
                (rows, cols)
            ),
        });
    }
    if let Some(row) = stim_table.rows().iter().find(|row| row.frame >= frames) {
        return Err(AnalysisError::ShapeMismatch {
            message: format!(
                "sweep shows template frame {} but the template has {frames} frames",
                row.frame
            ),
        });
    }

    let mut maps = Array4::from_elem((rows, cols, cells, 2), f64::NAN);
    for r in 0..rows {
        for c in 0..cols {
            if mask_off_screen && !mask[[r, c]] {
                continue;
            }
            for (polarity, value) in [(ON, LSN_ON), (OFF, LSN_OFF)] {
                let shown: Vec<usize> = stim_table
                    .rows()
                    .iter()
                    .enumerate()
                    .filter(|(_, row)| template[[row.frame, r, c]] == value)
                    .map(|(sweep, _)| sweep)
                    .collect();
                if shown.is_empty() {
                    continue;
                }
                for cell in 0..cells {
                    let total: f64 = shown.iter().map(|sweep| mean_sweep[[*sweep, cell]]).sum();
                    maps[[r, c, cell, polarity]] = total / shown.len() as f64;
                }
            }
        }
    }
    Ok(maps)
}
