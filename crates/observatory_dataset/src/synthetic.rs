//! Seeded imaging sessions with planted receptive fields.
//!
//! A session shows one sparse noise frame per sweep, back to back, followed
//! by a spontaneous (gray screen) block. Cells listed in
//! [`SyntheticSession::planted`] respond whenever their pixel takes their
//! polarity; every cell carries uniform noise and a small running-speed
//! component.

use ndarray::{Array1, Array2, Array3};
use observatory_core::{
    RunningSpeed, ShapeError, StimulusKind, StimulusTable, StimulusTemplate, SweepRow, TraceSet,
    LSN_GRAY, LSN_OFF, LSN_ON,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{DataSet, DatasetError};

const FRAME_RATE_HZ: f64 = 30.0;
const LEAD_FRAMES: usize = 40;
const TAIL_FRAMES: usize = 40;
const TRAILING_FRAMES: usize = 10;
const NAN_SPEED_EVERY: usize = 97;
const CELL_ID_BASE: u64 = 517_000_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionParams {
    pub stimulus: StimulusKind,
    pub cells: usize,
    pub planted_cells: usize,
    pub sweeps: usize,
    pub sweep_frames: usize,
    pub spots_per_frame: usize,
    pub spontaneous_frames: usize,
    pub baseline: f64,
    pub response_gain: f64,
    pub noise: f64,
    pub running_gain: f64,
    pub seed: u64,
}

impl SessionParams {
    pub fn for_stimulus(stimulus: StimulusKind) -> Self {
        let (rows, cols) = stimulus.template_shape().unwrap_or((8, 14));
        Self {
            stimulus,
            cells: 6,
            planted_cells: 4,
            sweeps: 600,
            sweep_frames: 7,
            spots_per_frame: (rows * cols / 18).max(1),
            spontaneous_frames: 2000,
            baseline: 100.0,
            response_gain: 0.5,
            noise: 2.0,
            running_gain: 0.2,
            seed: 7,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// A cell's planted field: the pixel and polarity it responds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlantedField {
    pub cell: usize,
    pub row: usize,
    pub col: usize,
    pub polarity: u8,
}

#[derive(Debug, Clone)]
pub struct SyntheticSession {
    pub params: SessionParams,
    pub template: StimulusTemplate,
    pub stim_table: StimulusTable,
    pub spontaneous: StimulusTable,
    pub corrected: TraceSet,
    pub dff: TraceSet,
    pub running: RunningSpeed,
    pub roi_ids: Vec<String>,
    pub cell_ids: Vec<Option<u64>>,
    pub planted: Vec<PlantedField>,
}

impl SyntheticSession {
    pub fn generate(params: SessionParams) -> Result<Self, ShapeError> {
        let (rows, cols) = params.stimulus.template_shape().unwrap_or((8, 14));
        let mut rng = StdRng::seed_from_u64(params.seed);

        let template = build_template(&mut rng, &params, rows, cols)?;
        let planted = plant_fields(&params, rows, cols);

        let sweeps_end = LEAD_FRAMES + params.sweeps * params.sweep_frames;
        let spontaneous_start = sweeps_end + TAIL_FRAMES;
        let spontaneous_end = spontaneous_start + params.spontaneous_frames;
        let total_frames = spontaneous_end + TRAILING_FRAMES;

        let stim_table = StimulusTable::new(
            (0..params.sweeps)
                .map(|sweep| {
                    let start = LEAD_FRAMES + sweep * params.sweep_frames;
                    SweepRow {
                        frame: sweep,
                        start,
                        end: start + params.sweep_frames,
                    }
                })
                .collect(),
        )?;
        let spontaneous = StimulusTable::new(vec![SweepRow {
            frame: 0,
            start: spontaneous_start,
            end: spontaneous_end,
        }])?;

        let timestamps = Array1::from_shape_fn(total_frames, |frame| frame as f64 / FRAME_RATE_HZ);
        let dxcm = running_speed(&mut rng, total_frames);

        let mut f0 = Array1::zeros(params.cells);
        let mut corrected = Array2::zeros((params.cells, total_frames));
        for cell in 0..params.cells {
            let baseline = params.baseline + 10.0 * cell as f64;
            f0[cell] = baseline;
            for frame in 0..total_frames {
                let speed = if dxcm[frame].is_nan() { 0.0 } else { dxcm[frame] };
                corrected[[cell, frame]] = baseline
                    + params.noise * rng.gen_range(-1.0..1.0)
                    + params.running_gain * speed;
            }
        }

        let frames = template.frames();
        for row in stim_table.rows() {
            for field in &planted {
                if frames[[row.frame, field.row, field.col]] != field.polarity {
                    continue;
                }
                let amplitude = params.response_gain * f0[field.cell];
                let onset = row.start + 1;
                let offset = (row.end + params.sweep_frames / 2).min(total_frames);
                for frame in onset..offset {
                    corrected[[field.cell, frame]] += amplitude;
                }
            }
        }

        let dff_values = Array2::from_shape_fn((params.cells, total_frames), |(cell, frame)| {
            (corrected[[cell, frame]] - f0[cell]) / f0[cell]
        });

        let roi_ids = (0..params.cells).map(|cell| format!("roi_{cell}")).collect();
        let cell_ids = (0..params.cells)
            .map(|cell| Some(CELL_ID_BASE + cell as u64))
            .collect();

        Ok(Self {
            params,
            template,
            stim_table,
            spontaneous,
            corrected: TraceSet::new(timestamps.clone(), corrected)?,
            dff: TraceSet::new(timestamps.clone(), dff_values)?,
            running: RunningSpeed::new(dxcm, timestamps)?,
            roi_ids,
            cell_ids,
            planted,
        })
    }

    pub fn planted_for(&self, cell: usize) -> Option<&PlantedField> {
        self.planted.iter().find(|field| field.cell == cell)
    }
}

fn build_template(
    rng: &mut StdRng,
    params: &SessionParams,
    rows: usize,
    cols: usize,
) -> Result<StimulusTemplate, ShapeError> {
    let mut frames = Array3::from_elem((params.sweeps, rows, cols), LSN_GRAY);
    for frame in 0..params.sweeps {
        for _ in 0..params.spots_per_frame {
            let row = rng.gen_range(0..rows);
            let col = rng.gen_range(0..cols);
            frames[[frame, row, col]] = if rng.gen_bool(0.5) { LSN_ON } else { LSN_OFF };
        }
    }
    // outermost columns fall off the monitor
    let mask = Array2::from_shape_fn((rows, cols), |(_, col)| col != 0 && col + 1 != cols);
    StimulusTemplate::new(frames, mask)
}

fn plant_fields(params: &SessionParams, rows: usize, cols: usize) -> Vec<PlantedField> {
    (0..params.planted_cells.min(params.cells))
        .map(|cell| PlantedField {
            cell,
            row: 1 + (cell * 3) % (rows - 2),
            col: 1 + (cell * 5) % (cols - 2),
            polarity: if cell % 2 == 0 { LSN_ON } else { LSN_OFF },
        })
        .collect()
}

fn running_speed(rng: &mut StdRng, frames: usize) -> Array1<f64> {
    let mut speed = 5.0_f64;
    Array1::from_shape_fn(frames, |frame| {
        speed = (speed + rng.gen_range(-1.0..1.0)).clamp(0.0, 40.0);
        if frame % NAN_SPEED_EVERY == NAN_SPEED_EVERY - 1 {
            f64::NAN
        } else {
            speed
        }
    })
}

impl DataSet for SyntheticSession {
    fn get_corrected_fluorescence_traces(&self) -> Result<TraceSet, DatasetError> {
        Ok(self.corrected.clone())
    }

    fn get_roi_ids(&self) -> Result<Vec<String>, DatasetError> {
        Ok(self.roi_ids.clone())
    }

    fn get_cell_specimen_ids(&self) -> Result<Vec<Option<u64>>, DatasetError> {
        Ok(self.cell_ids.clone())
    }

    fn get_dff_traces(&self) -> Result<TraceSet, DatasetError> {
        Ok(self.dff.clone())
    }

    fn get_running_speed(&self) -> Result<RunningSpeed, DatasetError> {
        Ok(self.running.clone())
    }

    fn get_stimulus_table(&self, stimulus: StimulusKind) -> Result<StimulusTable, DatasetError> {
        if stimulus == StimulusKind::Spontaneous {
            Ok(self.spontaneous.clone())
        } else if stimulus == self.params.stimulus {
            Ok(self.stim_table.clone())
        } else {
            Err(DatasetError::MissingStimulus { stimulus })
        }
    }

    fn get_locally_sparse_noise_stimulus_template(
        &self,
        stimulus: StimulusKind,
        mask_off_screen: bool,
    ) -> Result<StimulusTemplate, DatasetError> {
        if stimulus != self.params.stimulus {
            return Err(DatasetError::MissingStimulus { stimulus });
        }
        if mask_off_screen {
            Ok(self.template.clone())
        } else {
            Ok(StimulusTemplate::unmasked(self.template.frames().clone()))
        }
    }
}
