#![deny(unsafe_code)]

use analysis_config::AnalysisConfig;
use log::{debug, info};
use ndarray::{s, Array2, Array3};
use observatory_core::{StimulusKind, StimulusTable};
use observatory_dataset::DataSet;
use stimulus_analysis::{
    field_state, AnalysisError, DefaultResponseModel, FieldState, LazyField, MeanSweepResponse,
    ResponseModel, StimulusAnalysis, SweepParams, SweepResponse,
};

pub mod receptive_field;

pub use receptive_field::{
    compute_receptive_field, PeakLocation, PixelPeak, ReceptiveField, OFF, ON,
};

/// Receptive-field mapping from a locally sparse noise session.
///
/// Reading any product pulls in whatever it depends on: the stimulus table
/// and template, then the sweep responses, then the receptive field.
pub struct LocallySparseNoise<D, M = DefaultResponseModel> {
    base: StimulusAnalysis<D, M>,
    stimulus: StimulusKind,

    stim_table: LazyField<StimulusTable>,
    lsn: LazyField<Array3<u8>>,
    lsn_mask: LazyField<Array2<bool>>,
    sweeplength: LazyField<usize>,
    interlength: LazyField<usize>,
    extralength: LazyField<usize>,
    receptive_field: LazyField<ReceptiveField>,
}

impl<D: DataSet> LocallySparseNoise<D> {
    pub fn new(dataset: D, stimulus: StimulusKind) -> Result<Self, AnalysisError> {
        Self::with_model(
            dataset,
            stimulus,
            DefaultResponseModel,
            AnalysisConfig::default(),
        )
    }
}

impl<D: DataSet, M: ResponseModel> LocallySparseNoise<D, M> {
    pub fn with_model(
        dataset: D,
        stimulus: StimulusKind,
        model: M,
        config: AnalysisConfig,
    ) -> Result<Self, AnalysisError> {
        if !stimulus.is_locally_sparse_noise() {
            return Err(AnalysisError::UnsupportedStimulus { stimulus });
        }
        Ok(Self {
            base: StimulusAnalysis::with_model(dataset, model, config),
            stimulus,
            stim_table: LazyField::preload("stim_table"),
            lsn: LazyField::preload("LSN"),
            lsn_mask: LazyField::preload("LSN_mask"),
            sweeplength: LazyField::preload("sweeplength"),
            interlength: LazyField::preload("interlength"),
            extralength: LazyField::preload("extralength"),
            receptive_field: LazyField::preload("receptive_field"),
        })
    }

    pub fn stimulus(&self) -> StimulusKind {
        self.stimulus
    }

    /// Session-wide products (traces, ids, running speed, speed tuning).
    pub fn base(&self) -> &StimulusAnalysis<D, M> {
        &self.base
    }

    pub fn dataset(&self) -> &D {
        self.base.dataset()
    }

    pub fn stim_table(&self) -> Result<&StimulusTable, AnalysisError> {
        self.populate_stimulus_table()?;
        self.stim_table.require()
    }

    /// Template movie, `frames x rows x cols`.
    pub fn lsn(&self) -> Result<&Array3<u8>, AnalysisError> {
        self.populate_stimulus_table()?;
        self.lsn.require()
    }

    pub fn lsn_mask(&self) -> Result<&Array2<bool>, AnalysisError> {
        self.populate_stimulus_table()?;
        self.lsn_mask.require()
    }

    pub fn sweeplength(&self) -> Result<usize, AnalysisError> {
        self.populate_stimulus_table()?;
        self.sweeplength.require().copied()
    }

    pub fn interlength(&self) -> Result<usize, AnalysisError> {
        self.populate_stimulus_table()?;
        self.interlength.require().copied()
    }

    pub fn extralength(&self) -> Result<usize, AnalysisError> {
        self.populate_stimulus_table()?;
        self.extralength.require().copied()
    }

    pub fn sweep_params(&self) -> Result<SweepParams, AnalysisError> {
        Ok(SweepParams {
            sweeplength: self.sweeplength()?,
            interlength: self.interlength()?,
            extralength: self.extralength()?,
        })
    }

    pub fn sweep_response(&self) -> Result<&SweepResponse, AnalysisError> {
        let params = self.sweep_params()?;
        self.base.sweep_response_for(self.stim_table()?, params)
    }

    pub fn mean_sweep_response(&self) -> Result<&MeanSweepResponse, AnalysisError> {
        let params = self.sweep_params()?;
        self.base.mean_sweep_response_for(self.stim_table()?, params)
    }

    pub fn pval(&self) -> Result<&Array2<f64>, AnalysisError> {
        let params = self.sweep_params()?;
        self.base.pval_for(self.stim_table()?, params)
    }

    pub fn receptive_field(&self) -> Result<&ReceptiveField, AnalysisError> {
        self.receptive_field.get_or_try_fill(|| {
            let mean_sweep = self.mean_sweep_response()?;
            let cell_ids = self.base.cell_id()?.to_vec();
            let roi_ids = self.base.roi_id()?.to_vec();
            let cells = self.base.numbercells()?;
            if cell_ids.len() != cells || roi_ids.len() != cells {
                return Err(AnalysisError::ShapeMismatch {
                    message: format!(
                        "{} cell ids and {} roi ids for {cells} cells",
                        cell_ids.len(),
                        roi_ids.len()
                    ),
                });
            }

            let (sweeps, columns) = mean_sweep.cells.dim();
            if columns != cells || mean_sweep.running.len() != sweeps {
                return Err(AnalysisError::ShapeMismatch {
                    message: format!(
                        "mean sweep response is {:?} with {} running rows for {cells} cells",
                        mean_sweep.cells.dim(),
                        mean_sweep.running.len()
                    ),
                });
            }
            // running speed rides along as one extra column
            let mut responses = Array2::zeros((sweeps, cells + 1));
            responses.slice_mut(s![.., ..cells]).assign(&mean_sweep.cells);
            responses.column_mut(cells).assign(&mean_sweep.running);

            debug!("computing {} receptive field", self.stimulus);
            let all = compute_receptive_field(
                self.stim_table()?,
                self.lsn()?,
                self.lsn_mask()?,
                &responses,
                self.base.config().receptive_field.mask_off_screen,
            )?;
            Ok(ReceptiveField {
                maps: all.slice(s![.., .., ..cells, ..]).to_owned(),
                running: all.slice(s![.., .., cells, ..]).to_owned(),
                cell_ids,
                roi_ids,
            })
        })
    }

    /// Strongest ON and OFF pixel for `cell`.
    pub fn peak_location(&self, cell: usize) -> Result<PeakLocation, AnalysisError> {
        let field = self.receptive_field()?;
        field
            .peak_location(cell)
            .ok_or_else(|| AnalysisError::InvalidParameter {
                name: "cell",
                message: format!("{cell} is past the last of {} cells", field.cell_count()),
            })
    }

    /// States of the stimulus-specific fields followed by the session-wide ones.
    pub fn field_states(&self) -> Vec<(&'static str, FieldState)> {
        let mut states = vec![
            field_state(&self.stim_table),
            field_state(&self.lsn),
            field_state(&self.lsn_mask),
            field_state(&self.sweeplength),
            field_state(&self.interlength),
            field_state(&self.extralength),
            field_state(&self.receptive_field),
        ];
        states.extend(self.base.field_states());
        states
    }

    pub fn field_state(&self, name: &str) -> Option<FieldState> {
        self.field_states()
            .into_iter()
            .find(|(field, _)| *field == name)
            .map(|(_, state)| state)
    }

    fn populate_stimulus_table(&self) -> Result<(), AnalysisError> {
        if !self.stim_table.is_preload() {
            return Ok(());
        }
        let config = self.base.config();
        debug!("loading {} stimulus table and template", self.stimulus);
        let dataset = self.base.dataset();
        let stim_table = dataset.get_stimulus_table(self.stimulus)?;
        let sweeplength = stim_table
            .sweep_length()
            .ok_or(AnalysisError::EmptyStimulusTable {
                stimulus: self.stimulus,
            })?;
        let template = dataset.get_locally_sparse_noise_stimulus_template(
            self.stimulus,
            config.receptive_field.mask_off_screen,
        )?;
        let (frames, mask) = template.into_parts();

        let interlength = config.sweep.interlength_factor * sweeplength;
        let extralength = config.sweep.extralength_factor * sweeplength;
        info!(
            "{}: {} sweeps of {sweeplength} frames over a {:?} grid",
            self.stimulus,
            stim_table.len(),
            mask.dim()
        );

        self.sweeplength.fill(sweeplength)?;
        self.interlength.fill(interlength)?;
        self.extralength.fill(extralength)?;
        self.lsn.fill(frames)?;
        self.lsn_mask.fill(mask)?;
        self.stim_table.fill(stim_table)?;
        Ok(())
    }
}
