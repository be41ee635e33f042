#![deny(unsafe_code)]

use analysis_config::AnalysisConfig;
use log::debug;
use ndarray::{Array1, Array2, Array3};
use observatory_core::{StimulusKind, StimulusTable};
use observatory_dataset::{DataSet, DatasetError};
use thiserror::Error;

pub mod lazy;
pub mod speed;
pub mod sweep;

pub use lazy::{FieldState, LazyField};
pub use speed::{compute_speed_tuning, PeakRun, SpeedInput, SpeedTuning};
pub use sweep::{
    extract_sweep_response, MeanSweepResponse, SweepInput, SweepParams, SweepProducts,
    SweepResponse,
};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("field {field} was read before it was populated")]
    Unpopulated { field: &'static str },
    #[error("field {field} is already loaded")]
    AlreadyLoaded { field: &'static str },
    #[error("{stimulus} is not a locally sparse noise stimulus")]
    UnsupportedStimulus { stimulus: StimulusKind },
    #[error("stimulus table for {stimulus} has no sweeps")]
    EmptyStimulusTable { stimulus: StimulusKind },
    #[error(
        "sweep {sweep} at frame {start} needs {interlength} baseline frames and a \
         {window}-frame window within {frames} recorded frames"
    )]
    WindowOutOfRange {
        sweep: usize,
        start: usize,
        interlength: usize,
        window: usize,
        frames: usize,
    },
    #[error("shape mismatch: {message}")]
    ShapeMismatch { message: String },
    #[error("invalid {name}: {message}")]
    InvalidParameter {
        name: &'static str,
        message: String,
    },
}

/// The numeric steps an analysis delegates; swap in a different model to
/// change how responses are derived without touching the caching.
pub trait ResponseModel {
    fn sweep_response(&self, input: &SweepInput<'_>) -> Result<SweepProducts, AnalysisError>;

    fn speed_tuning(&self, input: &SpeedInput<'_>) -> Result<SpeedTuning, AnalysisError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResponseModel;

impl ResponseModel for DefaultResponseModel {
    fn sweep_response(&self, input: &SweepInput<'_>) -> Result<SweepProducts, AnalysisError> {
        extract_sweep_response(input)
    }

    fn speed_tuning(&self, input: &SpeedInput<'_>) -> Result<SpeedTuning, AnalysisError> {
        compute_speed_tuning(input)
    }
}

impl<M: ResponseModel + ?Sized> ResponseModel for &M {
    fn sweep_response(&self, input: &SweepInput<'_>) -> Result<SweepProducts, AnalysisError> {
        (**self).sweep_response(input)
    }

    fn speed_tuning(&self, input: &SpeedInput<'_>) -> Result<SpeedTuning, AnalysisError> {
        (**self).speed_tuning(input)
    }
}

/// Products shared by every stimulus-specific analysis of one session.
///
/// Each field is fetched or computed on first read and cached. Fields that
/// come out of the same dataset call or the same computation are filled
/// together, so the dataset sees each accessor at most once.
pub struct StimulusAnalysis<D, M = DefaultResponseModel> {
    dataset: D,
    model: M,
    config: AnalysisConfig,

    timestamps: LazyField<Array1<f64>>,
    celltraces: LazyField<Array2<f64>>,
    numbercells: LazyField<usize>,
    acquisition_rate: LazyField<f64>,
    roi_id: LazyField<Vec<String>>,
    cell_id: LazyField<Vec<Option<u64>>>,
    dfftraces: LazyField<Array2<f64>>,
    dxcm: LazyField<Array1<f64>>,
    dxtime: LazyField<Array1<f64>>,

    sweep_response: LazyField<SweepResponse>,
    mean_sweep_response: LazyField<MeanSweepResponse>,
    pval: LazyField<Array2<f64>>,

    binned_dx_sp: LazyField<Array2<f64>>,
    binned_cells_sp: LazyField<Array3<f64>>,
    binned_dx_vis: LazyField<Array2<f64>>,
    binned_cells_vis: LazyField<Array3<f64>>,
    peak_run: LazyField<Vec<PeakRun>>,
}

impl<D: DataSet> StimulusAnalysis<D> {
    pub fn new(dataset: D) -> Self {
        Self::with_model(dataset, DefaultResponseModel, AnalysisConfig::default())
    }
}

impl<D: DataSet, M: ResponseModel> StimulusAnalysis<D, M> {
    pub fn with_model(dataset: D, model: M, config: AnalysisConfig) -> Self {
        Self {
            dataset,
            model,
            config,
            timestamps: LazyField::preload("timestamps"),
            celltraces: LazyField::preload("celltraces"),
            numbercells: LazyField::preload("numbercells"),
            acquisition_rate: LazyField::preload("acquisition_rate"),
            roi_id: LazyField::preload("roi_id"),
            cell_id: LazyField::preload("cell_id"),
            dfftraces: LazyField::preload("dfftraces"),
            dxcm: LazyField::preload("dxcm"),
            dxtime: LazyField::preload("dxtime"),
            sweep_response: LazyField::preload("sweep_response"),
            mean_sweep_response: LazyField::preload("mean_sweep_response"),
            pval: LazyField::preload("pval"),
            binned_dx_sp: LazyField::preload("binned_dx_sp"),
            binned_cells_sp: LazyField::preload("binned_cells_sp"),
            binned_dx_vis: LazyField::preload("binned_dx_vis"),
            binned_cells_vis: LazyField::preload("binned_cells_vis"),
            peak_run: LazyField::preload("peak_run"),
        }
    }

    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn timestamps(&self) -> Result<&Array1<f64>, AnalysisError> {
        self.populate_traces()?;
        self.timestamps.require()
    }

    pub fn celltraces(&self) -> Result<&Array2<f64>, AnalysisError> {
        self.populate_traces()?;
        self.celltraces.require()
    }

    pub fn numbercells(&self) -> Result<usize, AnalysisError> {
        self.populate_traces()?;
        self.numbercells.require().copied()
    }

    /// Frames per second, from the mean timestamp spacing.
    pub fn acquisition_rate(&self) -> Result<f64, AnalysisError> {
        self.populate_traces()?;
        self.acquisition_rate.require().copied()
    }

    pub fn roi_id(&self) -> Result<&[String], AnalysisError> {
        self.roi_id
            .get_or_try_fill(|| {
                debug!("loading roi ids");
                Ok(self.dataset.get_roi_ids()?)
            })
            .map(Vec::as_slice)
    }

    pub fn cell_id(&self) -> Result<&[Option<u64>], AnalysisError> {
        self.cell_id
            .get_or_try_fill(|| {
                debug!("loading cell specimen ids");
                Ok(self.dataset.get_cell_specimen_ids()?)
            })
            .map(Vec::as_slice)
    }

    pub fn dfftraces(&self) -> Result<&Array2<f64>, AnalysisError> {
        self.dfftraces.get_or_try_fill(|| {
            debug!("loading dF/F traces");
            Ok(self.dataset.get_dff_traces()?.traces)
        })
    }

    pub fn dxcm(&self) -> Result<&Array1<f64>, AnalysisError> {
        self.populate_running_speed()?;
        self.dxcm.require()
    }

    pub fn dxtime(&self) -> Result<&Array1<f64>, AnalysisError> {
        self.populate_running_speed()?;
        self.dxtime.require()
    }

    /// Sweep windows for `stim_table`; the first call fixes the result for
    /// the lifetime of the analysis. Loading them also loads dF/F and the
    /// speed tuning group.
    pub fn sweep_response_for(
        &self,
        stim_table: &StimulusTable,
        params: SweepParams,
    ) -> Result<&SweepResponse, AnalysisError> {
        self.populate_sweep_response(stim_table, params)?;
        self.sweep_response.require()
    }

    pub fn mean_sweep_response_for(
        &self,
        stim_table: &StimulusTable,
        params: SweepParams,
    ) -> Result<&MeanSweepResponse, AnalysisError> {
        self.populate_sweep_response(stim_table, params)?;
        self.mean_sweep_response.require()
    }

    pub fn pval_for(
        &self,
        stim_table: &StimulusTable,
        params: SweepParams,
    ) -> Result<&Array2<f64>, AnalysisError> {
        self.populate_sweep_response(stim_table, params)?;
        self.pval.require()
    }

    pub fn binned_dx_sp(&self) -> Result<&Array2<f64>, AnalysisError> {
        self.populate_speed_tuning()?;
        self.binned_dx_sp.require()
    }

    pub fn binned_cells_sp(&self) -> Result<&Array3<f64>, AnalysisError> {
        self.populate_speed_tuning()?;
        self.binned_cells_sp.require()
    }

    pub fn binned_dx_vis(&self) -> Result<&Array2<f64>, AnalysisError> {
        self.populate_speed_tuning()?;
        self.binned_dx_vis.require()
    }

    pub fn binned_cells_vis(&self) -> Result<&Array3<f64>, AnalysisError> {
        self.populate_speed_tuning()?;
        self.binned_cells_vis.require()
    }

    pub fn peak_run(&self) -> Result<&[PeakRun], AnalysisError> {
        self.populate_speed_tuning()?;
        self.peak_run.require().map(Vec::as_slice)
    }

    pub fn field_states(&self) -> Vec<(&'static str, FieldState)> {
        [
            field_state(&self.timestamps),
            field_state(&self.celltraces),
            field_state(&self.numbercells),
            field_state(&self.acquisition_rate),
            field_state(&self.roi_id),
            field_state(&self.cell_id),
            field_state(&self.dfftraces),
            field_state(&self.dxcm),
            field_state(&self.dxtime),
            field_state(&self.sweep_response),
            field_state(&self.mean_sweep_response),
            field_state(&self.pval),
            field_state(&self.binned_dx_sp),
            field_state(&self.binned_cells_sp),
            field_state(&self.binned_dx_vis),
            field_state(&self.binned_cells_vis),
            field_state(&self.peak_run),
        ]
        .into()
    }

    fn populate_traces(&self) -> Result<(), AnalysisError> {
        if !self.celltraces.is_preload() {
            return Ok(());
        }
        debug!("loading corrected fluorescence traces");
        let traces = self.dataset.get_corrected_fluorescence_traces()?;
        let rate = acquisition_rate(&traces.timestamps)?;
        let cells = traces.cell_count();

        self.numbercells.fill(cells)?;
        self.acquisition_rate.fill(rate)?;
        self.timestamps.fill(traces.timestamps)?;
        self.celltraces.fill(traces.traces)?;
        debug!("loaded {cells} cells at {rate:.2} Hz");
        Ok(())
    }

    fn populate_running_speed(&self) -> Result<(), AnalysisError> {
        if !self.dxcm.is_preload() {
            return Ok(());
        }
        debug!("loading running speed");
        let running = self.dataset.get_running_speed()?;
        self.dxcm.fill(running.dxcm)?;
        self.dxtime.fill(running.dxtime)?;
        Ok(())
    }

    fn populate_sweep_response(
        &self,
        stim_table: &StimulusTable,
        params: SweepParams,
    ) -> Result<(), AnalysisError> {
        if !self.sweep_response.is_preload() {
            return Ok(());
        }
        // a sweep analysis carries the session-wide dF/F and speed tuning with it
        self.populate_speed_tuning()?;
        let celltraces = self.celltraces()?;
        let dxcm = self.dxcm()?;
        debug!(
            "computing sweep response for {} sweeps ({:?})",
            stim_table.len(),
            params
        );
        let products = self.model.sweep_response(&SweepInput {
            stim_table,
            celltraces,
            dxcm,
            params,
        })?;
        check_sweep_products(&products, stim_table.len(), celltraces.nrows())?;

        self.sweep_response.fill(products.sweep_response)?;
        self.mean_sweep_response.fill(products.mean_sweep_response)?;
        self.pval.fill(products.pval)?;
        Ok(())
    }

    fn populate_speed_tuning(&self) -> Result<(), AnalysisError> {
        if !self.peak_run.is_preload() {
            return Ok(());
        }
        let dfftraces = self.dfftraces()?;
        let dxcm = self.dxcm()?;
        debug!("loading spontaneous stimulus table");
        let spontaneous = self.dataset.get_stimulus_table(StimulusKind::Spontaneous)?;
        let binsize = self.config.speed_tuning.binsize;
        debug!("computing speed tuning with {binsize}-frame bins");
        let tuning = self.model.speed_tuning(&SpeedInput {
            dfftraces,
            dxcm,
            spontaneous: &spontaneous,
            binsize,
        })?;
        if tuning.peak_run.len() != dfftraces.nrows() {
            return Err(AnalysisError::ShapeMismatch {
                message: format!(
                    "speed tuning produced {} peak rows for {} cells",
                    tuning.peak_run.len(),
                    dfftraces.nrows()
                ),
            });
        }

        self.binned_dx_sp.fill(tuning.binned_dx_sp)?;
        self.binned_cells_sp.fill(tuning.binned_cells_sp)?;
        self.binned_dx_vis.fill(tuning.binned_dx_vis)?;
        self.binned_cells_vis.fill(tuning.binned_cells_vis)?;
        self.peak_run.fill(tuning.peak_run)?;
        Ok(())
    }
}

pub fn field_state<T>(field: &LazyField<T>) -> (&'static str, FieldState) {
    (field.name(), field.state())
}

fn acquisition_rate(timestamps: &Array1<f64>) -> Result<f64, AnalysisError> {
    if timestamps.len() < 2 {
        return Err(AnalysisError::ShapeMismatch {
            message: format!(
                "acquisition rate needs at least two timestamps, got {}",
                timestamps.len()
            ),
        });
    }
    let span = timestamps[timestamps.len() - 1] - timestamps[0];
    Ok((timestamps.len() - 1) as f64 / span)
}

fn check_sweep_products(
    products: &SweepProducts,
    sweeps: usize,
    cells: usize,
) -> Result<(), AnalysisError> {
    let expected = (sweeps, cells);
    let shapes = [
        ("sweep_response", {
            let (s, c, _) = products.sweep_response.cells.dim();
            (s, c)
        }),
        ("mean_sweep_response", products.mean_sweep_response.cells.dim()),
        ("pval", products.pval.dim()),
    ];
    for (name, shape) in shapes {
        if shape != expected {
            return Err(AnalysisError::ShapeMismatch {
                message: format!("{name} is {shape:?}, expected {expected:?} (sweeps, cells)"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;
    use observatory_dataset::{Accessor, MockDataSet, SessionParams, SyntheticSession};

    fn session() -> SyntheticSession {
        SyntheticSession::generate(SessionParams {
            sweeps: 30,
            spontaneous_frames: 300,
            ..SessionParams::for_stimulus(StimulusKind::LocallySparseNoise8Deg)
        })
        .unwrap()
    }

    fn config_with_binsize(binsize: usize) -> AnalysisConfig {
        let mut config = AnalysisConfig::default();
        config.speed_tuning.binsize = binsize;
        config
    }

    #[test]
    fn everything_starts_preload() {
        let analysis = StimulusAnalysis::new(MockDataSet::new(session()));
        assert!(analysis
            .field_states()
            .iter()
            .all(|(_, state)| *state == FieldState::Preload));
        assert!(analysis.dataset().calls().is_empty());
    }

    #[test]
    fn trace_group_loads_together_from_one_call() {
        let analysis = StimulusAnalysis::new(MockDataSet::new(session()));
        assert_eq!(analysis.numbercells().unwrap(), 6);

        let states = analysis.field_states();
        for name in ["timestamps", "celltraces", "numbercells", "acquisition_rate"] {
            assert!(
                states.contains(&(name, FieldState::Loaded)),
                "{name} should be loaded"
            );
        }
        assert!(states.contains(&("roi_id", FieldState::Preload)));

        analysis.celltraces().unwrap();
        analysis.timestamps().unwrap();
        analysis
            .dataset()
            .assert_called_once(Accessor::CorrectedFluorescenceTraces);
    }

    #[test]
    fn acquisition_rate_uses_mean_spacing() {
        let analysis = StimulusAnalysis::new(MockDataSet::new(session()));
        assert!((analysis.acquisition_rate().unwrap() - 30.0).abs() < 1e-6);
        assert!(acquisition_rate(&arr1(&[0.0])).is_err());
    }

    #[test]
    fn id_and_running_accessors_are_called_once() {
        let analysis = StimulusAnalysis::new(MockDataSet::new(session()));
        for _ in 0..3 {
            assert_eq!(analysis.roi_id().unwrap().len(), 6);
            assert_eq!(analysis.cell_id().unwrap().len(), 6);
            analysis.dxcm().unwrap();
            analysis.dxtime().unwrap();
            analysis.dfftraces().unwrap();
        }
        let mock = analysis.dataset();
        mock.assert_called_once(Accessor::RoiIds);
        mock.assert_called_once(Accessor::CellSpecimenIds);
        mock.assert_called_once(Accessor::RunningSpeed);
        mock.assert_called_once(Accessor::DffTraces);
        assert_eq!(mock.call_count(Accessor::CorrectedFluorescenceTraces), 0);
    }

    #[test]
    fn speed_tuning_group_loads_together() {
        let analysis = StimulusAnalysis::with_model(
            MockDataSet::new(session()),
            DefaultResponseModel,
            config_with_binsize(50),
        );
        let peak_run = analysis.peak_run().unwrap();
        assert_eq!(peak_run.len(), 6);

        let states = analysis.field_states();
        for name in [
            "binned_dx_sp",
            "binned_cells_sp",
            "binned_dx_vis",
            "binned_cells_vis",
            "peak_run",
            "dfftraces",
            "dxcm",
        ] {
            assert!(states.contains(&(name, FieldState::Loaded)), "{name}");
        }
        assert_eq!(analysis.binned_cells_sp().unwrap().dim().0, 6);
        assert_eq!(analysis.binned_dx_vis().unwrap().dim().1, 2);

        let mock = analysis.dataset();
        assert_eq!(
            mock.call_count_for(Accessor::StimulusTable, StimulusKind::Spontaneous),
            1
        );
        mock.assert_called_once(Accessor::DffTraces);
    }

    #[test]
    fn failed_fetch_leaves_group_preload() {
        let analysis =
            StimulusAnalysis::new(MockDataSet::failing(session(), Accessor::RunningSpeed));
        let err = analysis.dxcm().unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::Dataset(DatasetError::Unavailable {
                accessor: Accessor::RunningSpeed
            })
        ));
        let states = analysis.field_states();
        assert!(states.contains(&("dxcm", FieldState::Preload)));
        assert!(states.contains(&("dxtime", FieldState::Preload)));
    }

    #[test]
    fn sweep_group_is_fixed_by_first_request() {
        let data = session();
        let table = data.stim_table.clone();
        let analysis = StimulusAnalysis::new(MockDataSet::new(data));
        let params = SweepParams {
            sweeplength: 7,
            interlength: 28,
            extralength: 7,
        };

        let first = analysis.mean_sweep_response_for(&table, params).unwrap().clone();
        let narrower = SweepParams {
            interlength: 7,
            ..params
        };
        let second = analysis.mean_sweep_response_for(&table, narrower).unwrap();
        assert_eq!(&first, second);
        assert_eq!(analysis.pval_for(&table, narrower).unwrap().dim(), (30, 6));
        assert_eq!(
            analysis.sweep_response_for(&table, params).unwrap().cells.dim(),
            (30, 6, 63)
        );
    }

    #[test]
    fn sweep_request_pulls_dff_and_speed_tuning() {
        let data = session();
        let table = data.stim_table.clone();
        let analysis = StimulusAnalysis::new(MockDataSet::new(data));
        let params = SweepParams {
            sweeplength: 7,
            interlength: 28,
            extralength: 7,
        };

        analysis.pval_for(&table, params).unwrap();
        for (name, state) in analysis.field_states() {
            let expected = match name {
                "roi_id" | "cell_id" => FieldState::Preload,
                _ => FieldState::Loaded,
            };
            assert_eq!(state, expected, "{name}");
        }

        analysis.dfftraces().unwrap();
        analysis.peak_run().unwrap();
        analysis.sweep_response_for(&table, params).unwrap();
        let mock = analysis.dataset();
        mock.assert_called_once(Accessor::DffTraces);
        mock.assert_called_once(Accessor::CorrectedFluorescenceTraces);
        mock.assert_called_once(Accessor::RunningSpeed);
        assert_eq!(
            mock.call_count_for(Accessor::StimulusTable, StimulusKind::Spontaneous),
            1
        );
        assert_eq!(mock.call_count(Accessor::RoiIds), 0);
    }
}
