#![forbid(unsafe_code)]

use observatory_core::{
    RunningSpeed, ShapeError, StimulusKind, StimulusTable, StimulusTemplate, TraceSet,
};
use std::fmt;
use thiserror::Error;

pub mod mock;
pub mod synthetic;

pub use mock::{CallRecord, MockDataSet};
pub use synthetic::{PlantedField, SessionParams, SyntheticSession};

/// The accessors an analysis may call on a [`DataSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Accessor {
    CorrectedFluorescenceTraces,
    RoiIds,
    CellSpecimenIds,
    DffTraces,
    RunningSpeed,
    StimulusTable,
    StimulusTemplate,
}

impl Accessor {
    pub const ALL: [Accessor; 7] = [
        Accessor::CorrectedFluorescenceTraces,
        Accessor::RoiIds,
        Accessor::CellSpecimenIds,
        Accessor::DffTraces,
        Accessor::RunningSpeed,
        Accessor::StimulusTable,
        Accessor::StimulusTemplate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Accessor::CorrectedFluorescenceTraces => "get_corrected_fluorescence_traces",
            Accessor::RoiIds => "get_roi_ids",
            Accessor::CellSpecimenIds => "get_cell_specimen_ids",
            Accessor::DffTraces => "get_dff_traces",
            Accessor::RunningSpeed => "get_running_speed",
            Accessor::StimulusTable => "get_stimulus_table",
            Accessor::StimulusTemplate => "get_locally_sparse_noise_stimulus_template",
        }
    }
}

impl fmt::Display for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DatasetError {
    #[error("dataset accessor {accessor} is unavailable")]
    Unavailable { accessor: Accessor },
    #[error("dataset has no {stimulus} stimulus")]
    MissingStimulus { stimulus: StimulusKind },
    #[error("dataset contents are malformed: {0}")]
    Shape(#[from] ShapeError),
}

/// Read surface of an imaging session.
///
/// Analyses call each accessor at most once and cache what they get back,
/// so implementations are free to do expensive I/O here.
pub trait DataSet {
    fn get_corrected_fluorescence_traces(&self) -> Result<TraceSet, DatasetError>;

    fn get_roi_ids(&self) -> Result<Vec<String>, DatasetError>;

    fn get_cell_specimen_ids(&self) -> Result<Vec<Option<u64>>, DatasetError>;

    fn get_dff_traces(&self) -> Result<TraceSet, DatasetError>;

    fn get_running_speed(&self) -> Result<RunningSpeed, DatasetError>;

    fn get_stimulus_table(&self, stimulus: StimulusKind) -> Result<StimulusTable, DatasetError>;

    fn get_locally_sparse_noise_stimulus_template(
        &self,
        stimulus: StimulusKind,
        mask_off_screen: bool,
    ) -> Result<StimulusTemplate, DatasetError>;
}

impl<T: DataSet + ?Sized> DataSet for &T {
    fn get_corrected_fluorescence_traces(&self) -> Result<TraceSet, DatasetError> {
        (**self).get_corrected_fluorescence_traces()
    }

    fn get_roi_ids(&self) -> Result<Vec<String>, DatasetError> {
        (**self).get_roi_ids()
    }

    fn get_cell_specimen_ids(&self) -> Result<Vec<Option<u64>>, DatasetError> {
        (**self).get_cell_specimen_ids()
    }

    fn get_dff_traces(&self) -> Result<TraceSet, DatasetError> {
        (**self).get_dff_traces()
    }

    fn get_running_speed(&self) -> Result<RunningSpeed, DatasetError> {
        (**self).get_running_speed()
    }

    fn get_stimulus_table(&self, stimulus: StimulusKind) -> Result<StimulusTable, DatasetError> {
        (**self).get_stimulus_table(stimulus)
    }

    fn get_locally_sparse_noise_stimulus_template(
        &self,
        stimulus: StimulusKind,
        mask_off_screen: bool,
    ) -> Result<StimulusTemplate, DatasetError> {
        (**self).get_locally_sparse_noise_stimulus_template(stimulus, mask_off_screen)
    }
}
