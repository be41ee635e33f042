use observatory_core::{RunningSpeed, StimulusKind, StimulusTable, StimulusTemplate, TraceSet};
use std::cell::RefCell;

use crate::{Accessor, DataSet, DatasetError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallRecord {
    pub accessor: Accessor,
    pub stimulus: Option<StimulusKind>,
}

/// Wraps any [`DataSet`] and records every call made through it.
#[derive(Debug)]
pub struct MockDataSet<D> {
    inner: D,
    calls: RefCell<Vec<CallRecord>>,
    fail_on: Option<Accessor>,
}

impl<D: DataSet> MockDataSet<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            calls: RefCell::new(Vec::new()),
            fail_on: None,
        }
    }

    /// Like [`MockDataSet::new`], but `accessor` always reports unavailable.
    pub fn failing(inner: D, accessor: Accessor) -> Self {
        Self {
            fail_on: Some(accessor),
            ..Self::new(inner)
        }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.borrow().clone()
    }

    pub fn call_count(&self, accessor: Accessor) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.accessor == accessor)
            .count()
    }

    pub fn call_count_for(&self, accessor: Accessor, stimulus: StimulusKind) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.accessor == accessor && call.stimulus == Some(stimulus))
            .count()
    }

    pub fn assert_called_once(&self, accessor: Accessor) {
        let count = self.call_count(accessor);
        assert_eq!(count, 1, "{accessor} called {count} times, expected once");
    }

    pub fn reset(&self) {
        self.calls.borrow_mut().clear();
    }

    fn record(
        &self,
        accessor: Accessor,
        stimulus: Option<StimulusKind>,
    ) -> Result<(), DatasetError> {
        log::debug!("mock dataset: {accessor} ({stimulus:?})");
        self.calls.borrow_mut().push(CallRecord { accessor, stimulus });
        if self.fail_on == Some(accessor) {
            return Err(DatasetError::Unavailable { accessor });
        }
        Ok(())
    }
}

impl<D: DataSet> DataSet for MockDataSet<D> {
    fn get_corrected_fluorescence_traces(&self) -> Result<TraceSet, DatasetError> {
        self.record(Accessor::CorrectedFluorescenceTraces, None)?;
        self.inner.get_corrected_fluorescence_traces()
    }

    fn get_roi_ids(&self) -> Result<Vec<String>, DatasetError> {
        self.record(Accessor::RoiIds, None)?;
        self.inner.get_roi_ids()
    }

    fn get_cell_specimen_ids(&self) -> Result<Vec<Option<u64>>, DatasetError> {
        self.record(Accessor::CellSpecimenIds, None)?;
        self.inner.get_cell_specimen_ids()
    }

    fn get_dff_traces(&self) -> Result<TraceSet, DatasetError> {
        self.record(Accessor::DffTraces, None)?;
        self.inner.get_dff_traces()
    }

    fn get_running_speed(&self) -> Result<RunningSpeed, DatasetError> {
        self.record(Accessor::RunningSpeed, None)?;
        self.inner.get_running_speed()
    }

    fn get_stimulus_table(&self, stimulus: StimulusKind) -> Result<StimulusTable, DatasetError> {
        self.record(Accessor::StimulusTable, Some(stimulus))?;
        self.inner.get_stimulus_table(stimulus)
    }

    fn get_locally_sparse_noise_stimulus_template(
        &self,
        stimulus: StimulusKind,
        mask_off_screen: bool,
    ) -> Result<StimulusTemplate, DatasetError> {
        self.record(Accessor::StimulusTemplate, Some(stimulus))?;
        self.inner
            .get_locally_sparse_noise_stimulus_template(stimulus, mask_off_screen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SessionParams, SyntheticSession};

    fn session() -> SyntheticSession {
        SyntheticSession::generate(SessionParams {
            sweeps: 20,
            spontaneous_frames: 100,
            ..SessionParams::for_stimulus(StimulusKind::LocallySparseNoise8Deg)
        })
        .unwrap()
    }

    #[test]
    fn mock_records_each_call() {
        let mock = MockDataSet::new(session());
        mock.get_roi_ids().unwrap();
        mock.get_roi_ids().unwrap();
        mock.get_stimulus_table(StimulusKind::Spontaneous).unwrap();

        assert_eq!(mock.call_count(Accessor::RoiIds), 2);
        assert_eq!(
            mock.call_count_for(Accessor::StimulusTable, StimulusKind::Spontaneous),
            1
        );
        assert_eq!(mock.call_count(Accessor::DffTraces), 0);
        assert_eq!(mock.calls().len(), 3);

        mock.reset();
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn failing_mock_still_records_the_attempt() {
        let mock = MockDataSet::failing(session(), Accessor::RunningSpeed);
        let err = mock.get_running_speed().unwrap_err();

        assert_eq!(
            err,
            DatasetError::Unavailable {
                accessor: Accessor::RunningSpeed
            }
        );
        mock.assert_called_once(Accessor::RunningSpeed);
        assert!(mock.get_dff_traces().is_ok());
    }

    #[test]
    fn mock_works_through_a_reference() {
        let mock = MockDataSet::new(session());
        let borrowed: &dyn DataSet = &mock;
        borrowed.get_cell_specimen_ids().unwrap();
        mock.assert_called_once(Accessor::CellSpecimenIds);
    }
}
