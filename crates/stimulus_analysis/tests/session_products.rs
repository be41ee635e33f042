use observatory_core::StimulusKind;
use observatory_dataset::{Accessor, MockDataSet, SessionParams, SyntheticSession};
use stimulus_analysis::{FieldState, StimulusAnalysis};

fn session() -> SyntheticSession {
    SyntheticSession::generate(SessionParams::for_stimulus(
        StimulusKind::LocallySparseNoise8Deg,
    ))
    .expect("generate session")
}

#[test]
fn speed_tuning_reads_dff_running_and_spontaneous_once() {
    let data = session();
    let mock = MockDataSet::new(&data);
    let analysis = StimulusAnalysis::new(&mock);

    let peak_run = analysis.peak_run().unwrap();
    assert_eq!(peak_run.len(), data.params.cells);
    analysis.binned_cells_vis().unwrap();
    analysis.binned_dx_sp().unwrap();

    mock.assert_called_once(Accessor::DffTraces);
    mock.assert_called_once(Accessor::RunningSpeed);
    assert_eq!(
        mock.call_count_for(Accessor::StimulusTable, StimulusKind::Spontaneous),
        1
    );
    assert_eq!(mock.call_count(Accessor::CorrectedFluorescenceTraces), 0);

    for (name, state) in analysis.field_states() {
        let expected = match name {
            "dfftraces" | "dxcm" | "dxtime" | "binned_dx_sp" | "binned_cells_sp"
            | "binned_dx_vis" | "binned_cells_vis" | "peak_run" => FieldState::Loaded,
            _ => FieldState::Preload,
        };
        assert_eq!(state, expected, "{name}");
    }
}

#[test]
fn speed_bins_are_sorted_and_consistent() {
    let data = session();
    let analysis = StimulusAnalysis::new(&data);

    for (dx, cells) in [
        (
            analysis.binned_dx_sp().unwrap(),
            analysis.binned_cells_sp().unwrap(),
        ),
        (
            analysis.binned_dx_vis().unwrap(),
            analysis.binned_cells_vis().unwrap(),
        ),
    ] {
        let bins = dx.nrows();
        assert!(bins >= 1);
        assert_eq!(dx.ncols(), 2);
        assert_eq!(cells.dim(), (data.params.cells, bins, 2));
        let means: Vec<f64> = dx.column(0).to_vec();
        assert!(means.windows(2).all(|pair| pair[0] <= pair[1]), "{means:?}");
        assert!(dx.column(1).iter().all(|sem| *sem >= 0.0));
    }
}

#[test]
fn trace_group_reports_rate_and_cell_count() {
    let data = session();
    let analysis = StimulusAnalysis::new(&data);

    assert_eq!(analysis.numbercells().unwrap(), data.params.cells);
    assert!((analysis.acquisition_rate().unwrap() - 30.0).abs() < 1e-9);
    assert_eq!(
        analysis.timestamps().unwrap().len(),
        analysis.celltraces().unwrap().ncols()
    );
    assert_eq!(analysis.roi_id().unwrap(), data.roi_ids.as_slice());
    assert_eq!(analysis.cell_id().unwrap(), data.cell_ids.as_slice());
}
