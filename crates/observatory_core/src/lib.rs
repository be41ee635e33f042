#![forbid(unsafe_code)]

use ndarray::{Array1, Array2, Array3};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod digest;

pub const LSN_OFF: u8 = 0;
pub const LSN_GRAY: u8 = 127;
pub const LSN_ON: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StimulusKind {
    #[serde(rename = "locally_sparse_noise")]
    LocallySparseNoise,
    #[serde(rename = "locally_sparse_noise_4deg")]
    LocallySparseNoise4Deg,
    #[serde(rename = "locally_sparse_noise_8deg")]
    LocallySparseNoise8Deg,
    #[serde(rename = "spontaneous")]
    Spontaneous,
}

impl StimulusKind {
    pub const LOCALLY_SPARSE_NOISE_VARIANTS: [StimulusKind; 3] = [
        StimulusKind::LocallySparseNoise,
        StimulusKind::LocallySparseNoise4Deg,
        StimulusKind::LocallySparseNoise8Deg,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StimulusKind::LocallySparseNoise => "locally_sparse_noise",
            StimulusKind::LocallySparseNoise4Deg => "locally_sparse_noise_4deg",
            StimulusKind::LocallySparseNoise8Deg => "locally_sparse_noise_8deg",
            StimulusKind::Spontaneous => "spontaneous",
        }
    }

    pub fn is_locally_sparse_noise(&self) -> bool {
        self.template_shape().is_some()
    }

    /// Template grid as `(rows, cols)` for the sparse noise variants.
    pub fn template_shape(&self) -> Option<(usize, usize)> {
        match self {
            StimulusKind::LocallySparseNoise | StimulusKind::LocallySparseNoise4Deg => {
                Some((16, 28))
            }
            StimulusKind::LocallySparseNoise8Deg => Some((8, 14)),
            StimulusKind::Spontaneous => None,
        }
    }
}

impl fmt::Display for StimulusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("template mask shape {mask:?} does not match frame shape {frames:?}")]
    MaskMismatch {
        mask: (usize, usize),
        frames: (usize, usize),
    },
    #[error("trace frame count {traces} does not match timestamp count {timestamps}")]
    TraceLength { traces: usize, timestamps: usize },
    #[error("running speed has {dxcm} samples but {dxtime} timestamps")]
    RunningLength { dxcm: usize, dxtime: usize },
    #[error("sweep row {index} ends at {end} before it starts at {start}")]
    SweepOrder {
        index: usize,
        start: usize,
        end: usize,
    },
}

/// One presentation of a template frame, in acquisition frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepRow {
    pub frame: usize,
    pub start: usize,
    pub end: usize,
}

impl SweepRow {
    pub fn duration(&self) -> usize {
        self.end.saturating_sub(self.start)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StimulusTable {
    rows: Vec<SweepRow>,
}

impl StimulusTable {
    pub fn new(rows: Vec<SweepRow>) -> Result<Self, ShapeError> {
        for (index, row) in rows.iter().enumerate() {
            if row.end < row.start {
                return Err(ShapeError::SweepOrder {
                    index,
                    start: row.start,
                    end: row.end,
                });
            }
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[SweepRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&SweepRow> {
        self.rows.first()
    }

    pub fn last(&self) -> Option<&SweepRow> {
        self.rows.last()
    }

    /// Duration of the second sweep, or of the only sweep.
    pub fn sweep_length(&self) -> Option<usize> {
        self.rows
            .get(1)
            .or_else(|| self.rows.first())
            .map(SweepRow::duration)
    }
}

/// Sparse noise movie (`frames x rows x cols`) and its on-screen mask.
#[derive(Debug, Clone, PartialEq)]
pub struct StimulusTemplate {
    frames: Array3<u8>,
    mask: Array2<bool>,
}

impl StimulusTemplate {
    pub fn new(frames: Array3<u8>, mask: Array2<bool>) -> Result<Self, ShapeError> {
        let (_, rows, cols) = frames.dim();
        if mask.dim() != (rows, cols) {
            return Err(ShapeError::MaskMismatch {
                mask: mask.dim(),
                frames: (rows, cols),
            });
        }
        Ok(Self { frames, mask })
    }

    /// Template with every pixel on-screen.
    pub fn unmasked(frames: Array3<u8>) -> Self {
        let (_, rows, cols) = frames.dim();
        Self {
            frames,
            mask: Array2::from_elem((rows, cols), true),
        }
    }

    pub fn frames(&self) -> &Array3<u8> {
        &self.frames
    }

    pub fn mask(&self) -> &Array2<bool> {
        &self.mask
    }

    pub fn frame_count(&self) -> usize {
        self.frames.dim().0
    }

    pub fn grid(&self) -> (usize, usize) {
        let (_, rows, cols) = self.frames.dim();
        (rows, cols)
    }

    pub fn into_parts(self) -> (Array3<u8>, Array2<bool>) {
        (self.frames, self.mask)
    }
}

/// Per-cell traces sampled at `timestamps` (`cells x frames`).
#[derive(Debug, Clone, PartialEq)]
pub struct TraceSet {
    pub timestamps: Array1<f64>,
    pub traces: Array2<f64>,
}

impl TraceSet {
    pub fn new(timestamps: Array1<f64>, traces: Array2<f64>) -> Result<Self, ShapeError> {
        if traces.ncols() != timestamps.len() {
            return Err(ShapeError::TraceLength {
                traces: traces.ncols(),
                timestamps: timestamps.len(),
            });
        }
        Ok(Self { timestamps, traces })
    }

    pub fn cell_count(&self) -> usize {
        self.traces.nrows()
    }

    pub fn frame_count(&self) -> usize {
        self.traces.ncols()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunningSpeed {
    pub dxcm: Array1<f64>,
    pub dxtime: Array1<f64>,
}

impl RunningSpeed {
    pub fn new(dxcm: Array1<f64>, dxtime: Array1<f64>) -> Result<Self, ShapeError> {
        if dxcm.len() != dxtime.len() {
            return Err(ShapeError::RunningLength {
                dxcm: dxcm.len(),
                dxtime: dxtime.len(),
            });
        }
        Ok(Self { dxcm, dxtime })
    }
}
