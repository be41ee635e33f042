//! Computed-once fields with an observable "not yet computed" state.

use once_cell::unsync::OnceCell;
use std::fmt;

use crate::AnalysisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldState {
    /// Nothing has been computed yet.
    Preload,
    Loaded,
}

/// A named field that is filled at most once.
///
/// Group loaders fill several fields in one step; a second `fill` on the
/// same field is an error, so a loaded value is never recomputed.
pub struct LazyField<T> {
    name: &'static str,
    cell: OnceCell<T>,
}

impl<T> LazyField<T> {
    pub const fn preload(name: &'static str) -> Self {
        Self {
            name,
            cell: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> FieldState {
        if self.cell.get().is_some() {
            FieldState::Loaded
        } else {
            FieldState::Preload
        }
    }

    pub fn is_preload(&self) -> bool {
        self.state() == FieldState::Preload
    }

    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    pub fn fill(&self, value: T) -> Result<(), AnalysisError> {
        self.cell
            .set(value)
            .map_err(|_| AnalysisError::AlreadyLoaded { field: self.name })
    }

    pub fn get_or_try_fill<F>(&self, load: F) -> Result<&T, AnalysisError>
    where
        F: FnOnce() -> Result<T, AnalysisError>,
    {
        self.cell.get_or_try_init(load)
    }

    pub fn require(&self) -> Result<&T, AnalysisError> {
        self.cell
            .get()
            .ok_or(AnalysisError::Unpopulated { field: self.name })
    }
}

impl<T> fmt::Debug for LazyField<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyField")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
