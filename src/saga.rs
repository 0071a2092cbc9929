use crate::{model::ValidationError, store::StoreError};
use log::error;
use thiserror::Error;

/// Why a multi-write operation stopped.
///
/// Validation failures happen before anything is written. A store failure names the step
/// that failed; the steps before it stay applied and nothing after it runs.
#[derive(Error, Debug)]
pub enum SagaError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{step} failed: {source}")]
    Store {
        step: &'static str,
        source: StoreError,
    },
}

impl SagaError {
    /// The step that failed, when the failure came from the store.
    pub fn failed_step(&self) -> Option<&'static str> {
        match *self {
            SagaError::Store { step, .. } => Some(step),
            SagaError::Validation(_) => None,
        }
    }
}

/// Tag the outcome of one store call with the saga step it implements.
pub(crate) fn step<T>(name: &'static str, result: Result<T, StoreError>) -> Result<T, SagaError> {
    result.map_err(|source| {
        error!("saga step '{}' failed: {}", name, source);
        SagaError::Store { step: name, source }
    })
}
