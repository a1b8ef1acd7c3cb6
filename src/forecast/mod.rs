//! Forecast artifacts and the batch job that materializes their output.

mod job;
mod model_store;

pub use job::{ForecastBatchJob, ForecastHorizon, LineOutcome, MAX_HORIZON_POINTS};
pub use model_store::{CommandModelLoader, ForecastModelStore};
