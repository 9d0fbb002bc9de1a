//! One dispatch-and-execute cycle.

use tokio_util::sync::CancellationToken;

use crate::{
    api::ApiHandler,
    catalog::Catalog,
    dispatch::{DispatcherBuilder, WeightedDispatcher},
    settings::{ProbabilitySettings, SearchSettings},
    workers::{LoadRandomMovieWorker, UpdateImagesWorker, UpdateMovieWorker, Worker},
    LoaderError, Result,
};

/// Registers the three loader workers with their configured weights.
///
/// Fails before any dispatch when the weights are out of range or do not
/// sum to 1.
pub fn worker_dispatcher(
    builder: DispatcherBuilder<dyn Worker>,
    api: &ApiHandler,
    catalog: &Catalog,
    probabilities: &ProbabilitySettings,
    search: &SearchSettings,
) -> Result<WeightedDispatcher<dyn Worker>> {
    let (load_api, load_catalog, search) = (api.clone(), catalog.clone(), search.clone());
    let (update_api, update_catalog) = (api.clone(), catalog.clone());
    let (images_api, images_catalog) = (api.clone(), catalog.clone());

    builder
        .register(LoadRandomMovieWorker::NAME, probabilities.load_movie, move || {
            Box::new(LoadRandomMovieWorker::new(
                load_api.clone(),
                load_catalog.clone(),
                search.clone(),
            ))
        })?
        .register(UpdateMovieWorker::NAME, probabilities.update_movie, move || {
            Box::new(UpdateMovieWorker::new(update_api.clone(), update_catalog.clone()))
        })?
        .register(UpdateImagesWorker::NAME, probabilities.update_images, move || {
            Box::new(UpdateImagesWorker::new(images_api.clone(), images_catalog.clone()))
        })?
        .build()
}

/// Picks one worker per cycle and runs it.
#[derive(Debug)]
pub struct PollingLoop {
    dispatcher: WeightedDispatcher<dyn Worker>,
}

impl PollingLoop {
    pub fn new(dispatcher: WeightedDispatcher<dyn Worker>) -> Self {
        Self { dispatcher }
    }

    /// Runs one cycle. Returns the worker's outcome; `false` is a no-op.
    ///
    /// A token cancelled before dispatch yields [`LoaderError::Cancelled`]
    /// without selecting a worker.
    pub async fn run_once(&mut self, cancel: &CancellationToken) -> Result<bool> {
        if cancel.is_cancelled() {
            return Err(LoaderError::Cancelled);
        }

        let (name, worker) = self.dispatcher.create_named()?;
        tracing::info!(worker = name, "dispatching");

        let outcome = worker.run(cancel).await;
        match &outcome {
            Ok(done) => tracing::info!(worker = worker.name(), done = *done, "cycle finished"),
            Err(err) => tracing::warn!(worker = worker.name(), error = %err, "cycle failed"),
        }
        outcome
    }
}
