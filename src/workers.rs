//! Background actions selected by the polling loop.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    api::{ApiHandler, ApiOutcome, MovieImagesRequest, RandomMovieRequest},
    catalog::{Catalog, Movie},
    settings::SearchSettings,
    LoaderError, Result,
};

/// One unit of loader work.
///
/// `Ok(false)` means the cycle had nothing to do: the API reported a
/// non-transient failure or there was no stored movie to act on.
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, cancel: &CancellationToken) -> Result<bool>;
}

fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(LoaderError::Cancelled);
    }
    Ok(())
}

/// Samples a random title and stores it, refreshing it if already known.
#[derive(Clone, Debug)]
pub struct LoadRandomMovieWorker {
    api: ApiHandler,
    catalog: Catalog,
    search: SearchSettings,
}

impl LoadRandomMovieWorker {
    pub const NAME: &'static str = "load_movie";

    pub fn new(api: ApiHandler, catalog: Catalog, search: SearchSettings) -> Self {
        Self {
            api,
            catalog,
            search,
        }
    }
}

#[async_trait]
impl Worker for LoadRandomMovieWorker {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<bool> {
        let request = self.search.random_movie_request();
        let dto = match self.api.random_movie(&request).await? {
            ApiOutcome::Success(dto) => dto,
            ApiOutcome::Failure(_) => return Ok(false),
        };
        ensure_active(cancel)?;

        match self.catalog.movie_by_kp_id(dto.id)? {
            Some(mut existing) => {
                existing.apply(&dto);
                let updated = self.catalog.update_movie(&mut existing)?;
                tracing::info!(kp_id = dto.id, updated, "known movie refreshed");
                Ok(updated)
            }
            None => {
                let movie = self.catalog.add_movie(Movie::from_dto(&dto))?;
                tracing::info!(kp_id = movie.kp_id, id = movie.id, "movie loaded");
                Ok(true)
            }
        }
    }
}

/// Refreshes the details of the least recently updated movie.
#[derive(Clone, Debug)]
pub struct UpdateMovieWorker {
    api: ApiHandler,
    catalog: Catalog,
}

impl UpdateMovieWorker {
    pub const NAME: &'static str = "update_movie";

    pub fn new(api: ApiHandler, catalog: Catalog) -> Self {
        Self { api, catalog }
    }
}

#[async_trait]
impl Worker for UpdateMovieWorker {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<bool> {
        let Some(oldest) = self.catalog.least_recently_updated_movie()? else {
            tracing::info!("no stored movie to update");
            return Ok(false);
        };

        let request = RandomMovieRequest::by_id(oldest.kp_id);
        let dto = match self.api.random_movie(&request).await? {
            ApiOutcome::Success(dto) => dto,
            ApiOutcome::Failure(_) => return Ok(false),
        };
        ensure_active(cancel)?;

        let Some(mut movie) = self.catalog.movie_by_kp_id(dto.id)? else {
            tracing::info!(kp_id = dto.id, "api returned a movie that is not stored");
            return Ok(false);
        };
        movie.apply(&dto);
        let updated = self.catalog.update_movie(&mut movie)?;
        tracing::info!(kp_id = movie.kp_id, updated, "movie updated");
        Ok(updated)
    }
}

/// Replaces the frames of the movie whose images are stalest.
#[derive(Clone, Debug)]
pub struct UpdateImagesWorker {
    api: ApiHandler,
    catalog: Catalog,
}

impl UpdateImagesWorker {
    pub const NAME: &'static str = "update_images";

    pub fn new(api: ApiHandler, catalog: Catalog) -> Self {
        Self { api, catalog }
    }
}

#[async_trait]
impl Worker for UpdateImagesWorker {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<bool> {
        let Some(oldest) = self.catalog.least_recently_imaged_movie()? else {
            tracing::info!("no stored movie to fetch images for");
            return Ok(false);
        };

        let request = MovieImagesRequest::frames(oldest.kp_id);
        let page = match self.api.movie_images(&request).await? {
            ApiOutcome::Success(page) => page,
            ApiOutcome::Failure(_) => return Ok(false),
        };
        ensure_active(cancel)?;

        let urls = page.urls();
        let replaced = self.catalog.replace_movie_images(oldest.id, &urls)?;
        tracing::info!(kp_id = oldest.kp_id, images = urls.len(), "movie images updated");
        Ok(replaced.is_some())
    }
}
