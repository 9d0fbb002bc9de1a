//! Models and handler for the movie metadata API.
//!
//! Only transient failures and cancellation are errors here. Any other
//! unsuccessful status comes back as [`ApiOutcome::Failure`], so callers can
//! treat "nothing to load" as an ordinary result.

use reqwest::{Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{LoaderError, ResilientClient, Result};

pub const RANDOM_MOVIE_PATH: &str = "/v1.4/movie/random";
pub const MOVIE_IMAGES_PATH: &str = "/v1.4/image";

/// Query for `GET /v1.4/movie/random`.
///
/// Range fields carry their wire names; the query builder folds each
/// `min`/`max` pair into one `<field>=min-max` parameter.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RandomMovieRequest {
    pub id: Option<i64>,
    pub status: Option<String>,
    #[serde(rename = "minyear")]
    pub min_year: Option<i32>,
    #[serde(rename = "maxyear")]
    pub max_year: Option<i32>,
    #[serde(rename = "minrating.kp")]
    pub min_rating_kp: Option<f64>,
    #[serde(rename = "maxrating.kp")]
    pub max_rating_kp: Option<f64>,
    #[serde(rename = "minrating.imdb")]
    pub min_rating_imdb: Option<f64>,
    #[serde(rename = "maxrating.imdb")]
    pub max_rating_imdb: Option<f64>,
    #[serde(rename = "minvotes.kp")]
    pub min_votes_kp: Option<i64>,
    #[serde(rename = "maxvotes.kp")]
    pub max_votes_kp: Option<i64>,
    #[serde(rename = "minvotes.imdb")]
    pub min_votes_imdb: Option<i64>,
    #[serde(rename = "maxvotes.imdb")]
    pub max_votes_imdb: Option<i64>,
}

impl RandomMovieRequest {
    pub const COMPLETED: &'static str = "completed";

    /// A request for any finished title.
    pub fn completed() -> Self {
        Self {
            status: Some(Self::COMPLETED.to_owned()),
            ..Self::default()
        }
    }

    /// A request pinned to one title.
    pub fn by_id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }
}

/// Query for `GET /v1.4/image`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieImagesRequest {
    pub page: u32,
    pub limit: u32,
    pub movie_id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

impl MovieImagesRequest {
    pub const FRAME: &'static str = "frame";

    /// First page of up to ten frames for `movie_id`.
    pub fn frames(movie_id: i64) -> Self {
        Self {
            page: 1,
            limit: 10,
            movie_id,
            kind: Self::FRAME.to_owned(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Rating {
    pub kp: Option<f64>,
    pub imdb: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Votes {
    pub kp: Option<i64>,
    pub imdb: Option<i64>,
}

/// A title as returned by the random movie endpoint.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct MovieDto {
    pub id: i64,
    pub name: Option<String>,
    pub en_name: Option<String>,
    pub type_number: Option<i32>,
    pub year: Option<i32>,
    pub rating: Rating,
    pub votes: Votes,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageDoc {
    pub movie_id: Option<i64>,
    pub url: Option<String>,
}

/// One page of the image listing.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImagesPage {
    pub docs: Vec<ImageDoc>,
    pub total: Option<u64>,
    pub page: Option<u32>,
    pub pages: Option<u32>,
}

impl ImagesPage {
    /// Image URLs in page order, skipping entries without one.
    pub fn urls(&self) -> Vec<String> {
        self.docs.iter().filter_map(|doc| doc.url.clone()).collect()
    }
}

/// A non-transient failure reported by the API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiFailure {
    pub status: u16,
    pub kind: String,
    pub message: String,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct ErrorBody {
    error: Option<String>,
    message: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ApiOutcome<T> {
    Success(T),
    Failure(ApiFailure),
}

impl<T> ApiOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn success(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure(_) => None,
        }
    }
}

/// Typed access to the API endpoints used by the workers.
#[derive(Clone, Debug)]
pub struct ApiHandler {
    client: ResilientClient,
}

impl ApiHandler {
    pub fn new(client: ResilientClient) -> Self {
        Self { client }
    }

    pub async fn random_movie(&self, request: &RandomMovieRequest) -> Result<ApiOutcome<MovieDto>> {
        self.fetch(RANDOM_MOVIE_PATH, request).await
    }

    pub async fn movie_images(&self, request: &MovieImagesRequest) -> Result<ApiOutcome<ImagesPage>> {
        self.fetch(MOVIE_IMAGES_PATH, request).await
    }

    /// GETs `path` with `request` as the query and decodes a JSON body.
    pub async fn fetch<Q, T>(&self, path: &str, request: &Q) -> Result<ApiOutcome<T>>
    where
        Q: Serialize,
        T: DeserializeOwned,
    {
        let response = self.client.get_query(path, request).await?;
        let status = response.status();
        if !status.is_success() {
            let failure = self.failure_from(response).await?;
            tracing::warn!(
                path,
                status = failure.status,
                kind = %failure.kind,
                message = %failure.message,
                "api request failed"
            );
            return Ok(ApiOutcome::Failure(failure));
        }

        let body = self.client.read_body(response.bytes()).await?;
        serde_json::from_slice(&body)
            .map(ApiOutcome::Success)
            .map_err(|err| LoaderError::Decode(format!("{path}: {err}")))
    }

    /// Builds the failure from the error body. A body that cannot be read
    /// yields empty details; cancellation still propagates.
    async fn failure_from(&self, response: Response) -> Result<ApiFailure> {
        let status = response.status();
        let body = match self.client.read_body(response.text()).await {
            Ok(body) => body,
            Err(LoaderError::Cancelled) => return Err(LoaderError::Cancelled),
            Err(_) => String::new(),
        };
        Ok(failure_details(status, &body))
    }
}

fn failure_details(status: StatusCode, body: &str) -> ApiFailure {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();

    let kind = parsed
        .error
        .filter(|error| !error.is_empty())
        .unwrap_or_else(|| reason(status));
    let message = match parsed.message {
        Some(serde_json::Value::String(message)) => message,
        Some(serde_json::Value::Array(messages)) => messages
            .iter()
            .map(|message| message.as_str().map_or_else(|| message.to_string(), str::to_owned))
            .collect::<Vec<_>>()
            .join("; "),
        Some(other) => other.to_string(),
        None => body.trim().to_owned(),
    };

    ApiFailure {
        status: status.as_u16(),
        kind,
        message,
    }
}

fn reason(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map_or_else(|| status.as_u16().to_string(), str::to_owned)
}
