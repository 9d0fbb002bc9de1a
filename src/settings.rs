//! Application settings loaded from TOML with environment overrides.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{api::RandomMovieRequest, ClientOptions, LoaderError, Result, RetryPolicy};

pub const ENV_API_KEY: &str = "KP_API_KEY";
pub const ENV_API_BASE_ADDRESS: &str = "KP_API_BASE_ADDRESS";
pub const ENV_DB_PATH: &str = "KP_DB_PATH";

/// Root settings document.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct AppSettings {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub probabilities: ProbabilitySettings,
    #[serde(default)]
    pub search: SearchSettings,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/kp.db")
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            api: ApiSettings::default(),
            probabilities: ProbabilitySettings::default(),
            search: SearchSettings::default(),
        }
    }
}

#[derive(Clone, Deserialize, Serialize, PartialEq)]
pub struct ApiSettings {
    #[serde(default)]
    pub base_address: String,
    #[serde(default)]
    pub key: String,
    #[serde(default = "default_key_header")]
    pub key_header: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

fn default_key_header() -> String {
    ClientOptions::DEFAULT_API_KEY_HEADER.to_owned()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_secs() -> u64 {
    1
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_address: String::new(),
            key: String::new(),
            key_header: default_key_header(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl std::fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSettings")
            .field("base_address", &self.base_address)
            .field("key", &"<redacted>")
            .field("key_header", &self.key_header)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_secs", &self.retry_delay_secs)
            .finish()
    }
}

/// Share of cycles given to each worker. Must sum to 1.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ProbabilitySettings {
    #[serde(default)]
    pub load_movie: f64,
    #[serde(default)]
    pub update_movie: f64,
    #[serde(default)]
    pub update_images: f64,
}

impl Default for ProbabilitySettings {
    fn default() -> Self {
        Self {
            load_movie: 0.6,
            update_movie: 0.2,
            update_images: 0.2,
        }
    }
}

/// Optional bounds applied when sampling a random movie.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SearchSettings {
    pub min_year: Option<i32>,
    pub max_year: Option<i32>,
    pub min_rating_kp: Option<f64>,
    pub max_rating_kp: Option<f64>,
    pub min_rating_imdb: Option<f64>,
    pub max_rating_imdb: Option<f64>,
    pub min_votes_kp: Option<i64>,
    pub max_votes_kp: Option<i64>,
    pub min_votes_imdb: Option<i64>,
    pub max_votes_imdb: Option<i64>,
}

impl SearchSettings {
    /// Request for a random completed title within these bounds.
    pub fn random_movie_request(&self) -> RandomMovieRequest {
        RandomMovieRequest {
            min_year: self.min_year,
            max_year: self.max_year,
            min_rating_kp: self.min_rating_kp,
            max_rating_kp: self.max_rating_kp,
            min_rating_imdb: self.min_rating_imdb,
            max_rating_imdb: self.max_rating_imdb,
            min_votes_kp: self.min_votes_kp,
            max_votes_kp: self.max_votes_kp,
            min_votes_imdb: self.min_votes_imdb,
            max_votes_imdb: self.max_votes_imdb,
            ..RandomMovieRequest::completed()
        }
    }
}

impl AppSettings {
    /// Reads `path` and applies environment overrides. Call
    /// [`AppSettings::validate`] before talking to the API.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = Self::load_from(path)?;
        settings.apply_overrides(|name| std::env::var(name).ok());
        Ok(settings)
    }

    /// Parses `path` as is, without overrides or validation.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            LoaderError::Config(format!("failed to read settings {}: {err}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|err| LoaderError::Config(format!("failed to parse settings: {err}")))
    }

    /// Replaces settings with non-empty values returned by `lookup` for
    /// [`ENV_API_KEY`], [`ENV_API_BASE_ADDRESS`] and [`ENV_DB_PATH`].
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(key) = value(ENV_API_KEY) {
            self.api.key = key;
        }
        if let Some(base_address) = value(ENV_API_BASE_ADDRESS) {
            self.api.base_address = base_address;
        }
        if let Some(db_path) = value(ENV_DB_PATH) {
            self.db_path = PathBuf::from(db_path);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.base_address.trim().is_empty() {
            return Err(LoaderError::Config("api.base_address is empty".to_owned()));
        }
        if self.api.key.trim().is_empty() {
            return Err(LoaderError::Config(format!(
                "api.key is empty; set it in the settings file or {ENV_API_KEY}"
            )));
        }
        if self.db_path.as_os_str().is_empty() {
            return Err(LoaderError::Config("db_path is empty".to_owned()));
        }
        Ok(())
    }

    /// Client options for the `[api]` section.
    pub fn client_options(&self) -> ClientOptions {
        let api = &self.api;
        ClientOptions::new(api.base_address.clone())
            .with_api_key(api.key.clone())
            .with_api_key_header(api.key_header.clone())
            .with_retry(RetryPolicy::new(
                Duration::from_secs(api.timeout_secs),
                api.max_retries,
                Duration::from_secs(api.retry_delay_secs),
            ))
    }
}
