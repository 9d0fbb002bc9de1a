//! `kp-loader` samples a movie metadata API and stores the results in SQLite.
//!
//! The building blocks are usable on their own:
//! - [`ConnectionPool`] and [`ResilientClient`] for pooled HTTP with
//!   timeout, retry and cancellation
//! - [`Repository`] for CRUD over any [`Record`] declared with [`record!`]
//! - [`WeightedDispatcher`] for picking one action per cycle by probability
//!
//! [`runner::PollingLoop`] ties them to the loader's workers.

mod client;
mod error;
mod options;
mod params;
mod pool;
mod record;
mod repository;
mod row;
mod value;

pub mod api;
pub mod catalog;
pub mod dispatch;
pub mod query;
pub mod runner;
pub mod settings;
pub mod workers;

pub use client::ResilientClient;
pub use dispatch::{DispatcherBuilder, WeightedDispatcher};
pub use error::LoaderError;
pub use options::{ClientOptions, RetryPolicy};
pub use params::Params;
pub use pool::{ConnectionPool, EndpointHandle};
pub use record::{ColumnKind, FieldDef, FieldType, Record, TIMESTAMP_FORMAT};
pub use repository::{Database, Repository};
pub use row::Row;
pub use tokio_util::sync::CancellationToken;
pub use value::Value;

pub type Result<T> = std::result::Result<T, LoaderError>;
