//! Weighted random selection between competing actions.
//!
//! Candidates are registered with a probability and a factory. Each
//! [`WeightedDispatcher::create`] draws one uniform sample in `[0, 1)` and
//! instantiates the first candidate whose cumulative threshold covers it.

use std::fmt;

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{LoaderError, Result};

/// Allowed distance between the probability sum and `1.0`.
pub const PROBABILITY_TOLERANCE: f64 = 1e-4;

type Factory<T> = Box<dyn Fn() -> Box<T> + Send + Sync>;

struct Candidate<T: ?Sized> {
    name: String,
    probability: f64,
    factory: Factory<T>,
}

/// Selects and instantiates one capability implementation per call.
///
/// `T` is the capability, usually a trait object such as `dyn Worker`;
/// factories returning `Box<T>` are the only way to register a candidate.
pub struct WeightedDispatcher<T: ?Sized> {
    candidates: Vec<Candidate<T>>,
    thresholds: Option<Vec<f64>>,
    rng: StdRng,
}

impl<T: ?Sized> fmt::Debug for WeightedDispatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeightedDispatcher")
            .field("candidates", &self.candidates().collect::<Vec<_>>())
            .field("thresholds", &self.thresholds)
            .finish()
    }
}

impl<T: ?Sized> Default for WeightedDispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> WeightedDispatcher<T> {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Uses `rng` for the draws; seed it for reproducible selection.
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            candidates: Vec::new(),
            thresholds: None,
            rng,
        }
    }

    /// Adds a candidate.
    ///
    /// Rejects empty or duplicate names (compared case-insensitively) and
    /// probabilities outside `[0, 1]`. Cached thresholds are dropped.
    pub fn register<F>(&mut self, name: impl Into<String>, probability: f64, factory: F) -> Result<()>
    where
        F: Fn() -> Box<T> + Send + Sync + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(LoaderError::Config("candidate name cannot be empty".to_owned()));
        }
        if !(0.0..=1.0).contains(&probability) {
            return Err(LoaderError::Config(format!(
                "probability {probability} of '{name}' must be between 0 and 1"
            )));
        }
        if self
            .candidates
            .iter()
            .any(|candidate| candidate.name.eq_ignore_ascii_case(&name))
        {
            return Err(LoaderError::Config(format!(
                "candidate '{name}' is already registered"
            )));
        }

        self.candidates.push(Candidate {
            name,
            probability,
            factory: Box::new(factory),
        });
        self.thresholds = None;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Registered `(name, probability)` pairs in registration order.
    pub fn candidates(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.candidates
            .iter()
            .map(|candidate| (candidate.name.as_str(), candidate.probability))
    }

    /// Cumulative thresholds, computing and caching them when needed.
    ///
    /// Fails when no candidate is registered or the probabilities do not
    /// sum to `1.0` within [`PROBABILITY_TOLERANCE`].
    pub fn thresholds(&mut self) -> Result<&[f64]> {
        if self.candidates.is_empty() {
            return Err(LoaderError::Config("no candidates registered".to_owned()));
        }
        if self.thresholds.is_none() {
            let probabilities: Vec<f64> = self
                .candidates
                .iter()
                .map(|candidate| candidate.probability)
                .collect();
            self.thresholds = Some(cumulative_thresholds(&probabilities)?);
        }
        Ok(self.thresholds.as_deref().unwrap_or_default())
    }

    /// Verifies the configuration without drawing.
    pub fn validate(&mut self) -> Result<()> {
        self.thresholds().map(|_| ())
    }

    /// Instantiates one candidate chosen by weight.
    pub fn create(&mut self) -> Result<Box<T>> {
        self.create_named().map(|(_, instance)| instance)
    }

    /// Like [`WeightedDispatcher::create`], also returning the chosen name.
    pub fn create_named(&mut self) -> Result<(&str, Box<T>)> {
        let draw: f64 = self.rng.gen();
        let index = select_index(self.thresholds()?, draw);
        let candidate = &self.candidates[index];
        Ok((candidate.name.as_str(), (candidate.factory)()))
    }
}

/// Running sums of `probabilities`, with the last forced to exactly `1.0`.
pub fn cumulative_thresholds(probabilities: &[f64]) -> Result<Vec<f64>> {
    let mut cumulative = 0.0;
    let mut thresholds: Vec<f64> = probabilities
        .iter()
        .map(|probability| {
            cumulative += probability;
            cumulative
        })
        .collect();
    if let Some(last) = thresholds.last_mut() {
        *last = 1.0;
    }

    let sum: f64 = probabilities.iter().sum();
    if (sum - 1.0).abs() >= PROBABILITY_TOLERANCE {
        return Err(LoaderError::Config(format!(
            "probabilities sum to {sum}, expected 1"
        )));
    }
    Ok(thresholds)
}

/// Index of the first threshold `>= draw`, or the last index.
pub fn select_index(thresholds: &[f64], draw: f64) -> usize {
    thresholds
        .iter()
        .position(|threshold| draw <= *threshold)
        .unwrap_or_else(|| thresholds.len().saturating_sub(1))
}

/// Collects registrations and validates them as a whole before any dispatch.
pub struct DispatcherBuilder<T: ?Sized> {
    dispatcher: WeightedDispatcher<T>,
}

impl<T: ?Sized> Default for DispatcherBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> DispatcherBuilder<T> {
    pub fn new() -> Self {
        Self {
            dispatcher: WeightedDispatcher::new(),
        }
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            dispatcher: WeightedDispatcher::with_rng(rng),
        }
    }

    pub fn register<F>(mut self, name: impl Into<String>, probability: f64, factory: F) -> Result<Self>
    where
        F: Fn() -> Box<T> + Send + Sync + 'static,
    {
        self.dispatcher.register(name, probability, factory)?;
        Ok(self)
    }

    /// Fails when the set is empty or the probabilities do not sum to 1.
    pub fn build(mut self) -> Result<WeightedDispatcher<T>> {
        self.dispatcher.validate()?;
        Ok(self.dispatcher)
    }
}
