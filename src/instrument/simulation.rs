//! Simulated readings for running without hardware.
//!
//! The default profile draws Gaussian noise around a plausible value for the
//! selected function (5 V DC, 230 V AC, 1 kΩ, 50 Hz, ...). A replay profile cycles
//! through fixed values, which makes runs reproducible down to the last digit.
//! Seeding the generator gives the same sequence for the same seed.

use crate::measurement::MeasurementFunction;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// How simulated values are produced.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationProfile {
    /// Gaussian noise around a nominal value per function.
    Model,
    /// Cycle through the given values.
    Replay(Vec<f64>),
}

/// Synthetic reading source.
#[derive(Debug, Clone)]
pub struct SimulationSource {
    rng: ChaCha8Rng,
    function: MeasurementFunction,
    profile: SimulationProfile,
    position: usize,
}

impl SimulationSource {
    /// Create a model-based source. `None` seeds from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            rng,
            function: MeasurementFunction::default(),
            profile: SimulationProfile::Model,
            position: 0,
        }
    }

    /// Create a source that replays `values` in a loop.
    ///
    /// An empty list falls back to the model.
    pub fn replay(values: Vec<f64>) -> Self {
        let mut source = Self::new(Some(0));
        if !values.is_empty() {
            source.profile = SimulationProfile::Replay(values);
        }
        source
    }

    /// Model readings for `function`.
    pub fn with_function(mut self, function: MeasurementFunction) -> Self {
        self.function = function;
        self
    }

    /// Switch the modeled function.
    pub fn set_function(&mut self, function: MeasurementFunction) {
        self.function = function;
    }

    /// The modeled function.
    pub fn function(&self) -> MeasurementFunction {
        self.function
    }

    /// How values are produced.
    pub fn profile(&self) -> &SimulationProfile {
        &self.profile
    }

    /// Produce the next reading.
    pub fn next_value(&mut self) -> f64 {
        match &self.profile {
            SimulationProfile::Replay(values) => {
                let value = values[self.position % values.len()];
                self.position += 1;
                value
            }
            SimulationProfile::Model => {
                let (nominal, sigma, rectify) = model(self.function);
                let value = Normal::new(nominal, sigma)
                    .map(|normal| normal.sample(&mut self.rng))
                    .unwrap_or(nominal);
                if rectify {
                    value.abs()
                } else {
                    value
                }
            }
        }
    }
}

impl Default for SimulationSource {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Nominal value, standard deviation and whether the reading is an RMS magnitude.
fn model(function: MeasurementFunction) -> (f64, f64, bool) {
    match function {
        MeasurementFunction::DcVoltage => (5.0, 5.0 * 0.002, false),
        MeasurementFunction::AcVoltage => (230.0, 230.0 * 0.002, true),
        MeasurementFunction::DcCurrent => (0.1, 0.1 * 0.005, false),
        MeasurementFunction::AcCurrent => (0.5, 0.5 * 0.005, false),
        MeasurementFunction::Resistance2W | MeasurementFunction::Resistance4W => {
            (1000.0, 0.5, false)
        }
        MeasurementFunction::Frequency => (50.0, 0.01, false),
        MeasurementFunction::Period => (0.02, 1e-6, false),
        MeasurementFunction::Continuity | MeasurementFunction::Diode => (0.0, 0.001, false),
    }
}
