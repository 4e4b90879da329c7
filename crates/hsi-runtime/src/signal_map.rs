//! Emulated signal line activity.

use hsi_common::config::SignalEmulationMode;
use hsi_common::error::{HsiError, HsiResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};

/// Number of signal lines in a map.
pub const SIGNAL_LINES: u32 = 32;

#[derive(Debug, Clone)]
enum Policy {
    AllOnes,
    /// `None` when the mean is zero: no line can ever fire.
    PoissonPerBit(Option<Poisson<f64>>),
    UniformRandom,
}

/// Produces one 32-bit signal map per tick.
#[derive(Debug, Clone)]
pub struct SignalMapGenerator {
    policy: Policy,
    rng: StdRng,
}

impl SignalMapGenerator {
    /// Build a generator for `mode`.
    ///
    /// `mean_multiplicity` is only used in Poisson mode. A `seed` makes the
    /// output sequence reproducible; without one the PRNG is seeded from entropy.
    ///
    /// # Errors
    ///
    /// Returns [`HsiError::Config`] if the Poisson mean is negative or not finite.
    pub fn new(
        mode: SignalEmulationMode,
        mean_multiplicity: f64,
        seed: Option<u64>,
    ) -> HsiResult<Self> {
        let policy = match mode {
            SignalEmulationMode::AllOnes => Policy::AllOnes,
            SignalEmulationMode::UniformRandom => Policy::UniformRandom,
            SignalEmulationMode::PoissonPerBit => {
                if !mean_multiplicity.is_finite() || mean_multiplicity < 0.0 {
                    return Err(HsiError::Config(format!(
                        "mean_signal_multiplicity must be a finite value >= 0, got {mean_multiplicity}"
                    )));
                }
                if mean_multiplicity == 0.0 {
                    Policy::PoissonPerBit(None)
                } else {
                    let poisson = Poisson::new(mean_multiplicity)
                        .map_err(|e| HsiError::Config(format!("invalid Poisson mean: {e}")))?;
                    Policy::PoissonPerBit(Some(poisson))
                }
            }
        };

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self { policy, rng })
    }

    /// Draw the next signal map.
    pub fn generate(&mut self) -> u32 {
        match &self.policy {
            Policy::AllOnes => u32::MAX,
            Policy::UniformRandom => self.rng.gen(),
            Policy::PoissonPerBit(None) => 0,
            Policy::PoissonPerBit(Some(poisson)) => {
                let mut map = 0u32;
                for bit in 0..SIGNAL_LINES {
                    if poisson.sample(&mut self.rng) > 0.0 {
                        map |= 1 << bit;
                    }
                }
                map
            }
        }
    }
}
