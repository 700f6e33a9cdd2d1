use std::f64::consts::PI;

use super::types::{ChangeMode, ChangeSpec, Distribution};

pub fn derive_seed(base_seed: u64, combination: u32, trial: u32) -> u64 {
    let mixed = base_seed ^ ((combination as u64) << 32) ^ trial as u64;
    splitmix64(mixed)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

#[derive(Debug, Clone)]
pub struct Rng {
    state: u64,
    cached_normal: Option<f64>,
}

impl Rng {
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 {
            0xA5A5_A5A5_A5A5_A5A5
        } else {
            seed
        };
        Self {
            state,
            cached_normal: None,
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    /// Uniform draw on the open interval (0, 1).
    pub fn next_f64(&mut self) -> f64 {
        const DENOM: f64 = (1_u64 << 53) as f64;
        let v = self.next_u64() >> 11;
        ((v as f64) + 0.5) / DENOM
    }

    pub fn standard_normal(&mut self) -> f64 {
        if let Some(z) = self.cached_normal.take() {
            return z;
        }

        let u1 = self.next_f64().max(1e-12);
        let u2 = self.next_f64();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * PI * u2;

        let z0 = r * theta.cos();
        let z1 = r * theta.sin();
        self.cached_normal = Some(z1);
        z0
    }

    pub fn sample(&mut self, distribution: &Distribution) -> f64 {
        match *distribution {
            Distribution::Fixed { value } => value,
            Distribution::Normal { mean, stdev } => mean + stdev * self.standard_normal(),
            Distribution::Uniform { lower, upper } => lower + (upper - lower) * self.next_f64(),
        }
    }

    /// Applies a sampled change to `base`: an absolute delta for amount mode,
    /// `base * rate` for percent mode. Returns the delta only.
    pub fn sample_change(&mut self, spec: &ChangeSpec, base: f64) -> f64 {
        let drawn = self.sample(&spec.distribution);
        match spec.mode {
            ChangeMode::Amount => drawn,
            ChangeMode::Percent => base * drawn,
        }
    }
}
