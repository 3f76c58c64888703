/// Speed of light in vacuum (m/s), used to normalize momenta.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Electron rest mass (kg).
pub const ELECTRON_MASS: f64 = 9.1093829099999999e-31;

/// Proton rest mass (kg), used for the `hydrogen` species.
pub const HYDROGEN_MASS: f64 = 1.6726219236900000e-27;

// Recursion ceiling of the read-plan optimizer.
pub const DEFAULT_MAX_PLAN_DEPTH: usize = 999;

// Maximum rows fetched by a single contiguous read.
pub const DEFAULT_MAX_READ_LENGTH: u64 = 10_000_000_000;

// Every column value is held as an 8 byte scalar in memory.
pub(crate) const BYTES_PER_VALUE: u64 = 8;

pub mod core;
pub mod configuration;
