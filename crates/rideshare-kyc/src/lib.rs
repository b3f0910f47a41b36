//! Driver onboarding verification: document lifecycle, uniqueness, uploads,
//! reviewer decisions, and the next-step resolver behind the onboarding screens.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod verification;

pub use error::AppError;
