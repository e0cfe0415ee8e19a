//! Domain value objects.
//!
//! Value objects are immutable objects that represent concepts in the domain
//! and are defined by their attributes rather than identity.

mod audio;
mod quality;
mod retry_policy;

pub use audio::{AudioDevice, AudioSettings};
pub use quality::{QualityPreset, QualityTier};
pub use retry_policy::RetryPolicy;
