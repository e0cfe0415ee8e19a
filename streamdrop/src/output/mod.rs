//! Publishing destinations of the encoder.

mod fanout;

pub use fanout::{OutputPlan, redact_url, resolve_outputs, resolve_target};
