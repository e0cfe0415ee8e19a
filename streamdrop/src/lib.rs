//! streamdrop library crate.
//!
//! Supervises live streaming pipelines: each pipeline renders content on a
//! virtual display, encodes it once and fans the result out to one or more
//! RTMP platforms. Failed processes are detected, classified and recovered.

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod output;
pub mod platforms;
pub mod process;
pub mod recovery;
pub mod store;
pub mod supervisor;

pub use error::{Error, Result};
