//! Streaming platform catalog.

mod catalog;

pub use catalog::{PlatformCatalog, PlatformInfo};
