//! Filterkit Toolbox - stock pipeline stages
//!
//! Every stage here is registered at compile time; [`source`] hands them to a
//! registry.

pub mod display;
pub mod pattern;
pub mod query;
pub mod timing;

pub use display::{SaveFrames, ShowImage};
pub use pattern::TestPattern;
pub use query::QueryDemo;
pub use timing::{ShowFps, Sleep, StopAfter};

use filterkit_core::StaticSource;

/// Discovery source yielding the toolbox stages
pub fn source() -> StaticSource {
    StaticSource::scoped(module_path!())
}
