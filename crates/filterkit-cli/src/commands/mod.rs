pub mod discovery;
pub mod pipeline;
pub mod stages;
