mod job;
mod orchestrator;
mod ratio;
mod settings;

pub use job::*;
pub use orchestrator::*;
pub use ratio::*;
pub use settings::*;
