mod wrapper;
mod probe;
mod commands;
mod progress;
mod supervisor;

pub use wrapper::*;
pub use probe::*;
pub use commands::*;
pub use progress::*;
pub use supervisor::*;
