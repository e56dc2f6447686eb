#![doc = "Tick-driven pulse train engine: pattern logic, tick bridge, timers and outputs."]

pub mod context;
pub mod driver;
pub mod engine;
pub mod output;
pub mod realtime;
pub mod recorder;
pub mod timer;

pub use context::*;
pub use driver::*;
pub use engine::*;
pub use output::*;
pub use realtime::*;
pub use recorder::*;
pub use timer::*;
