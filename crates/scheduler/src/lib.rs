pub mod runner;

pub use runner::{Schedule, SchedulerRunner};
