//! Background monitoring of a running race.

pub mod completion;

pub use completion::CompletionMonitor;
