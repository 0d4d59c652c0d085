// Session engine
// Maps client sessions to their pause gates

pub mod registry;

pub use registry::SessionPauseRegistry;
