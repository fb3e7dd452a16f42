//! Job lifecycle tracking: the in-memory store and its retention janitor.

pub mod manager;

pub use manager::{spawn_janitor, JobManager};
