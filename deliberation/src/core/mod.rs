//! Deterministic, pure logic shared by the deliberation engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures, take the current time as an argument, and return
//! deterministic outputs suitable for tests.

pub mod adaptive;
pub mod assessment;
pub mod budget;
pub mod cleaner;
pub mod goals;
pub mod heuristics;
pub mod invariants;
pub mod lenient;
pub mod limits;
pub mod mission_queue;
pub mod outcome;
pub mod research;
pub mod types;
