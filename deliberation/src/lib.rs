//! Bounded, goal-driven deliberation engine.
//!
//! Each cycle reflects on recent memory, manages a mission queue and a small
//! set of goals, advances one goal by a single tool action, and persists the
//! result. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (mission queue, goal selection,
//!   completion policy, cleanup, invariants). No I/O, fully testable in
//!   isolation.
//! - **[`io`]**: Collaborator contracts (reasoner, memory, tools, state store)
//!   and the file-backed adapters. Isolated to enable scripted fakes in tests.
//!
//! Orchestration modules ([`cycle`], [`executor`], [`assessor`], [`recorder`])
//! coordinate core logic with collaborators; [`missions`], [`status`], and
//! [`validate`] implement the CLI commands.

pub mod assessor;
pub mod context;
pub mod core;
pub mod cycle;
pub mod executor;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod missions;
pub mod recorder;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
