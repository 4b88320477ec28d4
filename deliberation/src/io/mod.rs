//! Collaborator contracts and side-effecting adapters.

pub mod config;
pub mod init;
pub mod memory;
pub mod reasoner;
pub mod state_store;
pub mod tools;
