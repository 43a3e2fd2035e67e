//! Shared helpers

pub mod retry;
pub mod text;
