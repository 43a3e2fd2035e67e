//! Build workflow
//!
//! [`pipeline::build_package`] is the entry point collaborators call: a
//! [`BuildRequest`](crate::models::BuildRequest) plus a
//! [`Progress`](rdpkg_common::Progress) in, a success flag out.

pub mod pipeline;

pub use pipeline::{build_package, run_build};
