//! Inbound adapters that translate external invocations into domain calls.
//!
//! The [`invocation`] adapter handles JSON documents from a job runner or
//! the command line.

pub mod invocation;
