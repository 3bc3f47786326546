//! Request extractors.
//!
//! - [`auth::AuthUser`] -- the caller, from a JWT Bearer token.
//! - [`auth::OwnedWorkflow`] -- a workflow path segment the caller owns.

pub mod auth;
