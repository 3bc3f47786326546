//! Artifact transports.
//!
//! Each transport implements [`ontask_core::transport::ArtifactTransport`].

pub mod canvas;
pub mod email;
pub mod json_post;
pub mod router;

use std::time::Duration;

/// Retry delays (exponential backoff: 1s, 2s, 4s).
pub const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// HTTP request timeout for a single delivery attempt.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
