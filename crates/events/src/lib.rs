//! OnTask run events and artifact delivery.
//!
//! - [`EventBus`]: in-process publish/subscribe hub for [`RunEvent`]s.
//! - [`RunLogPersistence`]: background service writing run events to
//!   `run_logs`.
//! - [`dispatch::run_action`]: load, run, record and publish one action run.
//! - [`delivery`]: transports for rendered artifacts (SMTP email, JSON
//!   POST, Canvas inbox) and the [`RoutingTransport`] choosing between them
//!   by action type.

pub mod bus;
pub mod delivery;
pub mod dispatch;
pub mod persistence;

pub use bus::{EventBus, RunEvent};
pub use delivery::canvas::{CanvasConfig, CanvasTransport};
pub use delivery::email::{EmailConfig, EmailTransport};
pub use delivery::json_post::{JsonPostConfig, JsonPostTransport};
pub use delivery::router::RoutingTransport;
pub use dispatch::{run_action, RunTarget};
pub use persistence::{PersistenceTask, RunLogPersistence};
