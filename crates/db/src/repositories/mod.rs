//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods. Single
//! statements accept any `PgExecutor` (a pool or an open transaction);
//! multi-statement helpers take the transaction's `PgConnection`.

pub mod action_repo;
pub mod column_repo;
pub mod frame_repo;
pub mod run_log_repo;
pub mod scheduled_run_repo;
pub mod view_repo;
pub mod workflow_repo;

pub use action_repo::ActionRepo;
pub use column_repo::ColumnRepo;
pub use frame_repo::FrameRepo;
pub use run_log_repo::RunLogRepo;
pub use scheduled_run_repo::ScheduledRunRepo;
pub use view_repo::ViewRepo;
pub use workflow_repo::WorkflowRepo;
