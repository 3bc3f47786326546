//! Route definitions for workflows and the resources keyed only by the
//! workflow: attributes, columns, the table, scheduled runs and run logs.

use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::{column, run_log, scheduled_run, table, workflow};
use crate::state::AppState;

/// Routes mounted at `/workflows`.
///
/// ```text
/// GET    /                                          -> list
/// POST   /                                          -> create
/// GET    /{workflow_id}                             -> get_by_id
/// PUT    /{workflow_id}                             -> update
/// DELETE /{workflow_id}                             -> delete
/// POST   /{workflow_id}/clone                       -> clone
/// GET    /{workflow_id}/query-builder-ops           -> query_builder_ops
///
/// GET    /{workflow_id}/attributes                  -> list_attributes
/// PUT    /{workflow_id}/attributes/{name}           -> set_attribute
/// DELETE /{workflow_id}/attributes/{name}           -> delete_attribute
///
/// GET    /{workflow_id}/columns                     -> column::list
/// POST   /{workflow_id}/columns                     -> column::add
/// PUT    /{workflow_id}/columns/{name}              -> column::update
/// DELETE /{workflow_id}/columns/{name}              -> column::delete
/// POST   /{workflow_id}/columns/{name}/rename       -> column::rename
/// POST   /{workflow_id}/columns/{name}/copy         -> column::copy
/// POST   /{workflow_id}/columns/{name}/move         -> column::move_to
/// GET    /{workflow_id}/columns/{name}/delete-preview -> column::delete_preview
/// GET    /{workflow_id}/columns/{name}/statistics   -> column::statistics
///
/// PUT    /{workflow_id}/table                       -> table::upload
/// POST   /{workflow_id}/table/merge                 -> table::merge
/// POST   /{workflow_id}/table/query                 -> table::query
/// PUT    /{workflow_id}/table/rows                  -> table::update_row
/// DELETE /{workflow_id}/table/rows                  -> table::delete_row
/// GET    /{workflow_id}/table/csv                   -> table::export_csv
///
/// GET    /{workflow_id}/scheduled-runs              -> scheduled_run::list
/// POST   /{workflow_id}/scheduled-runs/{run_id}/cancel -> scheduled_run::cancel
/// GET    /{workflow_id}/run-logs                    -> run_log::list
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(workflow::list).post(workflow::create))
        .route(
            "/{workflow_id}",
            get(workflow::get_by_id)
                .put(workflow::update)
                .delete(workflow::delete),
        )
        .route("/{workflow_id}/clone", post(workflow::clone))
        .route("/{workflow_id}/query-builder-ops", get(workflow::query_builder_ops))
        // Attributes
        .route("/{workflow_id}/attributes", get(workflow::list_attributes))
        .route(
            "/{workflow_id}/attributes/{name}",
            put(workflow::set_attribute).delete(workflow::delete_attribute),
        )
        // Columns
        .route("/{workflow_id}/columns", get(column::list).post(column::add))
        .route(
            "/{workflow_id}/columns/{name}",
            put(column::update).delete(column::delete),
        )
        .route("/{workflow_id}/columns/{name}/rename", post(column::rename))
        .route("/{workflow_id}/columns/{name}/copy", post(column::copy))
        .route("/{workflow_id}/columns/{name}/move", post(column::move_to))
        .route(
            "/{workflow_id}/columns/{name}/delete-preview",
            get(column::delete_preview),
        )
        .route("/{workflow_id}/columns/{name}/statistics", get(column::statistics))
        // Table
        .route("/{workflow_id}/table", put(table::upload))
        .route("/{workflow_id}/table/merge", post(table::merge))
        .route("/{workflow_id}/table/query", post(table::query))
        .route(
            "/{workflow_id}/table/rows",
            put(table::update_row).delete(table::delete_row),
        )
        .route("/{workflow_id}/table/csv", get(table::export_csv))
        // Scheduling and history
        .route("/{workflow_id}/scheduled-runs", get(scheduled_run::list))
        .route(
            "/{workflow_id}/scheduled-runs/{run_id}/cancel",
            post(scheduled_run::cancel),
        )
        .route("/{workflow_id}/run-logs", get(run_log::list))
}
