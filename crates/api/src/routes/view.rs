use axum::routing::{get, post};
use axum::Router;

use crate::handlers::view;
use crate::state::AppState;

/// Routes mounted at `/workflows/{workflow_id}/views`.
///
/// ```text
/// GET    /               -> list
/// POST   /               -> create
/// GET    /{name}         -> get_by_name
/// PUT    /{name}         -> update
/// DELETE /{name}         -> delete
/// POST   /{name}/clone   -> clone
/// GET    /{name}/data    -> data
/// GET    /{name}/csv     -> export_csv
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(view::list).post(view::create))
        .route(
            "/{name}",
            get(view::get_by_name).put(view::update).delete(view::delete),
        )
        .route("/{name}/clone", post(view::clone))
        .route("/{name}/data", get(view::data))
        .route("/{name}/csv", get(view::export_csv))
}
