use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::{action, condition, scheduled_run, survey};
use crate::state::AppState;

/// Routes mounted at `/workflows/{workflow_id}/actions`.
///
/// ```text
/// GET    /                                   -> list
/// POST   /                                   -> create
/// GET    /{name}                             -> get_by_name
/// PUT    /{name}                             -> update
/// DELETE /{name}                             -> delete
/// POST   /{name}/clone                       -> clone
/// PUT    /{name}/filter                      -> set_filter
/// POST   /{name}/condition-counts            -> condition_counts
/// GET    /{name}/preview                     -> preview
/// POST   /{name}/run                         -> run
/// POST   /{name}/schedule                    -> scheduled_run::create
/// GET    /{name}/survey                      -> survey::form
/// POST   /{name}/survey                      -> survey::submit
///
/// POST   /{name}/conditions                  -> condition::create
/// PUT    /{name}/conditions/{condition}      -> condition::update
/// DELETE /{name}/conditions/{condition}      -> condition::delete
/// POST   /{name}/conditions/{condition}/clone -> condition::clone
/// ```
pub fn router() -> Router<AppState> {
    let condition_routes: Router<AppState> = Router::new()
        .route("/", post(condition::create))
        .route(
            "/{condition}",
            put(condition::update).delete(condition::delete),
        )
        .route("/{condition}/clone", post(condition::clone));

    Router::new()
        .route("/", get(action::list).post(action::create))
        .route(
            "/{name}",
            get(action::get_by_name)
                .put(action::update)
                .delete(action::delete),
        )
        .route("/{name}/clone", post(action::clone))
        .route("/{name}/filter", put(action::set_filter))
        .route("/{name}/condition-counts", post(action::condition_counts))
        .route("/{name}/preview", get(action::preview))
        .route("/{name}/run", post(action::run))
        .route("/{name}/schedule", post(scheduled_run::create))
        .route("/{name}/survey", get(survey::form).post(survey::submit))
        .nest("/{name}/conditions", condition_routes)
}
