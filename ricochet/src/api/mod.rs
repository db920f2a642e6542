//! Admin API: the runtime control surface.
//!
//! Served on its own port, separate from proxied traffic. Endpoints:
//!
//! - `GET /api/health` - liveness probe
//! - `GET`/`PUT /api/v2/mode` - read or change the dispatcher mode
//! - `GET`/`PUT`/`DELETE /api/v2/simulation` - export, load (atomic), wipe
//! - `GET`/`PUT`/`DELETE /api/v2/state` - read, replace, clear the state bag
//! - `GET`/`DELETE /api/v2/journal` - recent exchanges
//! - `GET /api/v2/journal/diff` - diff-mode findings
//! - `GET`/`DELETE /api/v2/cache` - captured pairs

pub mod handlers;

use axum::Router;
use axum::routing::get;

use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/v2/mode", get(handlers::mode::get_mode).put(handlers::mode::set_mode))
        .route(
            "/api/v2/simulation",
            get(handlers::simulation::get_simulation)
                .put(handlers::simulation::put_simulation)
                .delete(handlers::simulation::delete_simulation),
        )
        .route(
            "/api/v2/state",
            get(handlers::state::get_state)
                .put(handlers::state::put_state)
                .delete(handlers::state::delete_state),
        )
        .route(
            "/api/v2/journal",
            get(handlers::journal::get_journal).delete(handlers::journal::delete_journal),
        )
        .route("/api/v2/journal/diff", get(handlers::journal::get_diff_journal))
        .route(
            "/api/v2/cache",
            get(handlers::cache::get_cache).delete(handlers::cache::delete_cache),
        )
        .with_state(state)
}
