use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{admin, auth, dashboard, dispatch, groups, instances, messages, registry};

/// Unauthenticated upgrade; the socket must `Identify` before it gets any
/// events.
async fn realtime_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let feed = state.feed.clone();
    let secret = state.jwt_secret.clone();
    ws.on_upgrade(move |socket| wadmin_realtime::connection::handle_connection(socket, feed, secret))
}

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/health", get(dashboard::health))
        .route("/realtime", get(realtime_upgrade));

    let protected_routes = Router::new()
        .route(
            "/instances",
            get(instances::list_instances).post(instances::create_instance),
        )
        .route(
            "/instances/{id}",
            get(instances::get_instance)
                .patch(instances::update_instance)
                .delete(instances::delete_instance),
        )
        .route("/instances/{id}/qr", get(instances::instance_qr))
        .route("/instances/{id}/refresh", post(instances::refresh_instance))
        .route(
            "/instances/{id}/groups/{group_jid}/participants",
            get(instances::group_participants),
        )
        .route(
            "/selection",
            get(registry::get_selection)
                .put(registry::set_selection)
                .delete(registry::clear_selection),
        )
        .route("/messages", get(messages::list_messages))
        .route("/messages/send", post(dispatch::send_messages_handler))
        .route("/groups", get(groups::list_groups))
        .route("/groups/join", post(dispatch::join_groups_handler))
        .route("/groups/{id}", axum::routing::delete(groups::delete_group))
        .route("/logs", get(admin::list_logs).post(admin::create_log))
        .route(
            "/feedback",
            get(admin::list_feedback).post(admin::create_feedback),
        )
        .route(
            "/feedback/{id}",
            patch(admin::update_feedback).delete(admin::delete_feedback),
        )
        .route("/dashboard", get(dashboard::stats))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
