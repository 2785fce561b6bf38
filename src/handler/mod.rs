pub(crate) mod errors;
pub(crate) mod immich;
pub(crate) mod middleware;
pub(crate) mod proxy;
pub(crate) mod state;
pub(crate) mod target;
pub(crate) mod viewer;


use axum::{
    middleware as axum_middleware,
    routing::{any, get},
    Router,
};

use self::state::ProxyState;

/// The viewer page at `/` and the rate limited proxy under [`immich::PROXY_MOUNT`].
pub(crate) fn router(state: ProxyState) -> Router {
    let proxy_routes = Router::new()
        .route(immich::PROXY_MOUNT, any(proxy::proxy))
        .route(&format!("{}/", immich::PROXY_MOUNT), any(proxy::proxy))
        .route(&format!("{}/{{*path}}", immich::PROXY_MOUNT), any(proxy::proxy))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ));

    Router::new()
        .route("/", get(viewer::viewer))
        .merge(proxy_routes)
        .layer(axum_middleware::from_fn(middleware::security_headers))
        .layer(axum_middleware::from_fn(middleware::metrics))
        .with_state(state)
}
