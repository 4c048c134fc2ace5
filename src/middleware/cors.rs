use axum::http::{header, Method};
use tower_http::cors::{Any, CorsLayer};

/// The editor runs on another origin and sends bearer tokens.
pub fn permissive_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::PUT, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(Any)
}
