//! Embedded browser UI
//!
//! HTML, JS and CSS are compiled into the binary.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::AppState;

const INDEX_HTML: &str = include_str!("../../static/index.html");
const APP_JS: &str = include_str!("../../static/app.js");
const APP_CSS: &str = include_str!("../../static/app.css");

fn asset(content_type: &'static str, body: &'static str) -> Response {
    (
        StatusCode::OK,
        [
            ("content-type", content_type),
            ("cache-control", "no-cache, no-store, must-revalidate"),
        ],
        body,
    )
        .into_response()
}

/// GET /
pub async fn serve_index() -> Response {
    asset("text/html; charset=utf-8", INDEX_HTML)
}

/// GET /static/app.js
pub async fn serve_app_js() -> Response {
    asset("application/javascript", APP_JS)
}

/// GET /static/app.css
pub async fn serve_app_css() -> Response {
    asset("text/css", APP_CSS)
}

pub fn ui_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(serve_index))
        .route("/static/app.js", get(serve_app_js))
        .route("/static/app.css", get(serve_app_css))
}
