// Localhost CORS policy
//
// Only `http://localhost:<port>` and `http://127.0.0.1:<port>` may call the
// API from a browser. Credentials are allowed, so origins, methods and
// headers are mirrored instead of using wildcards.

use axum::http::{request::Parts, HeaderValue};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

const LOCAL_HOSTS: [&str; 2] = ["localhost", "127.0.0.1"];

/// CORS layer admitting local development frontends on any port
pub fn localhost_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _parts: &Parts| {
            origin.to_str().map(is_localhost_origin).unwrap_or(false)
        }))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
}

/// `http://` + localhost or 127.0.0.1 + `:` + a non-empty decimal port
pub fn is_localhost_origin(origin: &str) -> bool {
    let Some(authority) = origin.strip_prefix("http://") else {
        return false;
    };
    let Some((host, port)) = authority.rsplit_once(':') else {
        return false;
    };
    LOCAL_HOSTS.contains(&host) && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())
}
