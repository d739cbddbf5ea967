use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

/// CORS for the HTTP API and the socket upgrade.
///
/// `*` anywhere in `allowed` (or an empty list) allows every origin; otherwise origins must match
/// one of the configured values exactly.
pub fn cors(allowed: &[String]) -> CorsLayer {
    let origin = if allowed.is_empty() || allowed.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed.iter().filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring unusable CORS origin");
                None
            }
        }))
    };

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .allow_origin(origin)
}
