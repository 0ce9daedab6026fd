use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::metrics::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};

/// Records request count and latency for every HTTP request.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &path])
        .observe(duration);

    response
}

/// Collapse dynamic path segments (user/question ids) into a placeholder so
/// the path label set stays bounded. Module-type tags are kept as-is.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| if is_id_like(segment) { "{id}" } else { segment })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_id_like(segment: &str) -> bool {
    is_uuid_like(segment) || is_numeric_id(segment) || is_hex_object_id(segment)
}

fn is_uuid_like(s: &str) -> bool {
    s.len() == 36 && s.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

fn is_numeric_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn is_hex_object_id(s: &str) -> bool {
    s.len() == 24 && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path("/api/v1/progress/modules/mcq"),
            "/api/v1/progress/modules/mcq"
        );
        assert_eq!(
            normalize_path("/api/v1/users/550e8400-e29b-41d4-a716-446655440000/progress"),
            "/api/v1/users/{id}/progress"
        );
        assert_eq!(normalize_path("/api/v1/users/12345"), "/api/v1/users/{id}");
        assert_eq!(normalize_path("/health"), "/health");
    }

    #[test]
    fn test_is_hex_object_id() {
        assert!(is_hex_object_id("507f1f77bcf86cd799439011"));
        assert!(!is_hex_object_id("mcq"));
        assert!(!is_hex_object_id("507f1f77bcf86cd79943901")); // 23 chars
    }
}
