//! API Middleware
//!
//! Authentication, tenant scope resolution, and request logging.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{LedgerScope, OperationContext};

/// API Key authentication result
#[derive(Debug, Clone)]
pub struct AuthenticatedApiKey {
    pub id: Uuid,
    pub name: String,
    pub permissions: Vec<String>,
}

impl AuthenticatedApiKey {
    /// Check if this API key has a specific permission
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission || p == "admin")
    }
}

fn unauthorized(message: &str, code: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": message, "error_code": code })),
    )
        .into_response()
}

fn bad_request(message: &str, code: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message, "error_code": code })),
    )
        .into_response()
}

fn header_uuid(headers: &HeaderMap, name: &str) -> Result<Option<Uuid>, Response> {
    match headers.get(name).and_then(|v| v.to_str().ok()) {
        None => Ok(None),
        Some(raw) => Uuid::parse_str(raw).map(Some).map_err(|_| {
            bad_request(
                &format!("Invalid {} header format", name),
                "invalid_header",
            )
        }),
    }
}

// =========================================================================
// API Key Authentication Middleware
// =========================================================================

/// Validate the X-API-Key header, resolve the tenant scope, and attach a
/// fully built `OperationContext` to the request.
pub async fn auth_middleware(
    State(pool): State<PgPool>,
    headers: HeaderMap,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    let api_key = match headers.get("X-API-Key").and_then(|v| v.to_str().ok()) {
        Some(key) => key,
        None => return Err(unauthorized("Missing X-API-Key header", "missing_api_key")),
    };

    let api_key_record: Option<(Uuid, String, Vec<String>, bool)> = match sqlx::query_as(
        r#"
        SELECT id, name, permissions, is_active
        FROM api_keys
        WHERE key_hash = encode(sha256($1::bytea), 'hex')
        "#,
    )
    .bind(api_key.as_bytes())
    .fetch_optional(&pool)
    .await
    {
        Ok(record) => record,
        Err(e) => {
            tracing::error!("Database error during API key validation: {}", e);
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Internal server error",
                    "error_code": "database_error"
                })),
            )
                .into_response());
        }
    };

    let (api_key_id, name, permissions, is_active) = match api_key_record {
        Some(record) => record,
        None => return Err(unauthorized("Invalid API key", "invalid_api_key")),
    };
    if !is_active {
        return Err(unauthorized("API key is disabled", "api_key_disabled"));
    }

    request.extensions_mut().insert(AuthenticatedApiKey {
        id: api_key_id,
        name,
        permissions,
    });

    // Tenant scope: exactly one of the two scope headers must be present
    let agency_id = header_uuid(&headers, "X-Scope-Agency-Id")?;
    let sub_account_id = header_uuid(&headers, "X-Scope-Sub-Account-Id")?;
    let scope = match LedgerScope::from_columns(agency_id, sub_account_id) {
        Ok(scope) => scope,
        Err(_) => {
            return Err(bad_request(
                "Exactly one of X-Scope-Agency-Id or X-Scope-Sub-Account-Id is required",
                "invalid_scope",
            ));
        }
    };

    let user_id = match header_uuid(&headers, "X-Request-User-Id")? {
        Some(id) => id,
        None => {
            return Err(bad_request(
                "Missing X-Request-User-Id header",
                "missing_user_id",
            ));
        }
    };

    let correlation_id = headers
        .get("X-Correlation-Id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    let context = OperationContext::new(user_id, scope).with_correlation_id(correlation_id);
    request.extensions_mut().insert(context);

    Ok(next.run(request).await)
}

// =========================================================================
// mask_headers_for_logging
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &[
    "x-api-key",
    "authorization",
    "cookie",
    "set-cookie",
];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

// =========================================================================
// Request Logging Middleware
// =========================================================================

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let version = request.version();

    let headers = mask_headers_for_logging(request.headers());

    let correlation_id = request
        .extensions()
        .get::<OperationContext>()
        .and_then(|ctx| ctx.correlation_id);

    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        version = ?version,
        correlation_id = ?correlation_id,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %status,
        duration_ms = %duration.as_millis(),
        correlation_id = ?correlation_id,
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_headers_for_logging() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.insert("x-api-key", "secret-key-12345".parse().unwrap());
        headers.insert("x-request-user-id", "user-123".parse().unwrap());

        let masked = mask_headers_for_logging(&headers);

        let api_key = masked.iter().find(|(k, _)| k == "x-api-key");
        let content_type = masked.iter().find(|(k, _)| k == "content-type");
        let user_id = masked.iter().find(|(k, _)| k == "x-request-user-id");

        assert_eq!(api_key.unwrap().1, "[REDACTED]");
        assert_eq!(content_type.unwrap().1, "application/json");
        assert_eq!(user_id.unwrap().1, "user-123");
    }

    #[test]
    fn test_permission_check() {
        let key = AuthenticatedApiKey {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            permissions: vec!["journal.create".to_string()],
        };
        assert!(key.has_permission("journal.create"));
        assert!(!key.has_permission("period.manage"));

        let admin = AuthenticatedApiKey {
            id: Uuid::new_v4(),
            name: "admin".to_string(),
            permissions: vec!["admin".to_string()],
        };
        assert!(admin.has_permission("period.manage"));
        assert!(admin.has_permission("consolidation.manage"));
    }

    #[test]
    fn test_header_uuid_parsing() {
        let mut headers = HeaderMap::new();
        let id = Uuid::new_v4();
        headers.insert("X-Scope-Agency-Id", id.to_string().parse().unwrap());

        assert_eq!(header_uuid(&headers, "X-Scope-Agency-Id").unwrap(), Some(id));
        assert_eq!(header_uuid(&headers, "X-Scope-Sub-Account-Id").unwrap(), None);

        headers.insert("X-Scope-Sub-Account-Id", "not-a-uuid".parse().unwrap());
        assert!(header_uuid(&headers, "X-Scope-Sub-Account-Id").is_err());
    }
}
