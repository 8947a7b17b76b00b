//! Error Types for the QUARRY HTTP service
//!
//! - [`ErrorCode`] categorizes failures and fixes their HTTP status
//! - [`ApiError`] is the JSON error body every handler returns
//! - [`From<QuarryError>`] maps library errors onto codes
//!
//! Error bodies look like `{ "code": "NO_RECORDS", "error": "No records found" }`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use quarry_core::{PlannerError, QuarryError, ValidationError, WarehouseError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request body is malformed or a field has the wrong type
    InvalidInput,

    /// Required field is missing from request
    MissingField,

    /// A requested table is not in the warehouse catalog
    UnknownTable,

    /// Requested tables cannot all be joined
    NoJoinPath,

    // ========================================================================
    // Not Found (404)
    // ========================================================================
    /// A cache entry or route does not exist
    NotFound,

    /// A read statement returned zero rows
    NoRecords,

    // ========================================================================
    // Upstream Errors
    // ========================================================================
    /// Warehouse execution exceeded its deadline
    Timeout,

    /// Warehouse rejected or failed the statement
    WarehouseError,

    /// The cache store could not serve a maintenance call
    ServiceUnavailable,

    /// Anything else
    InternalError,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidInput
            | ErrorCode::MissingField
            | ErrorCode::UnknownTable
            | ErrorCode::NoJoinPath => StatusCode::BAD_REQUEST,

            ErrorCode::NotFound | ErrorCode::NoRecords => StatusCode::NOT_FOUND,

            ErrorCode::Timeout => StatusCode::REQUEST_TIMEOUT,

            ErrorCode::WarehouseError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }

            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "Invalid input",
            ErrorCode::MissingField => "Required field is missing",
            ErrorCode::UnknownTable => "Table not found in catalog",
            ErrorCode::NoJoinPath => "No join path between the requested tables",
            ErrorCode::NotFound => "Not found",
            ErrorCode::NoRecords => "No records found",
            ErrorCode::Timeout => "Query timed out",
            ErrorCode::WarehouseError => "Query execution failed",
            ErrorCode::ServiceUnavailable => "Cache store unavailable",
            ErrorCode::InternalError => "Internal server error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error returned by every handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,

    /// Human-readable message, serialized as `error`.
    #[serde(rename = "error")]
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Error with the code's default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors
    // ========================================================================

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingField,
            format!("Required field '{}' is missing", field),
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn no_records() -> Self {
        Self::from_code(ErrorCode::NoRecords)
    }

    pub fn timeout(operation: &str) -> Self {
        Self::new(ErrorCode::Timeout, format!("{} timed out", operation))
    }

    pub fn warehouse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::WarehouseError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

/// Library errors reaching a handler.
///
/// On the query path only warehouse errors and invalid input get this far;
/// store errors appear only from the maintenance endpoints.
impl From<QuarryError> for ApiError {
    fn from(err: QuarryError) -> Self {
        match err {
            QuarryError::Validation(ValidationError::MissingField { field }) => {
                ApiError::missing_field(&field)
            }
            QuarryError::Validation(e @ ValidationError::InvalidValue { .. }) => {
                ApiError::invalid_input(e.to_string())
            }
            QuarryError::Warehouse(WarehouseError::Timeout { after }) => {
                tracing::error!(after_ms = after.as_millis() as u64, "Warehouse timeout");
                ApiError::timeout("Query execution")
            }
            QuarryError::Warehouse(e) => {
                tracing::error!(error = %e, "Warehouse error");
                ApiError::warehouse_error(e.to_string())
            }
            QuarryError::Store(e) => {
                tracing::warn!(error = %e, "Cache store error");
                ApiError::service_unavailable(e.to_string())
            }
            QuarryError::Planner(PlannerError::NoCandidates) => ApiError::missing_field("tables"),
            QuarryError::Planner(e @ PlannerError::UnknownTable { .. }) => {
                ApiError::new(ErrorCode::UnknownTable, e.to_string())
            }
            QuarryError::Planner(e @ PlannerError::Unreachable { .. }) => {
                ApiError::new(ErrorCode::NoJoinPath, e.to_string())
            }
            QuarryError::Admission(e) => ApiError::internal_error(e.to_string()),
            QuarryError::Config(e) => ApiError::internal_error(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON serialization error: {:?}", err);
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::StoreError;
    use std::time::Duration;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::InvalidInput.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::MissingField.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::NoRecords.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::Timeout.status_code(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(
            ErrorCode::WarehouseError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ErrorCode::ServiceUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_no_records_body() -> Result<(), serde_json::Error> {
        let json = serde_json::to_value(ApiError::no_records())?;
        assert_eq!(json["code"], "NO_RECORDS");
        assert_eq!(json["error"], "No records found");
        assert!(json.get("details").is_none());
        Ok(())
    }

    #[test]
    fn test_api_error_with_details() {
        let err = ApiError::invalid_input("bad sql").with_details(serde_json::json!({
            "field": "sql",
        }));
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert_eq!(err.details, Some(serde_json::json!({ "field": "sql" })));
    }

    #[test]
    fn test_api_error_roundtrip() -> Result<(), serde_json::Error> {
        let err = ApiError::warehouse_error("relation \"nope\" does not exist");
        let json = serde_json::to_string(&err)?;
        let back: ApiError = serde_json::from_str(&json)?;
        assert_eq!(back, err);
        Ok(())
    }

    #[test]
    fn test_quarry_error_mapping() {
        let err: ApiError = QuarryError::from(ValidationError::MissingField {
            field: "sql".to_string(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::MissingField);
        assert!(err.message.contains("sql"));

        let err: ApiError = QuarryError::from(WarehouseError::Execution {
            message: "syntax error at or near \"SELEC\"".to_string(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::WarehouseError);
        assert_eq!(err.message, "syntax error at or near \"SELEC\"");

        let err: ApiError = QuarryError::from(WarehouseError::Timeout {
            after: Duration::from_secs(120),
        })
        .into();
        assert_eq!(err.status_code(), StatusCode::REQUEST_TIMEOUT);

        let err: ApiError = QuarryError::from(StoreError::Unavailable {
            reason: "connection refused".to_string(),
        })
        .into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let err: ApiError = QuarryError::from(PlannerError::UnknownTable {
            table: "ghosts".to_string(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::UnknownTable);
    }

    #[test]
    fn test_display() {
        let err = ApiError::timeout("Query execution");
        assert_eq!(err.to_string(), "Timeout: Query execution timed out");
    }
}
