//! Control API request and response types
//!
//! The request set is a closed enum, one variant per request kind, so the
//! front end talks to the service through typed values dispatched by
//! pattern matching rather than a command registry.

use serde::{Deserialize, Serialize};

/// The closed set of requests the service accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum ProvisionRequest {
    /// Provision a client with a freshly generated key pair
    GenerateConfig,
    /// Provision a client for a caller-supplied public key
    ConfigForKey {
        /// Base64-encoded client public key
        public_key: String,
    },
    /// Remove a provisioned client and free its address
    Revoke {
        /// Base64-encoded client public key
        public_key: String,
    },
    /// Read the device's current peer table
    ListPeers,
    /// Report address pool usage
    PoolStatus,
}

/// API request envelope from a front end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    /// Request ID for tracking
    #[serde(default = "default_request_id")]
    pub id: String,

    /// The request itself
    #[serde(flatten)]
    pub request: ProvisionRequest,
}

impl ApiRequest {
    /// Create a new API request
    pub fn new(id: String, request: ProvisionRequest) -> Self {
        Self { id, request }
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> Result<Self, ApiError> {
        serde_json::from_str(json).map_err(|e| ApiError::ParseError(e.to_string()))
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String, ApiError> {
        serde_json::to_string(self).map_err(|e| ApiError::SerializationError(e.to_string()))
    }
}

/// API response to the front end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    /// Request ID this response corresponds to
    pub id: String,

    /// Whether the request was successful
    pub success: bool,

    /// Optional result data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Optional error information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl ApiResponse {
    /// Create a successful response
    pub fn success(id: String, data: Option<serde_json::Value>) -> Self {
        Self {
            id,
            success: true,
            data,
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: String, error: ApiError) -> Self {
        Self {
            id,
            success: false,
            data: None,
            error: Some(error),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String, ApiError> {
        serde_json::to_string(self).map_err(|e| ApiError::SerializationError(e.to_string()))
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> Result<Self, ApiError> {
        serde_json::from_str(json).map_err(|e| ApiError::ParseError(e.to_string()))
    }
}

/// API error types; the tag mirrors the provisioning error taxonomy so a
/// front end can phrase user-facing messages per kind
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
pub enum ApiError {
    /// Failed to parse request
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Failed to serialize response
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// No free addresses left in the pool
    #[error("Address pool exhausted")]
    AllocationExhausted,

    /// Caller-supplied key material is malformed
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Config rendering failed
    #[error("Render error: {0}")]
    RenderError(String),

    /// The WireGuard interface does not exist yet
    #[error("Device not ready: {0}")]
    DeviceNotReady(String),

    /// The device rejected the mutation
    #[error("Device error: {0}")]
    DeviceError(String),

    /// Device mutated but state not durably saved (drift)
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<crate::error::ProvisionError> for ApiError {
    fn from(err: crate::error::ProvisionError) -> Self {
        use crate::error::ProvisionError;
        match err {
            ProvisionError::AllocationExhausted => ApiError::AllocationExhausted,
            ProvisionError::InvalidKey(msg) => ApiError::InvalidKey(msg),
            ProvisionError::Render(msg) => ApiError::RenderError(msg),
            ProvisionError::DeviceNotReady(msg) => ApiError::DeviceNotReady(msg),
            ProvisionError::Device(msg) => ApiError::DeviceError(msg),
            ProvisionError::Persistence(msg) => ApiError::PersistenceError(msg),
            ProvisionError::Config(msg) => ApiError::ConfigError(msg),
            ProvisionError::Io(e) => ApiError::InternalError(e.to_string()),
        }
    }
}

fn default_request_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("req-{}", COUNTER.fetch_add(1, Ordering::SeqCst))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_json_round_trip() {
        let req = ApiRequest::new(
            "test-1".to_string(),
            ProvisionRequest::ConfigForKey {
                public_key: "abc".to_string(),
            },
        );

        let json = req.to_json().unwrap();
        assert!(json.contains("\"request\":\"config_for_key\""));

        let parsed = ApiRequest::from_json(&json).unwrap();
        assert_eq!(req.id, parsed.id);
        assert_eq!(req.request, parsed.request);
    }

    #[test]
    fn test_request_id_defaults() {
        let parsed = ApiRequest::from_json("{\"request\":\"generate_config\"}").unwrap();
        assert!(parsed.id.starts_with("req-"));
        assert_eq!(parsed.request, ProvisionRequest::GenerateConfig);
    }

    #[test]
    fn test_unknown_request_rejected() {
        assert!(ApiRequest::from_json("{\"request\":\"make_coffee\"}").is_err());
    }

    #[test]
    fn test_response_success() {
        let resp = ApiResponse::success(
            "test-1".to_string(),
            Some(serde_json::json!({"address": "10.8.0.3"})),
        );
        assert!(resp.success);
        assert!(resp.data.is_some());
        assert!(resp.error.is_none());
    }

    #[test]
    fn test_response_error_round_trip() {
        let resp = ApiResponse::error("test-1".to_string(), ApiError::AllocationExhausted);
        let json = resp.to_json().unwrap();
        assert!(json.contains("allocation_exhausted"));

        let parsed = ApiResponse::from_json(&json).unwrap();
        assert!(!parsed.success);
        assert!(matches!(parsed.error, Some(ApiError::AllocationExhausted)));
    }

    #[test]
    fn test_error_conversion_keeps_kind() {
        let err = crate::error::ProvisionError::Persistence("save failed".to_string());
        let api_err: ApiError = err.into();
        assert!(matches!(api_err, ApiError::PersistenceError(_)));
    }
}
