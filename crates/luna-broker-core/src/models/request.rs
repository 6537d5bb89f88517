use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One request line on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerRequest {
    /// Caller-generated correlation id.
    #[serde(default)]
    pub request_id: String,

    #[serde(default)]
    pub operation: String,

    /// Opcode-specific payload, parsed into a typed record by the dispatcher.
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,

    #[serde(default)]
    pub timestamp: Option<String>,

    /// Reserved for request integrity; no scheme is defined yet and it is not checked.
    #[serde(default)]
    pub signature: Option<String>,
}

impl BrokerRequest {
    pub fn new(operation: impl Into<String>, parameters: Option<serde_json::Value>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            operation: operation.into(),
            parameters,
            timestamp: Some(now_rfc3339()),
            signature: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}

/// One response line on the wire.
///
/// Exactly one of `data` / `error_message` is set. Use the constructors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub timestamp: String,
}

impl BrokerResponse {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error_message: None,
            timestamp: now_rfc3339(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error_message: Some(message.into()),
            timestamp: now_rfc3339(),
        }
    }
}

impl From<crate::error::BrokerError> for BrokerResponse {
    fn from(err: crate::error::BrokerError) -> Self {
        Self::failure(err.to_string())
    }
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_accepts_wire_shape() {
        let line = r#"{"requestId":"r-1","operation":"file.read","parameters":{"filePath":"C:\\ProgramData\\Luna\\a.txt"},"timestamp":"2024-05-01T10:00:00Z","signature":null}"#;
        let request: BrokerRequest = serde_json::from_str(line).unwrap();
        assert_eq!(request.request_id, "r-1");
        assert_eq!(request.operation, "file.read");
        assert!(request.signature.is_none());
    }

    #[test]
    fn test_response_always_carries_both_keys() {
        let ok = serde_json::to_value(BrokerResponse::success(json!({"x": 1}))).unwrap();
        assert_eq!(ok["success"], true);
        assert_eq!(ok["data"]["x"], 1);
        assert!(ok["errorMessage"].is_null());
        assert!(ok.get("errorMessage").is_some());
        assert!(ok["timestamp"].as_str().unwrap().ends_with('Z'));

        let err = serde_json::to_value(BrokerResponse::failure("Unknown operation")).unwrap();
        assert_eq!(err["success"], false);
        assert!(err["data"].is_null());
        assert!(err.get("data").is_some());
        assert_eq!(err["errorMessage"], "Unknown operation");
    }
}
