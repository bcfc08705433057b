// src/error.rs
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// Credentials were rejected or no token could be obtained.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Network failure, throttling or a server-side error that outlived the retry budget.
    #[error("Transient error: {message}")]
    Transient { status: Option<u16>, message: String },

    /// The request itself was refused (4xx other than 404/429).
    #[error("Permanent error: {message}")]
    Permanent { status: Option<u16>, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Method not found")]
    MethodNotFound,

    #[error("Parse error")]
    ParseError,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ConnectorError {
    pub fn transient(status: Option<u16>, message: impl Into<String>) -> Self {
        ConnectorError::Transient {
            status,
            message: message.into(),
        }
    }

    pub fn permanent(status: Option<u16>, message: impl Into<String>) -> Self {
        ConnectorError::Permanent {
            status,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        match self {
            ConnectorError::Auth(_) => "auth_error",
            ConnectorError::Transient { .. } => "transient_error",
            ConnectorError::Permanent { .. } => "permanent_error",
            ConnectorError::NotFound(_) => "not_found",
            ConnectorError::UnsupportedFormat(_) => "unsupported_format",
            ConnectorError::InvalidParams(_) => "invalid_params",
            ConnectorError::ToolNotFound(_) => "tool_not_found",
            ConnectorError::MethodNotFound => "method_not_found",
            ConnectorError::ParseError => "parse_error",
            _ => "internal_error",
        }
    }

    /// HTTP status observed on the wire, when the error came from one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ConnectorError::Transient { status, .. } | ConnectorError::Permanent { status, .. } => {
                *status
            }
            ConnectorError::NotFound(_) => Some(404),
            _ => None,
        }
    }

    /// Message safe to hand to the host: no variant prefix, no transport internals.
    pub fn public_message(&self) -> String {
        match self {
            ConnectorError::Auth(msg)
            | ConnectorError::NotFound(msg)
            | ConnectorError::UnsupportedFormat(msg)
            | ConnectorError::InvalidParams(msg) => msg.clone(),
            ConnectorError::Transient { message, .. } | ConnectorError::Permanent { message, .. } => {
                message.clone()
            }
            ConnectorError::ToolNotFound(name) => format!("Unknown tool: {}", name),
            ConnectorError::Io(_) | ConnectorError::SerdeJson(_) | ConnectorError::InternalError(_) => {
                "Internal error while processing the request".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn to_jsonrpc_error(&self) -> serde_json::Value {
        let (code, message) = match self {
            ConnectorError::ToolNotFound(name) => (-32602, format!("Tool not found: {}", name)),
            ConnectorError::InvalidParams(msg) => (-32602, msg.to_string()),
            ConnectorError::MethodNotFound => (-32601, "Method not found".to_string()),
            ConnectorError::ParseError => (-32700, "Parse error".to_string()),
            ConnectorError::SerdeJson(err) => (-32602, format!("Invalid params: {}", err)),
            err => (-32603, err.public_message()),
        };

        json!({
            "code": code,
            "message": message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_the_host_taxonomy() {
        assert_eq!(ConnectorError::Auth("x".into()).code_str(), "auth_error");
        assert_eq!(
            ConnectorError::transient(Some(503), "busy").code_str(),
            "transient_error"
        );
        assert_eq!(
            ConnectorError::permanent(Some(403), "denied").code_str(),
            "permanent_error"
        );
        assert_eq!(ConnectorError::NotFound("x".into()).code_str(), "not_found");
        assert_eq!(
            ConnectorError::UnsupportedFormat("x".into()).code_str(),
            "unsupported_format"
        );
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let io = ConnectorError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "/tmp/secret-path exploded",
        ));
        assert!(!io.public_message().contains("secret-path"));
        assert_eq!(io.code_str(), "internal_error");
    }

    #[test]
    fn jsonrpc_codes() {
        assert_eq!(
            ConnectorError::MethodNotFound.to_jsonrpc_error()["code"],
            -32601
        );
        assert_eq!(
            ConnectorError::ToolNotFound("nope".into()).to_jsonrpc_error()["code"],
            -32602
        );
        assert_eq!(ConnectorError::ParseError.to_jsonrpc_error()["code"], -32700);
    }

    #[test]
    fn status_is_carried() {
        assert_eq!(ConnectorError::transient(Some(429), "slow").status(), Some(429));
        assert_eq!(ConnectorError::transient(None, "io").status(), None);
        assert_eq!(ConnectorError::NotFound("gone".into()).status(), Some(404));
    }
}
