use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Gateway request timed out")]
    Timeout,

    #[error("Gateway transport error: {0}")]
    Transport(String),

    #[error("Gateway returned HTTP {0}")]
    Http(u16),

    #[error("Malformed gateway response: {0}")]
    MalformedResponse(String),

    #[error("Gateway rejected request: {code} {message}")]
    Rejected { code: String, message: String },
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Timeout => "GATEWAY_TIMEOUT",
            GatewayError::Transport(_) => "GATEWAY_UNREACHABLE",
            GatewayError::Http(_) => "GATEWAY_HTTP_ERROR",
            GatewayError::MalformedResponse(_) => "GATEWAY_BAD_RESPONSE",
            GatewayError::Rejected { .. } => "GATEWAY_REJECTED",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::Timeout => 504,
            GatewayError::Rejected { .. } => 402,
            _ => 502,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else if e.is_decode() {
            GatewayError::MalformedResponse(e.to_string())
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}
