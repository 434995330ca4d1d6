use rust_decimal::Decimal;
use thiserror::Error;

/// Failures talking to a venue connector. Retriable from the caller's
/// point of view; during scanning they degrade coverage instead.
#[derive(Error, Debug, Clone)]
pub enum ConnectorError {
    #[error("connector unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("order rejected by venue: {0}")]
    OrderRejected(String),

    #[error("operation not supported by this venue")]
    Unsupported,

    #[error("malformed venue response: {0}")]
    BadResponse(String),
}

/// Top-level error taxonomy. Every variant maps to a stable wire code so
/// callers can tell retry-worthy failures from terminal ones.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authentication failed: {0}")]
    AuthInvalid(String),

    #[error("nonce already used within the replay window")]
    AuthReplayDetected,

    #[error("confirmation token invalid")]
    TokenInvalid,

    #[error("confirmation token expired")]
    TokenExpired,

    #[error("confirmation token already used")]
    TokenUsed,

    #[error("platform '{0}' is not on the allow-list")]
    PolicyPlatformBlocked(String),

    #[error("requested slippage {requested} bps exceeds maximum {max} bps")]
    PolicySlippageExceeded { requested: u32, max: u32 },

    #[error("order notional {notional} exceeds limit {limit}")]
    PolicyOrderLimit { notional: Decimal, limit: Decimal },

    #[error("kill switch is engaged")]
    PolicyKillSwitch,

    #[error("execution rejected: {0}")]
    ExecutionRejected(String),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Stable machine-readable code carried on the wire envelope.
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::Validation(_) => "VALIDATION_ERROR",
            AgentError::AuthInvalid(_) => "AUTH_INVALID",
            AgentError::AuthReplayDetected => "AUTH_REPLAY_DETECTED",
            AgentError::TokenInvalid => "CONFIRMATION_TOKEN_INVALID",
            AgentError::TokenExpired => "CONFIRMATION_TOKEN_EXPIRED",
            AgentError::TokenUsed => "CONFIRMATION_TOKEN_USED",
            AgentError::PolicyPlatformBlocked(_) => "POLICY_PLATFORM_BLOCKED",
            AgentError::PolicySlippageExceeded { .. } => "POLICY_SLIPPAGE_EXCEEDED",
            AgentError::PolicyOrderLimit { .. } => "POLICY_ORDER_LIMIT",
            AgentError::PolicyKillSwitch => "POLICY_KILL_SWITCH",
            AgentError::ExecutionRejected(_) => "EXECUTION_REJECTED",
            AgentError::Connector(_) => "CONNECTOR_UNAVAILABLE",
            AgentError::InsufficientFunds(_) => "INSUFFICIENT_FUNDS",
            AgentError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(AgentError::AuthReplayDetected.code(), "AUTH_REPLAY_DETECTED");
        assert_eq!(AgentError::TokenUsed.code(), "CONFIRMATION_TOKEN_USED");
        assert_eq!(
            AgentError::Connector(ConnectorError::Timeout(5)).code(),
            "CONNECTOR_UNAVAILABLE"
        );
    }
}
