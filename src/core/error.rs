use thiserror::Error;

#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Line protocol error: {0}")]
    Protocol(String),

    #[error("Subscription rejected: {0}")]
    Subscription(String),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(u64),

    #[error("Connection limit reached: {max} live connections")]
    MaxConnections { max: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Channel send error")]
    ChannelSend,

    #[error("Network error: {0}")]
    Network(String),
}

/// Result type alias for iotpulse operations
pub type Result<T> = std::result::Result<T, PulseError>;

impl PulseError {
    /// Creates a new invalid argument error
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Creates a new protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    /// Creates a new subscription error
    pub fn subscription<S: Into<String>>(msg: S) -> Self {
        Self::Subscription(msg.into())
    }

    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    /// Returns true if the caller can retry or carry on after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(_) | Self::ChannelSend => true,
            Self::Subscription(_) | Self::Protocol(_) => true,
            Self::ConnectionNotFound(_) | Self::MaxConnections { .. } => true,
            _ => false,
        }
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "validation",
            Self::Protocol(_) => "protocol",
            Self::Subscription(_) => "subscription",
            Self::ConnectionNotFound(_) | Self::MaxConnections { .. } => "connection",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Join(_) => "async",
            Self::ChannelSend => "channel",
            Self::Network(_) => "network",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PulseError::invalid_argument("retention time has to be positive");
        assert_eq!(err.to_string(), "Invalid argument: retention time has to be positive");
        assert_eq!(err.category(), "validation");
    }

    #[test]
    fn test_error_recoverability() {
        assert!(PulseError::network("socket reset").is_recoverable());
        assert!(PulseError::subscription("bad filter").is_recoverable());
        assert!(!PulseError::config("invalid config").is_recoverable());
        assert!(!PulseError::invalid_argument("negative").is_recoverable());
    }

    #[test]
    fn test_connection_limit_error() {
        let err = PulseError::MaxConnections { max: 16 };
        assert_eq!(err.to_string(), "Connection limit reached: 16 live connections");
        assert_eq!(err.category(), "connection");
    }
}
