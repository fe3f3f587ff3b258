//! Topic error types

use std::fmt;

/// Error type for topic operations
#[derive(Debug)]
pub enum TopicError {
    /// Subscription ended
    ChannelClosed,
    /// Connection error (Redis)
    Connection(String),
    /// Payload could not be encoded or decoded
    Serialization(String),
    /// Stream command failed
    Stream(String),
    /// Consumer group error
    ConsumerGroup(String),
    /// Publish did not complete in time
    Timeout(u64),
    Config(String),
}

impl std::error::Error for TopicError {}

impl fmt::Display for TopicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicError::ChannelClosed => write!(f, "channel closed"),
            TopicError::Connection(msg) => write!(f, "connection error: {}", msg),
            TopicError::Serialization(msg) => write!(f, "serialization error: {}", msg),
            TopicError::Stream(msg) => write!(f, "stream error: {}", msg),
            TopicError::ConsumerGroup(msg) => write!(f, "consumer group error: {}", msg),
            TopicError::Timeout(ms) => write!(f, "publish timed out after {}ms", ms),
            TopicError::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl From<deadpool_redis::PoolError> for TopicError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        TopicError::Connection(err.to_string())
    }
}

impl From<deadpool_redis::redis::RedisError> for TopicError {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        TopicError::Stream(err.to_string())
    }
}

impl From<serde_json::Error> for TopicError {
    fn from(err: serde_json::Error) -> Self {
        TopicError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(TopicError::ChannelClosed.to_string(), "channel closed");
        assert_eq!(
            TopicError::Timeout(250).to_string(),
            "publish timed out after 250ms"
        );
        assert_eq!(
            TopicError::Config("topic is empty".into()).to_string(),
            "configuration error: topic is empty"
        );
    }
}
