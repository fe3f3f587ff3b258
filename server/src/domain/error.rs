//! Domain error type
//!
//! Every failure surfaced by ingest and query carries a stable error code.
//! Variant payloads stay human readable; callers that branch should use
//! [`TraceError::code`].

use thiserror::Error;

use crate::data::DataError;

pub const CODE_INVALID_PARAM: &str = "common.invalid_param";
pub const CODE_INTERNAL: &str = "common.internal";
pub const CODE_RPC: &str = "common.rpc";
pub const CODE_CANCELLED: &str = "common.cancelled";
pub const CODE_FILTER_INVALID: &str = "filter.invalid";
pub const CODE_NOT_IN_SPACE: &str = "trace.not_in_space";
pub const CODE_EXPIRED: &str = "trace.expired";
pub const CODE_ID_INSUFFICIENT: &str = "idgen.insufficient";
pub const CODE_ID_COUNTER_RECYCLE: &str = "idgen.counter_recycle";
pub const CODE_PLATFORM_NOT_CONFIGURED: &str = "config.platform_not_configured";
pub const CODE_CONFIG: &str = "config.invalid";

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("downstream call failed: {0}")]
    Rpc(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("trace does not belong to workspace {workspace_id}")]
    NotInSpace { workspace_id: String },

    #[error("trace expired: query end {query_end_time} is before retention start {retention_start}")]
    Expired {
        query_end_time: i64,
        retention_start: i64,
    },

    #[error("insufficient ids: requested {requested}, allocated {allocated}")]
    IdInsufficient { requested: usize, allocated: usize },

    #[error("id counter recycled for key {key}: counter {counter} below request {requested}")]
    IdCounterRecycle {
        key: String,
        counter: i64,
        requested: i64,
    },

    #[error("platform not configured: {0}")]
    PlatformNotConfigured(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl TraceError {
    /// Stable error code reported to callers
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParam(_) => CODE_INVALID_PARAM,
            Self::InvalidFilter(_) => CODE_FILTER_INVALID,
            Self::Internal(_) => CODE_INTERNAL,
            Self::Rpc(_) => CODE_RPC,
            Self::Cancelled => CODE_CANCELLED,
            Self::NotInSpace { .. } => CODE_NOT_IN_SPACE,
            Self::Expired { .. } => CODE_EXPIRED,
            Self::IdInsufficient { .. } => CODE_ID_INSUFFICIENT,
            Self::IdCounterRecycle { .. } => CODE_ID_COUNTER_RECYCLE,
            Self::PlatformNotConfigured(_) => CODE_PLATFORM_NOT_CONFIGURED,
            Self::Config(_) => CODE_CONFIG,
        }
    }

    /// Caller-side mistakes; everything else is a server or dependency fault
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidParam(_)
                | Self::InvalidFilter(_)
                | Self::NotInSpace { .. }
                | Self::Expired { .. }
        )
    }
}

impl From<DataError> for TraceError {
    fn from(err: DataError) -> Self {
        if err.is_remote() {
            Self::Rpc(err.to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}

pub type TraceResult<T> = Result<T, TraceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(TraceError::InvalidParam("x".into()).code(), "common.invalid_param");
        assert_eq!(TraceError::Internal("x".into()).code(), "common.internal");
        assert_eq!(TraceError::Rpc("x".into()).code(), "common.rpc");
        assert_eq!(
            TraceError::NotInSpace {
                workspace_id: "w".into()
            }
            .code(),
            "trace.not_in_space"
        );
        assert_eq!(
            TraceError::Expired {
                query_end_time: 1,
                retention_start: 2
            }
            .code(),
            "trace.expired"
        );
        assert_eq!(
            TraceError::IdInsufficient {
                requested: 3,
                allocated: 1
            }
            .code(),
            "idgen.insufficient"
        );
        assert_eq!(
            TraceError::PlatformNotConfigured("x".into()).code(),
            "config.platform_not_configured"
        );
    }

    #[test]
    fn test_data_error_mapping() {
        let rpc: TraceError = DataError::Upstream("timeout".into()).into();
        assert_eq!(rpc.code(), CODE_RPC);

        let internal: TraceError = DataError::Mapping("bad row".into()).into();
        assert_eq!(internal.code(), CODE_INTERNAL);
    }

    #[test]
    fn test_client_errors() {
        assert!(TraceError::InvalidFilter("bad".into()).is_client_error());
        assert!(!TraceError::Rpc("down".into()).is_client_error());
        assert!(!TraceError::Cancelled.is_client_error());
    }
}
