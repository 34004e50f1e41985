use std::time::Duration;

/// Error code the daemon returns while it is still loading its block index.
pub const RPC_IN_WARMUP: i64 = -28;

/// Error code the daemon returns for unknown transactions and missing index
/// entries.
pub const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The daemon answered with a JSON-RPC error object `{code, message}`.
    #[error("{message} (code {code})")]
    ServerError { code: i64, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("RPC communication failure: {0}")]
    Rpc(#[from] RpcError),

    #[error("invalid daemon data: {0}")]
    InvalidData(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("no daemon nodes are available")]
    NoNodes,

    #[error("{0}")]
    Stopping(&'static str),

    #[error("daemon process exited with status code {code}")]
    ProcessExit { code: i32 },

    #[error("daemon process did not exit within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("daemon process error: {0}")]
    Process(String),

    #[error("zmq error: {0}")]
    Zmq(#[from] zmq::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// The daemon-side error code, if this error came back from the daemon.
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            Self::Rpc(RpcError::ServerError { code, .. }) => Some(*code),
            _ => None,
        }
    }

    pub fn is_warming_up(&self) -> bool {
        self.rpc_code() == Some(RPC_IN_WARMUP)
    }

    pub fn is_not_found(&self) -> bool {
        self.rpc_code() == Some(RPC_INVALID_ADDRESS_OR_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_keeps_code_and_message() {
        let err = CoreError::from(RpcError::ServerError {
            code: -28,
            message: "Loading block index...".to_owned(),
        });
        assert_eq!(err.rpc_code(), Some(-28));
        assert!(err.is_warming_up());
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("Loading block index..."));
    }

    #[test]
    fn non_rpc_errors_have_no_code() {
        let err = CoreError::InvalidArgument("bad range".to_owned());
        assert_eq!(err.rpc_code(), None);
        assert!(!err.is_warming_up());
    }
}
