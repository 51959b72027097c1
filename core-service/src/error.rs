use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Configuration error: {0}")]
    Config(core_runtime::Error),

    #[error("Authentication error: {0}")]
    Auth(#[from] core_auth::AuthError),
}

impl From<core_runtime::Error> for CoreError {
    fn from(error: core_runtime::Error) -> Self {
        match error {
            core_runtime::Error::CapabilityMissing {
                capability,
                message,
            } => CoreError::CapabilityMissing {
                capability,
                message,
            },
            other => CoreError::Config(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_missing_is_preserved() {
        let error = CoreError::from(core_runtime::Error::CapabilityMissing {
            capability: "PushTransport".to_string(),
            message: "inject a Socket.IO client".to_string(),
        });
        assert!(matches!(error, CoreError::CapabilityMissing { ref capability, .. } if capability == "PushTransport"));

        let error = CoreError::from(core_runtime::Error::Config("bad url".to_string()));
        assert!(matches!(error, CoreError::Config(_)));
    }
}
