//! Bridge error types

use std::fmt;

use webdash_hal::HalError;
use webdash_ipc::ValueKind;

/// Errors surfaced to callers of the bridge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeError {
    /// The interpreter raised an error; carries its textual description
    Runtime(String),
    /// The call succeeded but returned the wrong shape
    TypeMismatch {
        /// Shape the caller asked for
        expected: ValueKind,
        /// Shape the interpreter returned
        found: ValueKind,
    },
    /// The worker went away before replying
    Disconnected,
    /// A URL could not be parsed or resolved
    InvalidUrl(String),
    /// A script element failed to load; aborts bootstrap
    ScriptLoad(String),
    /// Configuration could not be parsed
    Config(String),
    /// Platform failure
    Hal(HalError),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
            BridgeError::TypeMismatch { expected, found } => {
                write!(f, "Type error: expected {} result, received {}", expected, found)
            }
            BridgeError::Disconnected => write!(f, "Worker disconnected before replying"),
            BridgeError::InvalidUrl(url) => write!(f, "Invalid URL: {}", url),
            BridgeError::ScriptLoad(src) => write!(f, "Script failed to load: {}", src),
            BridgeError::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            BridgeError::Hal(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<HalError> for BridgeError {
    fn from(e: HalError) -> Self {
        match e {
            HalError::ScriptLoadFailed(src) => BridgeError::ScriptLoad(src),
            other => BridgeError::Hal(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_load_failures_map_to_their_own_variant() {
        let e: BridgeError = HalError::ScriptLoadFailed("dash.js".to_string()).into();
        assert_eq!(e, BridgeError::ScriptLoad("dash.js".to_string()));

        let e: BridgeError = HalError::ChannelClosed.into();
        assert_eq!(e, BridgeError::Hal(HalError::ChannelClosed));
    }

    #[test]
    fn test_type_mismatch_display() {
        let e = BridgeError::TypeMismatch {
            expected: ValueKind::String,
            found: ValueKind::Binary,
        };
        assert_eq!(
            e.to_string(),
            "Type error: expected string result, received binary"
        );
    }
}
