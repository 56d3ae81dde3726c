use thiserror::Error;

/// Expected failures while bridging a single message.
///
/// None of these are fatal: the bridge logs them and drops the message.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("cannot infer device type from device id '{0}'")]
    UnknownDeviceType(String),

    #[error("no catalog entries for device type '{0}'")]
    MissingCatalog(String),

    #[error("invalid payload for command '{command}': {reason}")]
    InvalidPayload { command: String, reason: String },

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("command '{command}' is claimed by more than one matcher ({kind})")]
    OverlappingCommand { command: String, kind: String },
}
