/// Shared error type used across all coordination crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    /// A bus call failed after exhausting its retry budget.
    #[error("transport: {0}")]
    Transport(String),

    #[error("message missing 'type' field")]
    MissingType,

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("unknown compression method: {0}")]
    InvalidCompression(String),

    #[error("parse: {0}")]
    Parse(String),

    #[error("room_id not set - cannot broadcast")]
    NoRoom,

    #[error("coordinator_id not set - cannot send to coordinator")]
    NoCoordinator,

    #[error("unsupported invite URL scheme: {0}")]
    UnsupportedInvite(String),

    #[error("unsupported local invite: {0}")]
    UnsupportedLocalInvite(String),

    #[error("permission request timed out: {0}")]
    PermissionTimeout(String),

    #[error("rotate() can only be called on root contexts")]
    NotRoot,

    #[error("migration conflict: {0}")]
    MigrationConflict(String),

    #[error("corrupt JSONL: {0}")]
    CorruptJsonl(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable error-kind string, written to stderr by CLI drivers.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "IoError",
            Error::Json(_) => "JsonError",
            Error::Http(_) => "HttpError",
            Error::Transport(_) => "TransportError",
            Error::MissingType => "MissingType",
            Error::UnknownMessageType(_) => "UnknownMessageType",
            Error::InvalidCompression(_) => "InvalidCompression",
            Error::Parse(_) => "ParseError",
            Error::NoRoom => "NoRoom",
            Error::NoCoordinator => "NoCoordinator",
            Error::UnsupportedInvite(_) => "UnsupportedInvite",
            Error::UnsupportedLocalInvite(_) => "UnsupportedLocalInvite",
            Error::PermissionTimeout(_) => "PermissionTimeout",
            Error::NotRoot => "NotRoot",
            Error::MigrationConflict(_) => "MigrationConflict",
            Error::CorruptJsonl(_) => "CorruptJSONL",
            Error::Auth(_) => "AuthError",
            Error::NotFound(_) => "NotFound",
            Error::Config(_) => "ConfigError",
            Error::Other(_) => "Error",
        }
    }

    /// Whether this error came from decoding an inbound message.
    ///
    /// Parse-class errors are skipped by consumers (cursor advanced) rather
    /// than surfaced.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Error::Json(_)
                | Error::MissingType
                | Error::UnknownMessageType(_)
                | Error::InvalidCompression(_)
                | Error::Parse(_)
                | Error::CorruptJsonl(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(Error::Transport("x".into()).kind(), "TransportError");
        assert_eq!(Error::MissingType.kind(), "MissingType");
        assert_eq!(Error::UnknownMessageType("z".into()).kind(), "UnknownMessageType");
        assert_eq!(Error::InvalidCompression("lz4".into()).kind(), "InvalidCompression");
        assert_eq!(Error::NotRoot.kind(), "NotRoot");
        assert_eq!(Error::UnsupportedInvite("ftp".into()).kind(), "UnsupportedInvite");
        assert_eq!(Error::MigrationConflict("x".into()).kind(), "MigrationConflict");
    }

    #[test]
    fn parse_error_classification() {
        assert!(Error::MissingType.is_parse_error());
        assert!(Error::UnknownMessageType("x".into()).is_parse_error());
        assert!(Error::InvalidCompression("x".into()).is_parse_error());
        assert!(!Error::Transport("x".into()).is_parse_error());
        assert!(!Error::NoRoom.is_parse_error());
    }
}
