//! Mailbox transport and parsing errors.

use thiserror::Error;

/// Errors raised while talking to a mailbox or parsing what it returned.
#[derive(Error, Debug)]
pub enum EmailError {
    /// Failed to connect to the IMAP server.
    #[error("IMAP connection failed: {0}")]
    ConnectionFailed(String),

    /// TLS/SSL error during connection.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The mailbox password could not be resolved.
    #[error("Credentials not available: {0}")]
    CredentialsNotFound(String),

    /// IMAP protocol error.
    #[error("IMAP protocol error: {0}")]
    ProtocolError(String),

    /// Failed to parse a fetched message.
    #[error("Failed to parse email: {0}")]
    ParseError(String),

    /// Folder not found.
    #[error("IMAP folder '{0}' not found")]
    FolderNotFound(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// The server stopped answering during a session step.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The cursor could not be read or written.
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl EmailError {
    /// Errors that mean the connection is unusable and the watcher should
    /// back off. Everything else concerns a single message.
    pub fn is_transport(&self) -> bool {
        !matches!(self, EmailError::ParseError(_) | EmailError::DatabaseError(_))
    }
}

impl From<async_native_tls::Error> for EmailError {
    fn from(err: async_native_tls::Error) -> Self {
        EmailError::TlsError(err.to_string())
    }
}

impl From<crate::db::DatabaseError> for EmailError {
    fn from(err: crate::db::DatabaseError) -> Self {
        EmailError::DatabaseError(err.to_string())
    }
}

impl From<crate::secrets::SecretError> for EmailError {
    fn from(err: crate::secrets::SecretError) -> Self {
        EmailError::CredentialsNotFound(err.to_string())
    }
}

/// Result type for email operations.
pub type Result<T> = std::result::Result<T, EmailError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(EmailError::ConnectionFailed("refused".into()).is_transport());
        assert!(EmailError::AuthenticationFailed("bad".into()).is_transport());
        assert!(EmailError::FolderNotFound("INBOX".into()).is_transport());
        assert!(!EmailError::ParseError("garbage".into()).is_transport());
        assert!(EmailError::Timeout("connect".into()).is_transport());
    }
}
