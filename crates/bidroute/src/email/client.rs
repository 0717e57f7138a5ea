//! IMAP client for the watched mailboxes.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use async_imap::Session;
use async_native_tls::TlsConnector;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::StreamExt;
use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};

use crate::config::MailboxConfig;

use super::error::{EmailError, Result};
use super::transport::{imap_date, MailTransport, TransportFactory};

/// Type alias for the underlying async stream (using async-std compatible TcpStream).
type AsyncTcpStream = async_io::Async<std::net::TcpStream>;

/// Type alias for the TLS stream used by the IMAP session.
type TlsStream = async_native_tls::TlsStream<AsyncTcpStream>;

/// IMAP client that only ever reads: folders are EXAMINEd and bodies are
/// fetched with `BODY.PEEK[]`.
pub struct ImapClient {
    session: Option<Session<TlsStream>>,
    config: MailboxConfig,
    current_folder: Option<String>,
    current_uidvalidity: Option<u32>,
}

impl ImapClient {
    pub fn new(config: MailboxConfig) -> Self {
        Self {
            session: None,
            config,
            current_folder: None,
            current_uidvalidity: None,
        }
    }

    fn password(&self) -> Result<SecretString> {
        if self.config.auth.password_insecure.is_some() {
            warn!(
                "Mailbox '{}' uses passwordInsecure. Consider passwordEnvVar or passwordFile instead.",
                self.config.name
            );
        }
        Ok(self.config.secret_source().resolve()?)
    }

    fn session(&mut self) -> Result<&mut Session<TlsStream>> {
        self.session
            .as_mut()
            .ok_or_else(|| EmailError::ConnectionFailed("Not connected".to_string()))
    }

    /// Returns the UIDVALIDITY of the examined folder.
    pub fn uidvalidity(&self) -> Option<u32> {
        self.current_uidvalidity
    }

    pub fn current_folder(&self) -> Option<&str> {
        self.current_folder.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }
}

#[async_trait]
impl MailTransport for ImapClient {
    async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            debug!("Already connected to IMAP server");
            return Ok(());
        }

        if !self.config.use_tls {
            return Err(EmailError::ConfigError(
                "TLS is required for secure email connections".to_string(),
            ));
        }

        let password = self.password()?;

        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!("Connecting mailbox '{}' to {}", self.config.name, addr);

        // The socket connect blocks the watcher thread, so it carries its own
        // limit. TLS and login are bounded by the watcher.
        let timeout = Duration::from_secs(self.config.fetch_timeout_secs);
        let std_stream = connect_tcp(&self.config.host, self.config.port, timeout)?;
        std_stream
            .set_nonblocking(true)
            .map_err(|e| EmailError::ConnectionFailed(e.to_string()))?;
        let tcp_stream = async_io::Async::new(std_stream)
            .map_err(|e| EmailError::ConnectionFailed(e.to_string()))?;

        let tls = TlsConnector::new();
        let tls_stream = tls.connect(&self.config.host, tcp_stream).await?;

        let client = async_imap::Client::new(tls_stream);
        let session = client
            .login(&self.config.username, password.expose_secret())
            .await
            .map_err(|(e, _)| EmailError::AuthenticationFailed(e.to_string()))?;

        info!("Authenticated mailbox '{}'", self.config.name);
        self.session = Some(session);
        Ok(())
    }

    async fn examine(&mut self, folder: &str) -> Result<u32> {
        let session = self.session()?;

        debug!("Examining folder: {}", folder);

        let mailbox = session.examine(folder).await.map_err(|e| {
            let text = e.to_string();
            if text.contains("Mailbox doesn't exist") || text.contains("NO") {
                EmailError::FolderNotFound(folder.to_string())
            } else {
                EmailError::ProtocolError(text)
            }
        })?;

        let uidvalidity = mailbox.uid_validity.ok_or_else(|| {
            EmailError::ProtocolError("Server did not provide UIDVALIDITY".to_string())
        })?;

        self.current_folder = Some(folder.to_string());
        self.current_uidvalidity = Some(uidvalidity);

        debug!("Folder '{}' opened with UIDVALIDITY={}", folder, uidvalidity);
        Ok(uidvalidity)
    }

    async fn search_since(&mut self, since: NaiveDate) -> Result<Vec<u32>> {
        let query = format!("SINCE {}", imap_date(since));
        let session = self.session()?;
        debug!("Searching with query: {}", query);

        let uids = session
            .uid_search(&query)
            .await
            .map_err(|e| EmailError::ProtocolError(e.to_string()))?;

        let mut uid_list: Vec<u32> = uids.into_iter().collect();
        uid_list.sort_unstable();
        debug!("Found {} messages since {}", uid_list.len(), since);
        Ok(uid_list)
    }

    async fn fetch_peek(&mut self, uid: u32) -> Result<Vec<u8>> {
        let session = self.session()?;

        debug!("Fetching UID {}", uid);

        let mut messages = session
            .uid_fetch(uid.to_string(), "BODY.PEEK[]")
            .await
            .map_err(|e| EmailError::ProtocolError(e.to_string()))?;

        let message = messages
            .next()
            .await
            .ok_or_else(|| EmailError::ProtocolError(format!("Message with UID {} not found", uid)))?
            .map_err(|e| EmailError::ProtocolError(e.to_string()))?;

        let body = message
            .body()
            .ok_or_else(|| EmailError::ProtocolError("Message has no body".to_string()))?
            .to_vec();

        // Drain the rest of the response so the session stays usable.
        while messages.next().await.is_some() {}

        Ok(body)
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            debug!("Disconnecting mailbox '{}'", self.config.name);
            session
                .logout()
                .await
                .map_err(|e| EmailError::ProtocolError(e.to_string()))?;
        }
        self.current_folder = None;
        self.current_uidvalidity = None;
        Ok(())
    }
}

/// Tries every resolved address, each under `timeout`.
fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| EmailError::ConnectionFailed(format!("Cannot resolve {}: {}", host, e)))?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                debug!("Connect to {} timed out", addr);
                last_error = Some(EmailError::Timeout(format!(
                    "connect to {} after {}s",
                    addr,
                    timeout.as_secs()
                )));
            }
            Err(e) => {
                debug!("Connect to {} failed: {}", addr, e);
                last_error = Some(EmailError::ConnectionFailed(e.to_string()));
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        EmailError::ConnectionFailed(format!("{} resolved to no addresses", host))
    }))
}

impl Drop for ImapClient {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!("ImapClient dropped without explicit disconnect - session will be closed");
        }
    }
}

/// Builds an `ImapClient` per poll cycle.
pub struct ImapTransportFactory;

impl TransportFactory for ImapTransportFactory {
    fn create(&self, config: &MailboxConfig) -> Box<dyn MailTransport> {
        Box::new(ImapClient::new(config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MailboxAuth;

    fn create_test_config() -> MailboxConfig {
        serde_yaml::from_str(
            "name: sales\nhost: imap.example.com\nusername: sales@supplier.com\n",
        )
        .unwrap()
    }

    #[test]
    fn test_client_creation() {
        let client = ImapClient::new(create_test_config());
        assert!(!client.is_connected());
        assert_eq!(client.uidvalidity(), None);
    }

    #[tokio::test]
    async fn test_tls_required() {
        let mut config = create_test_config();
        config.use_tls = false;

        let mut client = ImapClient::new(config);
        let result = client.connect().await;
        assert!(matches!(result.unwrap_err(), EmailError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let mut config = create_test_config();
        config.auth = MailboxAuth::default();

        let mut client = ImapClient::new(config);
        let result = client.connect().await;
        assert!(matches!(result.unwrap_err(), EmailError::CredentialsNotFound(_)));
    }

    #[test]
    fn test_connect_tcp_reports_refused_port() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect_tcp("127.0.0.1", port, Duration::from_secs(2)).unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let mut client = ImapClient::new(create_test_config());
        assert!(matches!(
            client.examine("INBOX").await.unwrap_err(),
            EmailError::ConnectionFailed(_)
        ));
        assert!(client.disconnect().await.is_ok());
    }
}
