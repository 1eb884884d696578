//! Connection establishment for the NNTP transport
//!
//! TCP with optional TLS. Certificate validation uses the Mozilla root
//! store via webpki-roots; plain connections are supported for servers on a
//! trusted network (the default NNTP port 119).

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::debug;

use crate::config::NntpConfig;
use crate::error::{GateError, Result};

/// BufReader capacity for article fetches
const BUFREADER_CAPACITY: usize = 64 * 1024;

/// The underlying stream, plain or TLS
pub(super) enum NntpStream {
    Plain(BufReader<TcpStream>),
    Tls(BufReader<TlsStream<TcpStream>>),
}

impl NntpStream {
    /// Open a connection per the server config (no greeting read yet)
    pub(super) async fn open(config: &NntpConfig) -> Result<Self> {
        debug!("connecting to news server {}:{}", config.host, config.port);
        let connect_timeout = Duration::from_secs(config.timeout_secs.max(1));

        let tcp = timeout(
            connect_timeout,
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await
        .map_err(|_| GateError::Timeout)??;

        // Low-latency request/response pattern
        tcp.set_nodelay(true)?;

        if !config.use_tls {
            return Ok(NntpStream::Plain(BufReader::with_capacity(
                BUFREADER_CAPACITY,
                tcp,
            )));
        }

        // Install the ring provider if nothing has claimed the default yet
        use tokio_rustls::rustls::crypto::{CryptoProvider, ring};
        let _ = CryptoProvider::install_default(ring::default_provider());

        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let connector = TlsConnector::from(Arc::new(tls_config));
        let server_name = ServerName::try_from(config.host.clone())
            .map_err(|e| GateError::Tls(format!("invalid server name: {}", e)))?;

        let tls = timeout(connect_timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| GateError::Timeout)?
            .map_err(|e| GateError::Tls(format!("handshake failed: {}", e)))?;

        Ok(NntpStream::Tls(BufReader::with_capacity(
            BUFREADER_CAPACITY,
            tls,
        )))
    }

    /// Read one CRLF-terminated line into `buf` (cleared first)
    pub(super) async fn read_line_bytes(&mut self, buf: &mut Vec<u8>) -> Result<()> {
        buf.clear();
        let n = match self {
            NntpStream::Plain(s) => s.read_until(b'\n', buf).await?,
            NntpStream::Tls(s) => s.read_until(b'\n', buf).await?,
        };
        if n == 0 {
            return Err(GateError::ConnectionClosed);
        }
        while buf.last() == Some(&b'\n') || buf.last() == Some(&b'\r') {
            buf.pop();
        }
        Ok(())
    }

    /// Write raw bytes and flush
    pub(super) async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            NntpStream::Plain(s) => {
                s.get_mut().write_all(bytes).await?;
                s.get_mut().flush().await?;
            }
            NntpStream::Tls(s) => {
                s.get_mut().write_all(bytes).await?;
                s.get_mut().flush().await?;
            }
        }
        Ok(())
    }
}
