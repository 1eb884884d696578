//! NNTP transport
//!
//! One [`NntpTransport`] owns one session to the news server. Sessions are
//! never shared: the export phase gives each newsgroup worker its own
//! transport. Every socket operation is wrapped in the configured timeout
//! and surfaces as a [`GateError::Timeout`] outcome rather than a hang.

mod connection;
mod fetch;
mod response;

pub use fetch::{ArticleOutcome, FetchReport, FetchedArticle};
pub use response::{NntpResponse, codes, parse_status_line};

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info};

use crate::article::Article;
use crate::config::NntpConfig;
use crate::error::{GateError, Result};

use connection::NntpStream;

/// Group selection result: article count and number range on the server
#[derive(Debug, Clone, Copy)]
pub struct GroupStatus {
    /// Estimated article count
    pub count: u64,
    /// Lowest article number present
    pub first: u64,
    /// Highest article number present
    pub last: u64,
}

/// A session to the news server
pub struct NntpTransport {
    stream: NntpStream,
    config: Arc<NntpConfig>,
    current_group: Option<String>,
}

impl NntpTransport {
    /// Connect, read the greeting, and authenticate if credentials are set
    pub async fn connect(config: Arc<NntpConfig>) -> Result<Self> {
        let stream = NntpStream::open(&config).await?;
        let mut transport = Self {
            stream,
            config,
            current_group: None,
        };

        let greeting = transport.read_response().await?;
        debug!("server greeting: {} {}", greeting.code, greeting.message);
        if greeting.code != codes::READY_POSTING_ALLOWED && greeting.code != codes::READY_NO_POSTING
        {
            return Err(GateError::Protocol {
                code: greeting.code,
                message: greeting.message,
            });
        }

        if !transport.config.username.is_empty() {
            transport.authenticate().await?;
        }
        Ok(transport)
    }

    /// Drop the session and build a fresh one (same config)
    ///
    /// The group selection is re-established lazily by the next fetch.
    pub async fn reconnect(&mut self) -> Result<()> {
        info!("reconnecting to news server {}", self.config.host);
        let fresh = Self::connect(Arc::clone(&self.config)).await?;
        *self = fresh;
        Ok(())
    }

    /// AUTHINFO USER / AUTHINFO PASS (RFC 4643)
    async fn authenticate(&mut self) -> Result<()> {
        let user_cmd = format!("AUTHINFO USER {}\r\n", self.config.username);
        self.send_command(&user_cmd).await?;
        let response = self.read_response().await?;

        match response.code {
            codes::AUTH_ACCEPTED => return Ok(()),
            codes::AUTH_CONTINUE => {}
            _ => return Err(GateError::AuthFailed(response.message)),
        }

        let pass_cmd = format!("AUTHINFO PASS {}\r\n", self.config.password);
        self.send_command(&pass_cmd).await?;
        let response = self.read_response().await?;
        if response.code != codes::AUTH_ACCEPTED {
            return Err(GateError::AuthFailed(response.message));
        }
        debug!("authenticated as {}", self.config.username);
        Ok(())
    }

    /// Select a newsgroup; returns its article number range
    pub async fn select_group(&mut self, group: &str) -> Result<GroupStatus> {
        self.send_command(&format!("GROUP {}\r\n", group)).await?;
        let response = self.read_response().await?;
        if response.code == codes::NO_SUCH_GROUP {
            return Err(GateError::NoSuchGroup(group.to_string()));
        }
        if response.code != codes::GROUP_SELECTED {
            return Err(GateError::Protocol {
                code: response.code,
                message: response.message,
            });
        }

        // 211 count first last group
        let mut parts = response.message.split_whitespace();
        let count = parse_number(parts.next())?;
        let first = parse_number(parts.next())?;
        let last = parse_number(parts.next())?;

        self.current_group = Some(group.to_string());
        Ok(GroupStatus { count, first, last })
    }

    /// Group currently selected on this session, if any
    pub fn current_group(&self) -> Option<&str> {
        self.current_group.as_deref()
    }

    /// Fetch one article by number from the selected group
    pub async fn fetch_article(&mut self, number: u64) -> Result<Article> {
        self.send_command(&format!("ARTICLE {}\r\n", number)).await?;
        let response = self.read_response().await?;
        if response.code != codes::ARTICLE_FOLLOWS {
            // 423/430 are classified as NotFound by the fetch pass
            return Err(GateError::Protocol {
                code: response.code,
                message: response.message,
            });
        }

        let raw = self.read_multiline().await?;
        Ok(parse_article_bytes(&raw))
    }

    /// Post an article (two-phase POST, RFC 3977 section 6.3.1)
    pub async fn post(&mut self, article: &Article) -> Result<()> {
        self.send_command("POST\r\n").await?;
        let response = self.read_response().await?;
        if response.code == codes::POSTING_NOT_PERMITTED {
            return Err(GateError::PostingNotPermitted);
        }
        if response.code != codes::SEND_ARTICLE {
            return Err(GateError::Protocol {
                code: response.code,
                message: response.message,
            });
        }

        let wire = article.serialize_for_posting()?;
        self.send_command(&wire).await?;
        self.send_command(".\r\n").await?;

        let response = self.read_response().await?;
        match response.code {
            codes::ARTICLE_POSTED => {
                debug!("posted {}", article.headers.message_id);
                Ok(())
            }
            codes::POSTING_FAILED => Err(GateError::PostingFailed(response.message)),
            _ => Err(GateError::Protocol {
                code: response.code,
                message: response.message,
            }),
        }
    }

    /// Close the session gracefully
    pub async fn quit(&mut self) -> Result<()> {
        self.send_command("QUIT\r\n").await?;
        let _ = self.read_response().await;
        Ok(())
    }

    fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs.max(1))
    }

    async fn send_command(&mut self, command: &str) -> Result<()> {
        timeout(self.op_timeout(), self.stream.write_all(command.as_bytes()))
            .await
            .map_err(|_| GateError::Timeout)?
    }

    async fn read_response(&mut self) -> Result<NntpResponse> {
        let mut line = Vec::with_capacity(256);
        timeout(self.op_timeout(), self.stream.read_line_bytes(&mut line))
            .await
            .map_err(|_| GateError::Timeout)??;
        parse_status_line(&String::from_utf8_lossy(&line))
    }

    /// Read a dot-terminated multi-line block, undoing dot-stuffing
    async fn read_multiline(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(8 * 1024);
        let mut line = Vec::with_capacity(1024);
        let deadline = self.op_timeout();
        loop {
            timeout(deadline, self.stream.read_line_bytes(&mut line))
                .await
                .map_err(|_| GateError::Timeout)??;
            if line == b"." {
                return Ok(data);
            }
            let content: &[u8] = if line.starts_with(b"..") {
                &line[1..]
            } else {
                &line
            };
            data.extend_from_slice(content);
            data.extend_from_slice(b"\r\n");
        }
    }
}

fn parse_number(part: Option<&str>) -> Result<u64> {
    part.and_then(|p| p.parse().ok())
        .ok_or_else(|| GateError::InvalidResponse("malformed GROUP response".to_string()))
}

/// Parse raw article bytes, decoding the body per its declared charset
///
/// Headers are effectively ASCII (non-ASCII hides behind RFC 2047 encoded
/// words), so a lossy UTF-8 view is safe for them; the body is decoded with
/// the Content-Type charset, defaulting to UTF-8.
pub fn parse_article_bytes(raw: &[u8]) -> Article {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (p, p + 4))
        .or_else(|| raw.windows(2).position(|w| w == b"\n\n").map(|p| (p, p + 2)));

    let (head_bytes, body_bytes) = match split {
        Some((head_end, body_start)) => (&raw[..head_end], &raw[body_start..]),
        None => (raw, &raw[raw.len()..]),
    };

    let headers = crate::article::parse_headers(&String::from_utf8_lossy(head_bytes));
    let charset = headers
        .charset()
        .map(crate::charset::charset_from_mime)
        .unwrap_or(crate::charset::FtnCharset::Utf8);
    let body = crate::charset::decode(body_bytes, charset).replace("\r\n", "\n");

    Article { headers, body }
}
