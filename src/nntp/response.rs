//! NNTP response parsing and status codes (RFC 3977)

use crate::error::{GateError, Result};

/// A single-line NNTP status response
#[derive(Debug, Clone)]
pub struct NntpResponse {
    /// 3-digit response code
    pub code: u16,
    /// Status message after the code
    pub message: String,
}

impl NntpResponse {
    /// Check if response indicates success (2xx)
    pub fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// Check if response indicates continuation (3xx)
    pub fn is_continuation(&self) -> bool {
        self.code >= 300 && self.code < 400
    }
}

/// Parse a status line: `code SP message`
pub fn parse_status_line(line: &str) -> Result<NntpResponse> {
    let line = line.trim_end();
    let code_part = line.split_whitespace().next().unwrap_or("");
    let code: u16 = code_part
        .parse()
        .map_err(|_| GateError::InvalidResponse(format!("bad status line: {:?}", line)))?;
    if !(100..=599).contains(&code) {
        return Err(GateError::InvalidResponse(format!(
            "status code out of range: {:?}",
            line
        )));
    }
    let message = line[code_part.len()..].trim_start().to_string();
    Ok(NntpResponse { code, message })
}

/// NNTP response codes the gateway acts on
pub mod codes {
    /// Server ready, posting allowed
    pub const READY_POSTING_ALLOWED: u16 = 200;
    /// Server ready, no posting
    pub const READY_NO_POSTING: u16 = 201;
    /// Group selected
    pub const GROUP_SELECTED: u16 = 211;
    /// Article follows
    pub const ARTICLE_FOLLOWS: u16 = 220;
    /// Article posted successfully
    pub const ARTICLE_POSTED: u16 = 240;
    /// Authentication accepted (RFC 4643)
    pub const AUTH_ACCEPTED: u16 = 281;
    /// Send article to be posted
    pub const SEND_ARTICLE: u16 = 340;
    /// Continue with authentication
    pub const AUTH_CONTINUE: u16 = 381;
    /// No such newsgroup
    pub const NO_SUCH_GROUP: u16 = 411;
    /// No article with that number
    pub const NO_SUCH_ARTICLE_NUMBER: u16 = 423;
    /// No article with that message-id
    pub const NO_SUCH_ARTICLE_ID: u16 = 430;
    /// Posting not permitted
    pub const POSTING_NOT_PERMITTED: u16 = 440;
    /// Posting failed
    pub const POSTING_FAILED: u16 = 441;
    /// Authentication rejected
    pub const AUTH_REJECTED: u16 = 481;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_line() {
        let r = parse_status_line("211 1234 3000 4234 misc.test\r\n").unwrap();
        assert_eq!(r.code, 211);
        assert_eq!(r.message, "1234 3000 4234 misc.test");
        assert!(r.is_success());
    }

    #[test]
    fn test_parse_continuation() {
        let r = parse_status_line("340 send article").unwrap();
        assert!(r.is_continuation());
        assert!(!r.is_success());
    }

    #[test]
    fn test_garbage_is_invalid_response() {
        assert!(parse_status_line("hello world").is_err());
        assert!(parse_status_line("").is_err());
        assert!(parse_status_line("999 way out of range").is_err());
    }
}
