//! Netnews article model (RFC 5536, gateway subset)
//!
//! An article is a header block and a body separated by a blank line. The
//! gateway round-trips the headers it translates (From, Newsgroups, Subject,
//! Date, Message-ID, References, Organization, Sender, Path, Content-Type)
//! and preserves everything else, including its own X-Gateway / X-FTN-*
//! extension headers, in the `extra` map.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::encoded_words::decode_header_value;
use crate::error::{GateError, Result};

/// A netnews article: headers plus body
#[derive(Debug, Clone, Default)]
pub struct Article {
    /// Parsed headers
    pub headers: Headers,
    /// Body text (LF line endings internally)
    pub body: String,
}

/// Article headers the gateway translates, plus an `extra` map for the rest
#[derive(Debug, Clone, Default)]
pub struct Headers {
    /// Author mailbox, RFC 2047 decoded
    pub from: String,
    /// Target newsgroups
    pub newsgroups: Vec<String>,
    /// Subject line, RFC 2047 decoded
    pub subject: String,
    /// RFC 5322 date-time string
    pub date: String,
    /// `<local-part@domain>` unique identifier
    pub message_id: String,
    /// Thread references, oldest first
    pub references: Option<Vec<String>>,
    /// Poster's organization
    pub organization: Option<String>,
    /// Agent that injected the article (the gateway itself)
    pub sender: Option<String>,
    /// Server transit path
    pub path: Option<String>,
    /// Content type, carries the charset parameter
    pub content_type: Option<String>,
    /// Everything else, keyed by lowercased header name
    pub extra: BTreeMap<String, String>,
}

impl Headers {
    /// Case-insensitive lookup in the extra headers
    pub fn extra_header(&self, name: &str) -> Option<&str> {
        self.extra.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    /// Charset parameter of the Content-Type header, unquoted
    pub fn charset(&self) -> Option<&str> {
        let content_type = self.content_type.as_deref()?;
        for param in content_type.split(';').skip(1) {
            let param = param.trim();
            if let Some((key, value)) = param.split_once('=')
                && key.trim().eq_ignore_ascii_case("charset")
            {
                return Some(value.trim().trim_matches('"').trim_matches('\''));
            }
        }
        None
    }
}

/// Split raw article text at the first blank line into (headers, body)
pub fn split_article(raw: &str) -> (&str, &str) {
    if let Some(pos) = raw.find("\r\n\r\n") {
        return (&raw[..pos], &raw[pos + 4..]);
    }
    if let Some(pos) = raw.find("\n\n") {
        return (&raw[..pos], &raw[pos + 2..]);
    }
    (raw, "")
}

/// Parse a comma-separated header value (Newsgroups, Followup-To)
pub fn parse_comma_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a whitespace-separated message-id list (References)
pub fn parse_message_id_list(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

/// Parse header text into [`Headers`], handling RFC 5322 folding
///
/// Parsing is deliberately lenient: a fetched article missing Message-ID or
/// From still translates — identity generation fills the gaps downstream.
pub fn parse_headers(headers_text: &str) -> Headers {
    let mut raw: BTreeMap<String, String> = BTreeMap::new();
    let mut current: Option<(String, String)> = None;

    for line in headers_text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            // Folded continuation of the previous header
            if let Some((_, value)) = current.as_mut() {
                value.push(' ');
                value.push_str(line.trim_start());
            }
        } else {
            if let Some((name, value)) = current.take() {
                raw.insert(name, value.trim().to_string());
            }
            if let Some((name, value)) = line.split_once(':') {
                current = Some((name.trim().to_ascii_lowercase(), value.trim_start().to_string()));
            }
        }
    }
    if let Some((name, value)) = current {
        raw.insert(name, value.trim().to_string());
    }

    let mut take = |name: &str| raw.remove(name);

    let from = take("from").map(|v| decode_header_value(&v)).unwrap_or_default();
    let subject = take("subject")
        .map(|v| decode_header_value(&v))
        .unwrap_or_default();
    let newsgroups = take("newsgroups")
        .map(|v| parse_comma_list(&v))
        .unwrap_or_default();
    let date = take("date").unwrap_or_default();
    let message_id = take("message-id").unwrap_or_default();
    let references = take("references").map(|v| parse_message_id_list(&v));
    let organization = take("organization");
    let sender = take("sender");
    let path = take("path");
    let content_type = take("content-type");

    Headers {
        from,
        newsgroups,
        subject,
        date,
        message_id,
        references,
        organization,
        sender,
        path,
        content_type,
        extra: raw,
    }
}

/// Parse a complete article from raw text
pub fn parse_article(raw: &str) -> Article {
    let (headers_text, body_text) = split_article(raw);
    Article {
        headers: parse_headers(headers_text),
        body: body_text.replace("\r\n", "\n"),
    }
}

impl Article {
    /// Serialize for POST: CRLF line endings, dot-stuffed body
    ///
    /// From, Newsgroups, Subject, Date and Message-ID must be present; the
    /// translator always fills them, so an empty one here is a caller bug
    /// surfaced as an error rather than a malformed post.
    pub fn serialize_for_posting(&self) -> Result<String> {
        let h = &self.headers;
        if h.from.is_empty()
            || h.newsgroups.is_empty()
            || h.subject.is_empty()
            || h.date.is_empty()
            || h.message_id.is_empty()
        {
            return Err(GateError::InvalidResponse(
                "article missing a required header".to_string(),
            ));
        }

        let mut out = String::with_capacity(512 + self.body.len());
        // write! to a String cannot fail
        let _ = write!(out, "From: {}\r\n", h.from);
        let _ = write!(out, "Newsgroups: {}\r\n", h.newsgroups.join(","));
        let _ = write!(out, "Subject: {}\r\n", h.subject);
        let _ = write!(out, "Date: {}\r\n", h.date);
        let _ = write!(out, "Message-ID: {}\r\n", h.message_id);
        if let Some(refs) = &h.references {
            let _ = write!(out, "References: {}\r\n", refs.join(" "));
        }
        if let Some(organization) = &h.organization {
            let _ = write!(out, "Organization: {}\r\n", organization);
        }
        if let Some(sender) = &h.sender {
            let _ = write!(out, "Sender: {}\r\n", sender);
        }
        if let Some(path) = &h.path {
            let _ = write!(out, "Path: {}\r\n", path);
        }
        if let Some(content_type) = &h.content_type {
            let _ = write!(out, "Content-Type: {}\r\n", content_type);
        }
        for (name, value) in &h.extra {
            let _ = write!(out, "{}: {}\r\n", canonical_case(name), value);
        }
        out.push_str("\r\n");

        for line in self.body.lines() {
            if line.starts_with('.') {
                out.push('.');
            }
            out.push_str(line);
            out.push_str("\r\n");
        }
        Ok(out)
    }
}

/// Restore Word-Case for a lowercased header name (x-ftn-msgid -> X-Ftn-Msgid
/// is wrong for the well-known ones, so those are special-cased)
fn canonical_case(name: &str) -> String {
    match name {
        "x-gateway" => "X-Gateway".to_string(),
        "x-fidonet-area" => "X-FidoNet-Area".to_string(),
        "x-ftn-msgid" => "X-FTN-MSGID".to_string(),
        "x-ftn-from" => "X-FTN-From".to_string(),
        "user-agent" => "User-Agent".to_string(),
        "nntp-posting-host" => "NNTP-Posting-Host".to_string(),
        _ => {
            let mut out = String::with_capacity(name.len());
            for part in name.split('-') {
                if !out.is_empty() {
                    out.push('-');
                }
                let mut chars = part.chars();
                if let Some(first) = chars.next() {
                    out.extend(first.to_uppercase());
                    out.push_str(chars.as_str());
                }
            }
            out
        }
    }
}
