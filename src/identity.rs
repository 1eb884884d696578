//! Message identity translation and threading
//!
//! Identity must be bijective and stable across a round trip: a message that
//! crossed the gateway once reproduces the same identity when it crosses
//! back, so both networks' duplicate detection stays aligned and no message
//! can loop. Two mechanisms carry that guarantee:
//!
//! - A FidoNet MSGID that embeds an angle-bracketed id (`<id> crc32`) is a
//!   message the gateway itself created from an NNTP article; translating it
//!   back yields `<id>` exactly.
//! - An NNTP article carrying the gateway's X-FTN-MSGID extension header is
//!   a message the gateway posted from FidoNet; translating it back restores
//!   that original MSGID verbatim.
//!
//! Identifier grammar on the FidoNet side forbids colons in the id, so IPv6
//! literal domain components are rewritten colon-to-hyphen before use. The
//! reverse rewrite never happens: fresh domains are always minted from
//! configuration, never parsed back out of a hyphenated id.

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use rand::Rng;
use tracing::debug;

use crate::address::FidoAddress;
use crate::article::{Article, Headers};
use crate::charset;
use crate::config::GateConfig;
use crate::packet::PacketMessage;

/// Compute the CRC32 serial suffix FidoNet MSGIDs carry (FTS-0009)
fn crc32_hex(text: &str) -> String {
    format!("{:08x}", crc32fast::hash(text.as_bytes()))
}

/// Replace colon separators in an identifier's domain component with
/// hyphens. The destination grammar forbids colons there; a non-IPv6 domain
/// passes through unchanged.
pub fn hyphenate_ipv6_domain(id: &str) -> String {
    match id.rsplit_once('@') {
        Some((local, domain)) if domain.contains(':') => {
            format!("{}@{}", local, domain.replace(':', "-"))
        }
        _ => id.to_string(),
    }
}

/// Domain for minting new identities: IPv6 literals are never used, the
/// configured textual domain substitutes
pub fn identity_domain<'a>(resolved: Option<&'a str>, configured: &'a str) -> &'a str {
    match resolved {
        Some(host) if !host.is_empty() && !host.contains(':') && host.contains('.') => host,
        _ => configured,
    }
}

/// Mint a fresh Message-ID: uuid-derived local part, hex timestamp, domain
pub fn fresh_message_id(domain: &str, now: DateTime<Utc>) -> String {
    let unique: String = uuid::Uuid::new_v4().simple().to_string()[..16].to_string();
    format!("<{}{:08x}@{}>", unique, now.timestamp(), domain)
}

/// Mint a fresh FidoNet MSGID: gateway address, random serial
pub fn fresh_msgid(address: &FidoAddress) -> String {
    let serial: u32 = rand::thread_rng().r#gen();
    format!("{} {:08x}", address, serial)
}

/// Translate a FidoNet MSGID into an NNTP Message-ID
///
/// `2:292/854 1a2b3c4d` becomes `<1a2b3c4d.2.292.854@domain>`; an embedded
/// `<id>` (a MSGID this gateway minted from an article) is restored as-is.
pub fn message_id_from_msgid(msgid: &str, domain: &str) -> String {
    let msgid = msgid.trim();

    // Gateway-minted MSGID: "<original-id> crc32" round-trips to the original
    if let Some(start) = msgid.find('<')
        && let Some(end) = msgid[start..].find('>')
    {
        return hyphenate_ipv6_domain(&msgid[start..start + end + 1]);
    }

    if let Some((addr_part, serial)) = msgid.rsplit_once(' ') {
        let safe_addr = addr_part.trim().replace(':', ".").replace('/', ".");
        if !safe_addr.is_empty() && !serial.is_empty() && !safe_addr.contains(' ') {
            return format!("<{}.{}@{}>", serial.trim(), safe_addr, domain);
        }
    }

    // Malformed MSGID: flatten whatever is there into a safe local part
    let safe = msgid
        .replace(':', ".")
        .replace('/', ".")
        .replace(' ', ".")
        .replace(['<', '>'], "");
    format!("<{}@{}>", safe, domain)
}

/// Translate an NNTP Message-ID into a FidoNet MSGID: `<id> crc32hex`
///
/// The embedded id keeps the round trip exact; the CRC32 serial keeps
/// FidoNet tossers' dupe checking functional. IPv6 literal domains are
/// hyphenated first and the serial is computed over the rewritten id, so
/// both directions agree on the value.
pub fn msgid_from_message_id(message_id: &str) -> String {
    let rewritten = hyphenate_ipv6_domain(message_id.trim());
    let inner = rewritten.trim_matches(['<', '>']);
    format!("<{}> {}", inner, crc32_hex(inner))
}

/// Dedup key: the canonical NNTP-form message-id a message has (or would
/// get) on the news side, identical whichever direction it travels
pub fn dedup_key(message_id: &str) -> String {
    message_id.trim().to_string()
}

/// Format a TZUTC kludge value (FTS-4008) from a UTC offset
pub fn tzutc_from_offset(offset: FixedOffset) -> String {
    let secs = offset.local_minus_utc();
    let (sign, abs) = if secs < 0 { ("-", -secs) } else { ("", secs) };
    format!("{}{:02}{:02}", sign, abs / 3600, (abs % 3600) / 60)
}

/// Parse a TZUTC kludge value into a UTC offset; the optional leading plus
/// is accepted and ignored per FTS-4008
pub fn offset_from_tzutc(tzutc: &str) -> Option<FixedOffset> {
    let tzutc = tzutc.trim();
    let (sign, digits) = match tzutc.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, tzutc.strip_prefix('+').unwrap_or(tzutc)),
    };
    if digits.len() < 4 {
        return None;
    }
    let hours: i32 = digits.get(0..2)?.parse().ok()?;
    let minutes: i32 = digits.get(2..4)?.parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Bidirectional message translator
///
/// Owns the gateway identity facts (addresses, domain, product name) both
/// pipelines share; direction is the method called, not a type parameter.
#[derive(Debug, Clone)]
pub struct Translator {
    domain: String,
    gate_email: String,
    origin_line: String,
    product: String,
    gateway_addr: FidoAddress,
    linked_addr: FidoAddress,
}

impl Translator {
    /// Build from configuration
    pub fn new(config: &GateConfig) -> Self {
        // Identities are minted under the gateway mailbox's domain when it
        // has a usable one; an IPv6 literal or unqualified host falls back
        // to the configured textual domain
        let mailbox_domain = config
            .gateway
            .gate_email
            .rsplit_once('@')
            .map(|(_, domain)| domain.trim_matches(['[', ']']));
        Self {
            domain: identity_domain(mailbox_domain, &config.gateway.domain).to_string(),
            gate_email: config.gateway.gate_email.clone(),
            origin_line: config.origin_text(),
            product: config.gateway.name.clone(),
            gateway_addr: config.fidonet.gateway_address,
            linked_addr: config.fidonet.linked_address,
        }
    }

    /// Tear line text: product name and platform
    pub fn tear_line(&self) -> String {
        format!("{} {}", self.product, std::env::consts::OS)
    }

    /// X-Gateway header value, also the loop check on fetched articles
    pub fn gateway_tag(&self) -> String {
        format!("{} FidoNet-NNTP gateway", self.product)
    }

    /// FidoNet -> NNTP: build a postable article from a packet message
    pub fn to_article(&self, msg: &PacketMessage, newsgroup: &str, now: DateTime<Utc>) -> Article {
        let message_id = match msg.msgid() {
            Some(msgid) => message_id_from_msgid(msgid, &self.domain),
            None => fresh_message_id(&self.domain, now),
        };
        debug!("translated MSGID {:?} -> {}", msg.msgid(), message_id);

        // An unresolvable reply reference still translates; the article
        // simply starts a new thread root on the news side
        let references = msg
            .reply()
            .map(|reply| vec![message_id_from_msgid(reply, &self.domain)]);

        let date = self.article_date(msg, now);
        let charset = charset::charset_from_chrs(msg.chrs());

        let mut headers = Headers {
            from: format!("{} <{}>", msg.from_name, self.gate_email),
            newsgroups: vec![newsgroup.to_string()],
            subject: msg.subject.clone(),
            date,
            message_id,
            references,
            organization: Some(self.origin_line.clone()),
            sender: Some(self.gate_email.clone()),
            path: None,
            content_type: Some(format!("text/plain; charset={}", charset.mime_name())),
            extra: Default::default(),
        };
        headers
            .extra
            .insert("x-gateway".to_string(), self.gateway_tag());
        if let Some(area) = &msg.area {
            headers
                .extra
                .insert("x-fidonet-area".to_string(), area.clone());
        }
        if let Some(msgid) = msg.msgid() {
            headers
                .extra
                .insert("x-ftn-msgid".to_string(), msgid.to_string());
        }
        headers
            .extra
            .insert("x-ftn-from".to_string(), msg.from_name.clone());

        let mut body = msg.body_text();
        if let Some(origin) = &msg.origin {
            body.push_str("\n\n * Origin: ");
            body.push_str(origin);
        }

        Article { headers, body }
    }

    /// NNTP -> FidoNet: build a packet message from a fetched article
    pub fn to_packet_message(
        &self,
        article: &Article,
        area: &str,
        now: DateTime<Utc>,
    ) -> PacketMessage {
        let headers = &article.headers;

        // Loop-prevention contract: our own X-FTN-MSGID restores the
        // original FidoNet identity instead of minting a derived one
        let msgid = match headers.extra_header("x-ftn-msgid") {
            Some(original) => original.to_string(),
            None if !headers.message_id.is_empty() => {
                msgid_from_message_id(&headers.message_id)
            }
            None => fresh_msgid(&self.gateway_addr),
        };

        let reply = headers
            .references
            .as_ref()
            .and_then(|refs| refs.last())
            .map(|parent| msgid_from_message_id(parent));

        let (from_name, from_email) = split_mailbox(&headers.from);
        let date = parse_article_date(&headers.date)
            .unwrap_or_else(|| Utc.from_utc_datetime(&now.naive_utc()).fixed_offset());

        // A declared article charset is carried through to the CHRS kludge;
        // otherwise pick the smallest set that represents the text
        let chrs = match headers.charset() {
            Some(name) => charset::chrs_for_charset(charset::charset_from_mime(name)),
            None => {
                let text = format!("{} {}", headers.subject, article.body);
                charset::best_chrs(&text)
            }
        };

        let mut msg = PacketMessage {
            from_name: clamp(&from_name, 35),
            to_name: "All".to_string(),
            subject: clamp(&headers.subject, 71),
            date: crate::packet::format_fido_datetime(&date.naive_local()),
            orig_net: self.gateway_addr.net,
            orig_node: self.gateway_addr.node,
            dest_net: self.linked_addr.net,
            dest_node: self.linked_addr.node,
            attribute: 0,
            area: Some(area.to_string()),
            kludges: Vec::new(),
            body: article.body.lines().map(str::to_string).collect(),
            tear_line: Some(self.tear_line()),
            origin: Some(self.origin_line.clone()),
            // Source and destination both, so the uplink never echoes the
            // message back at us
            seen_by: vec![
                self.gateway_addr.seen_by_form(),
                self.linked_addr.seen_by_form(),
            ],
        };

        msg.set_kludge("MSGID", &msgid);
        if let Some(reply) = &reply {
            msg.set_kludge("REPLY", reply);
        }
        msg.set_kludge("PID", &format!("{} {}", self.product, env!("CARGO_PKG_VERSION")));
        msg.set_kludge("CHRS", chrs);
        msg.set_kludge("TZUTC", &tzutc_from_offset(*date.offset()));
        if !from_email.is_empty() {
            msg.set_kludge("REPLYADDR", &from_email);
        }
        msg.set_kludge("PATH", &self.gateway_addr.seen_by_form());
        msg
    }

    /// Netmail skeleton addressed from the gateway to the uplink sysop
    pub fn netmail(
        &self,
        to_name: &str,
        dest_net: u16,
        dest_node: u16,
        subject: &str,
        body: &str,
        now: DateTime<Utc>,
    ) -> PacketMessage {
        let mut msg = PacketMessage {
            from_name: self.product.clone(),
            to_name: clamp(to_name, 35),
            subject: clamp(subject, 71),
            date: crate::packet::format_fido_datetime(&now.naive_utc()),
            orig_net: self.gateway_addr.net,
            orig_node: self.gateway_addr.node,
            dest_net,
            dest_node,
            attribute: 0x0001, // private
            area: None,
            kludges: Vec::new(),
            body: body.lines().map(str::to_string).collect(),
            tear_line: None,
            origin: None,
            seen_by: Vec::new(),
        };
        msg.set_kludge("MSGID", &fresh_msgid(&self.gateway_addr));
        msg
    }

    /// RFC 5322 Date header for an outbound article, honoring the TZUTC
    /// kludge when the message carries one
    fn article_date(&self, msg: &PacketMessage, now: DateTime<Utc>) -> String {
        let naive = msg.parsed_date().unwrap_or_else(|| now.naive_utc());
        let offset = msg
            .tzutc()
            .and_then(offset_from_tzutc)
            .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
        let dated = offset
            .from_local_datetime(&naive)
            .single()
            .unwrap_or_else(|| offset.from_utc_datetime(&naive));
        dated.format("%a, %d %b %Y %H:%M:%S %z").to_string()
    }

    /// The uplink every outbound packet is addressed to
    pub fn linked_address(&self) -> FidoAddress {
        self.linked_addr
    }

    /// Our own address
    pub fn gateway_address(&self) -> FidoAddress {
        self.gateway_addr
    }
}

/// Split `Name <addr>` / `addr (Name)` / bare `addr` into (name, addr)
pub fn split_mailbox(from: &str) -> (String, String) {
    let from = from.trim();
    if let Some(start) = from.find('<')
        && let Some(end) = from.find('>')
        && end > start
    {
        let name = from[..start].trim().trim_matches('"').to_string();
        let addr = from[start + 1..end].trim().to_string();
        if name.is_empty() {
            let local = addr.split('@').next().unwrap_or("").to_string();
            return (local, addr);
        }
        return (name, addr);
    }
    if let Some(start) = from.find('(')
        && let Some(end) = from.find(')')
        && end > start
    {
        let name = from[start + 1..end].trim().to_string();
        let addr = from[..start].trim().to_string();
        return (name, addr);
    }
    if from.contains('@') {
        let local = from.split('@').next().unwrap_or("").to_string();
        return (local, from.to_string());
    }
    (from.to_string(), String::new())
}

fn clamp(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        s.chars().take(max).collect()
    } else {
        s.to_string()
    }
}

fn parse_article_date(date: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc2822(date.trim()).ok()
}
