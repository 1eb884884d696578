//! FTS-0001 packet container format
//!
//! A packet is a 58-byte Type 2+ header followed by message records and a
//! two-byte null terminator. Each message record is a fixed header, four
//! string fields, and a NUL-terminated text block whose lines carry the
//! kludges, the body, and the echomail trailer.
//!
//! The codec distinguishes the NUL end-of-message sentinel from an empty
//! body line as two different [`decode::BodyLine`] variants. Conflating them
//! silently truncates multi-message packets after the first message — every
//! later message in the packet depends on this distinction.

mod decode;
mod encode;

pub use decode::{BodyLine, decode};
pub use encode::encode;

use chrono::NaiveDateTime;

use crate::address::FidoAddress;

/// Packet type written into every Type 2+ header
pub(crate) const PACKET_TYPE: u16 = 2;

/// Message record sentinel values: a real message record starts with 2, the
/// end-of-packet marker is 0
pub(crate) const MSG_TYPE: u16 = 2;

/// One binary transfer unit: header plus an ordered message sequence
#[derive(Debug, Clone)]
pub struct Packet {
    /// Originating system
    pub orig: FidoAddress,
    /// Destination system
    pub dest: FidoAddress,
    /// Packet password, at most 8 significant characters
    pub password: String,
    /// Creation timestamp from the packet header
    pub created: NaiveDateTime,
    /// Messages in packet order
    pub messages: Vec<PacketMessage>,
}

/// A control line embedded in the message text (^A-prefixed)
///
/// Unrecognized kludges are preserved verbatim for round-trip fidelity; only
/// the keys the gateway interprets get accessors on [`PacketMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kludge {
    /// Uppercased key (MSGID, REPLY, CHRS, PID, ...)
    pub key: String,
    /// Value text after the separator
    pub value: String,
}

/// One stored message: header fields, kludges, body, echomail trailer
#[derive(Debug, Clone, Default)]
pub struct PacketMessage {
    /// Sender name, at most 35 characters on the wire
    pub from_name: String,
    /// Recipient name, at most 35 characters on the wire
    pub to_name: String,
    /// Subject, at most 71 characters on the wire
    pub subject: String,
    /// Raw packet date string, `DD Mon YY  HH:MM:SS`
    pub date: String,
    /// Originating network
    pub orig_net: u16,
    /// Originating node
    pub orig_node: u16,
    /// Destination network
    pub dest_net: u16,
    /// Destination node
    pub dest_node: u16,
    /// FTS-0001 attribute word (PVT etc.)
    pub attribute: u16,
    /// Echomail area tag; `None` marks netmail
    pub area: Option<String>,
    /// Control lines in original order, unknown keys preserved
    pub kludges: Vec<Kludge>,
    /// Body text lines (decoded to UTF-8)
    pub body: Vec<String>,
    /// Tear line without the `--- ` marker
    pub tear_line: Option<String>,
    /// Origin line without the ` * Origin: ` marker
    pub origin: Option<String>,
    /// SEEN-BY entries as `net/node` strings
    pub seen_by: Vec<String>,
}

impl PacketMessage {
    /// First kludge value for the given (case-insensitive) key
    pub fn kludge(&self, key: &str) -> Option<&str> {
        let key = key.to_ascii_uppercase();
        self.kludges
            .iter()
            .find(|k| k.key == key)
            .map(|k| k.value.as_str())
    }

    /// MSGID kludge (FTS-0009): `origaddr serial`
    pub fn msgid(&self) -> Option<&str> {
        self.kludge("MSGID")
    }

    /// REPLY kludge: MSGID of the message being replied to
    pub fn reply(&self) -> Option<&str> {
        self.kludge("REPLY")
    }

    /// CHRS kludge (FTS-5003), with CHARSET and CODEPAGE synonyms folded in
    /// at decode time
    pub fn chrs(&self) -> Option<&str> {
        self.kludge("CHRS")
    }

    /// TZUTC offset kludge (FTS-4008); TZUTCINFO is folded in at decode time
    pub fn tzutc(&self) -> Option<&str> {
        self.kludge("TZUTC")
    }

    /// True for netmail (no AREA line)
    pub fn is_netmail(&self) -> bool {
        self.area.is_none()
    }

    /// Body joined with LF separators
    pub fn body_text(&self) -> String {
        self.body.join("\n")
    }

    /// Parse the packet date field, with the FidoNet two-digit-year pivot
    /// (years below 80 are 20xx)
    pub fn parsed_date(&self) -> Option<NaiveDateTime> {
        parse_fido_datetime(&self.date)
    }

    /// Set or replace a kludge, keeping its position if already present
    pub fn set_kludge(&mut self, key: &str, value: &str) {
        let key = key.to_ascii_uppercase();
        if let Some(existing) = self.kludges.iter_mut().find(|k| k.key == key) {
            existing.value = value.to_string();
        } else {
            self.kludges.push(Kludge {
                key,
                value: value.to_string(),
            });
        }
    }
}

/// Parse `DD Mon YY  HH:MM:SS`
pub(crate) fn parse_fido_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.len() < 19 {
        return None;
    }
    let day: u32 = s.get(0..2)?.trim().parse().ok()?;
    let month = match s.get(3..6)? {
        "Jan" => 1,
        "Feb" => 2,
        "Mar" => 3,
        "Apr" => 4,
        "May" => 5,
        "Jun" => 6,
        "Jul" => 7,
        "Aug" => 8,
        "Sep" => 9,
        "Oct" => 10,
        "Nov" => 11,
        "Dec" => 12,
        _ => return None,
    };
    let yy: i32 = s.get(7..9)?.parse().ok()?;
    let year = if yy < 80 { 2000 + yy } else { 1900 + yy };
    let hour: u32 = s.get(11..13)?.parse().ok()?;
    let minute: u32 = s.get(14..16)?.parse().ok()?;
    let second: u32 = s.get(17..19)?.parse().ok()?;

    chrono::NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

/// Format a timestamp into the packet date field shape
pub(crate) fn format_fido_datetime(dt: &NaiveDateTime) -> String {
    dt.format("%d %b %y  %H:%M:%S").to_string()
}
