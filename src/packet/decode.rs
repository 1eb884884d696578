//! Packet decoding
//!
//! Decoding is strict about structure (a malformed header or a truncated
//! message fails the whole file, which the orchestrator then quarantines)
//! but lenient about content: unknown kludges are preserved, unknown
//! charsets fall back to CP437, and trailing junk after the last complete
//! message terminates the packet without error.

use tracing::{debug, warn};

use crate::address::FidoAddress;
use crate::charset::{self, FtnCharset};
use crate::error::{GateError, Result};

use super::{Kludge, MSG_TYPE, PACKET_TYPE, Packet, PacketMessage};

/// Outcome of reading one line of message text
///
/// The NUL sentinel ending a message and an empty content line are distinct
/// variants on purpose: an empty `Text` line is valid body content, the
/// sentinel is not, and treating them as the same zero-length string loses
/// every message after the first one that contains a blank line.
#[derive(Debug, PartialEq, Eq)]
pub enum BodyLine {
    /// One line of message text, possibly empty (raw packet bytes)
    Text(Vec<u8>),
    /// The NUL terminator closing this message
    EndOfMessage,
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_u16(&mut self) -> Result<u16> {
        if self.remaining() < 2 {
            return Err(GateError::TruncatedMessage(
                "unexpected end of packet".to_string(),
            ));
        }
        let value = u16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(value)
    }

    fn peek_u16(&self) -> Option<u16> {
        if self.remaining() < 2 {
            return None;
        }
        Some(u16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]]))
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(GateError::TruncatedMessage(
                "unexpected end of packet".to_string(),
            ));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read bytes up to and including a NUL terminator
    fn read_cstr(&mut self) -> Result<&'a [u8]> {
        let start = self.pos;
        while self.pos < self.data.len() {
            if self.data[self.pos] == 0 {
                let s = &self.data[start..self.pos];
                self.pos += 1;
                return Ok(s);
            }
            self.pos += 1;
        }
        Err(GateError::TruncatedMessage(
            "string field missing terminator".to_string(),
        ))
    }

    /// Read one line of message text
    ///
    /// Lines end at CR, CRLF, or LF. A NUL is the end-of-message sentinel;
    /// if it arrives mid-line the pending text is flushed first and the
    /// sentinel is delivered on the next call via `pending_end`.
    fn read_body_line(&mut self, pending_end: &mut bool) -> Result<BodyLine> {
        if *pending_end {
            *pending_end = false;
            return Ok(BodyLine::EndOfMessage);
        }
        let mut line = Vec::new();
        loop {
            if self.pos >= self.data.len() {
                return Err(GateError::TruncatedMessage(
                    "message text missing terminator".to_string(),
                ));
            }
            let byte = self.data[self.pos];
            self.pos += 1;
            match byte {
                0 => {
                    if line.is_empty() {
                        return Ok(BodyLine::EndOfMessage);
                    }
                    *pending_end = true;
                    return Ok(BodyLine::Text(line));
                }
                b'\r' => {
                    // Swallow an LF following the CR
                    if self.pos < self.data.len() && self.data[self.pos] == b'\n' {
                        self.pos += 1;
                    }
                    return Ok(BodyLine::Text(line));
                }
                b'\n' => return Ok(BodyLine::Text(line)),
                _ => line.push(byte),
            }
        }
    }
}

/// Decode a packet file
pub fn decode(bytes: &[u8]) -> Result<Packet> {
    let mut reader = Reader::new(bytes);
    let mut packet = decode_header(&mut reader)?;

    loop {
        let Some(msg_type) = reader.peek_u16() else {
            // Missing the 2-byte terminator; tolerated after a complete message
            debug!("packet ends without end-of-packet marker");
            break;
        };
        if msg_type == 0 {
            break;
        }
        if msg_type != MSG_TYPE {
            // Trailing data that is not a message record
            debug!("stopping at non-message record type {}", msg_type);
            break;
        }
        reader.read_u16()?;
        packet.messages.push(decode_message(&mut reader)?);
    }

    debug!("decoded {} messages", packet.messages.len());
    Ok(packet)
}

fn decode_header(reader: &mut Reader<'_>) -> Result<Packet> {
    if reader.remaining() < 58 {
        return Err(GateError::InvalidHeader(format!(
            "file too small for packet header ({} bytes)",
            reader.remaining()
        )));
    }

    let orig_node = reader.read_u16()?;
    let dest_node = reader.read_u16()?;
    let year = reader.read_u16()?;
    // Header months are 0-based (Jan = 0), a convention shared by enough
    // tossers that pktinfo expects it
    let month = reader.read_u16()?;
    let day = reader.read_u16()?;
    let hour = reader.read_u16()?;
    let minute = reader.read_u16()?;
    let second = reader.read_u16()?;
    let _baud = reader.read_u16()?;
    let packet_type = reader.read_u16()?;
    if packet_type != PACKET_TYPE {
        return Err(GateError::InvalidHeader(format!(
            "unsupported packet type {}",
            packet_type
        )));
    }
    let orig_net = reader.read_u16()?;
    let dest_net = reader.read_u16()?;
    let _prod_code = reader.read_bytes(2)?;
    let password_bytes = reader.read_bytes(8)?;
    let password = password_bytes
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect::<String>()
        .trim_end()
        .to_string();
    let qm_orig_zone = reader.read_u16()?;
    let qm_dest_zone = reader.read_u16()?;
    let _aux_net = reader.read_u16()?;
    let _cw_validation = reader.read_u16()?;
    let _prod_high = reader.read_bytes(2)?;
    let _cap_word = reader.read_u16()?;
    let orig_zone = reader.read_u16()?;
    let dest_zone = reader.read_u16()?;
    let orig_point = reader.read_u16()?;
    let dest_point = reader.read_u16()?;
    let _prod_data = reader.read_bytes(4)?;

    let created = chrono::NaiveDate::from_ymd_opt(year as i32, u32::from(month) + 1, day.into())
        .and_then(|d| d.and_hms_opt(hour.into(), minute.into(), second.into()))
        .unwrap_or_else(|| {
            warn!(
                "packet header carries invalid date {}-{}-{}",
                year,
                month + 1,
                day
            );
            chrono::NaiveDateTime::default()
        });

    Ok(Packet {
        orig: FidoAddress {
            zone: if orig_zone != 0 { orig_zone } else { qm_orig_zone },
            net: orig_net,
            node: orig_node,
            point: orig_point,
        },
        dest: FidoAddress {
            zone: if dest_zone != 0 { dest_zone } else { qm_dest_zone },
            net: dest_net,
            node: dest_node,
            point: dest_point,
        },
        password,
        created,
        messages: Vec::new(),
    })
}

fn decode_message(reader: &mut Reader<'_>) -> Result<PacketMessage> {
    let orig_node = reader.read_u16()?;
    let dest_node = reader.read_u16()?;
    let orig_net = reader.read_u16()?;
    let dest_net = reader.read_u16()?;
    let attribute = reader.read_u16()?;
    let _cost = reader.read_u16()?;

    let raw_date = reader.read_cstr()?.to_vec();
    let raw_to = reader.read_cstr()?.to_vec();
    let raw_from = reader.read_cstr()?.to_vec();
    let raw_subject = reader.read_cstr()?.to_vec();

    // Collect the raw text lines first; the CHRS kludge inside them decides
    // how every string in this message is decoded
    let mut raw_lines = Vec::new();
    let mut pending_end = false;
    loop {
        match reader.read_body_line(&mut pending_end)? {
            BodyLine::Text(line) => raw_lines.push(line),
            BodyLine::EndOfMessage => break,
        }
    }

    let cs = detect_charset(&raw_lines);
    let mut msg = PacketMessage {
        date: charset::decode(&raw_date, cs),
        to_name: charset::decode(&raw_to, cs),
        from_name: charset::decode(&raw_from, cs),
        subject: charset::decode(&raw_subject, cs),
        orig_net,
        orig_node,
        dest_net,
        dest_node,
        attribute,
        ..PacketMessage::default()
    };

    for raw_line in &raw_lines {
        classify_line(&charset::decode(raw_line, cs), &mut msg);
    }

    // The encoder separates body from the echomail trailer with one blank
    // line; take that separator back out so the body round-trips
    let has_trailer = msg.tear_line.is_some() || msg.origin.is_some() || !msg.seen_by.is_empty();
    if has_trailer && msg.body.last().is_some_and(String::is_empty) {
        msg.body.pop();
    }
    Ok(msg)
}

/// Scan raw lines for a charset kludge before any text decoding
fn detect_charset(raw_lines: &[Vec<u8>]) -> FtnCharset {
    for line in raw_lines {
        if line.first() != Some(&1) {
            continue;
        }
        let text = String::from_utf8_lossy(&line[1..]);
        if let Some(value) = text.strip_prefix("CHRS:").or_else(|| text.strip_prefix("CHARSET:")) {
            return charset::charset_from_chrs(Some(value.trim()));
        }
        if let Some(value) = text.strip_prefix("CODEPAGE:") {
            let cp = value.trim();
            if cp.chars().all(|c| c.is_ascii_digit()) {
                return charset::charset_from_chrs(Some(&format!("CP{} 2", cp)));
            }
        }
    }
    FtnCharset::Cp437
}

/// Sort one decoded line into kludges, area, trailer, or body text
fn classify_line(line: &str, msg: &mut PacketMessage) {
    if let Some(kludge_text) = line.strip_prefix('\u{1}') {
        msg.kludges.push(parse_kludge(kludge_text));
        return;
    }
    if msg.area.is_none() && msg.body.is_empty() {
        // AREA: must be the first non-kludge line of echomail
        if let Some(area) = line.strip_prefix("AREA:") {
            msg.area = Some(area.trim().to_string());
            return;
        }
    }
    if let Some(rest) = line.strip_prefix("SEEN-BY:") {
        msg.seen_by.extend(parse_address_run(rest));
        return;
    }
    if line.starts_with("---") && msg.tear_line.is_none() {
        let text = line.trim_start_matches('-').trim_start();
        msg.tear_line = Some(text.to_string());
        return;
    }
    if let Some(origin) = line.strip_prefix(" * Origin:") {
        msg.origin = Some(origin.trim().to_string());
        return;
    }
    msg.body.push(line.to_string());
}

/// Parse a kludge line: `KEY: value`, or `KEY value` for the colonless ones
/// (INTL, REPLYADDR); a colon later in the value, as in an INTL address,
/// does not split the key
fn parse_kludge(text: &str) -> Kludge {
    let colon = text.find(':');
    let space = text.find(' ');
    let (raw_key, value) = match (colon, space) {
        (Some(c), Some(s)) if c < s => (&text[..c], text[c + 1..].trim()),
        (Some(c), None) => (&text[..c], text[c + 1..].trim()),
        (_, Some(s)) => (&text[..s], text[s + 1..].trim()),
        (None, None) => (text, ""),
    };
    // CHARSET / CODEPAGE / TZUTCINFO are synonyms, folded to their canonical
    // keys so accessors see one spelling (FTS-5003, FTS-4008)
    let key = raw_key.trim().to_ascii_uppercase();
    match key.as_str() {
        "CHARSET" => Kludge {
            key: "CHRS".to_string(),
            value: value.to_string(),
        },
        "CODEPAGE" if value.chars().all(|c| c.is_ascii_digit()) && !value.is_empty() => Kludge {
            key: "CHRS".to_string(),
            value: format!("CP{} 2", value),
        },
        "TZUTCINFO" => Kludge {
            key: "TZUTC".to_string(),
            value: value.to_string(),
        },
        _ => Kludge {
            key,
            value: value.to_string(),
        },
    }
}

/// Parse an abbreviated SEEN-BY / PATH address run into `net/node` entries
///
/// `292/8 854 123/45` expands to 292/8, 292/854, 123/45.
fn parse_address_run(text: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut current_net: Option<&str> = None;
    for token in text.split_whitespace() {
        if let Some((net, node)) = token.split_once('/') {
            current_net = Some(net);
            entries.push(format!("{}/{}", net, node));
        } else if let Some(net) = current_net {
            entries.push(format!("{}/{}", net, token));
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_line_sentinel_vs_blank() {
        // "a" CR CR "b" NUL: the CR CR is a blank line, the NUL is the end
        let data = b"a\r\rb\x00";
        let mut reader = Reader::new(data);
        let mut pending = false;
        assert_eq!(
            reader.read_body_line(&mut pending).unwrap(),
            BodyLine::Text(b"a".to_vec())
        );
        assert_eq!(
            reader.read_body_line(&mut pending).unwrap(),
            BodyLine::Text(Vec::new())
        );
        assert_eq!(
            reader.read_body_line(&mut pending).unwrap(),
            BodyLine::Text(b"b".to_vec())
        );
        assert_eq!(
            reader.read_body_line(&mut pending).unwrap(),
            BodyLine::EndOfMessage
        );
    }

    #[test]
    fn test_body_line_eof_is_truncation() {
        let mut reader = Reader::new(b"no terminator");
        let mut pending = false;
        assert!(matches!(
            reader.read_body_line(&mut pending),
            Err(GateError::TruncatedMessage(_))
        ));
    }

    #[test]
    fn test_seen_by_abbreviation_expands() {
        assert_eq!(
            parse_address_run(" 292/8 854 123/45"),
            vec!["292/8", "292/854", "123/45"]
        );
    }

    #[test]
    fn test_kludge_synonyms_fold() {
        assert_eq!(
            parse_kludge("CHARSET: UTF-8 4"),
            Kludge {
                key: "CHRS".to_string(),
                value: "UTF-8 4".to_string()
            }
        );
        assert_eq!(
            parse_kludge("CODEPAGE: 866"),
            Kludge {
                key: "CHRS".to_string(),
                value: "CP866 2".to_string()
            }
        );
        assert_eq!(
            parse_kludge("TZUTCINFO: 0200"),
            Kludge {
                key: "TZUTC".to_string(),
                value: "0200".to_string()
            }
        );
    }

    #[test]
    fn test_colonless_kludge() {
        assert_eq!(
            parse_kludge("REPLYADDR user@example.com"),
            Kludge {
                key: "REPLYADDR".to_string(),
                value: "user@example.com".to_string()
            }
        );
        // A colon inside the value must not split the key
        assert_eq!(
            parse_kludge("INTL 2:292/854 2:292/8"),
            Kludge {
                key: "INTL".to_string(),
                value: "2:292/854 2:292/8".to_string()
            }
        );
    }

    #[test]
    fn test_header_too_small() {
        assert!(matches!(
            decode(&[0u8; 20]),
            Err(GateError::InvalidHeader(_))
        ));
    }
}
