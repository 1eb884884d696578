//! Packet encoding
//!
//! Serialization mirrors the decoder: Type 2+ header, message records in
//! order, terminating null record. Message text is encoded in the charset
//! the message's CHRS kludge declares (CP437 when absent) with CR line
//! separators. Name and subject fields are clamped to their FTS-0001 field
//! widths with a logged warning rather than an error.

use tracing::warn;

use crate::charset::{self, FtnCharset};

use super::{MSG_TYPE, PACKET_TYPE, Packet, PacketMessage, format_fido_datetime};

/// Serialize a packet
pub fn encode(packet: &Packet) -> Vec<u8> {
    let mut out = Vec::with_capacity(1024);
    write_header(&mut out, packet);
    for msg in &packet.messages {
        write_message(&mut out, msg, packet);
    }
    // End-of-packet null record
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_header(out: &mut Vec<u8>, packet: &Packet) {
    use chrono::{Datelike, Timelike};
    let t = &packet.created;

    push_u16(out, packet.orig.node);
    push_u16(out, packet.dest.node);
    push_u16(out, t.year() as u16);
    // Header months are 0-based, matching the decoder
    push_u16(out, t.month() as u16 - 1);
    push_u16(out, t.day() as u16);
    push_u16(out, t.hour() as u16);
    push_u16(out, t.minute() as u16);
    push_u16(out, t.second() as u16);
    push_u16(out, 0); // baud
    push_u16(out, PACKET_TYPE);
    push_u16(out, packet.orig.net);
    push_u16(out, packet.dest.net);
    out.push(0); // product code, low
    out.push(0); // product revision, major

    let mut password = [0u8; 8];
    for (i, &b) in packet.password.as_bytes().iter().take(8).enumerate() {
        password[i] = b;
    }
    out.extend_from_slice(&password);

    push_u16(out, packet.orig.zone); // qm_orig_zone
    push_u16(out, packet.dest.zone); // qm_dest_zone
    push_u16(out, 0); // aux_net
    push_u16(out, 0x0100); // capability word validation copy
    out.push(1); // product code, high
    out.push(0); // product revision, minor
    push_u16(out, 0x0001); // capability word: Type 2+
    push_u16(out, packet.orig.zone);
    push_u16(out, packet.dest.zone);
    push_u16(out, packet.orig.point);
    push_u16(out, packet.dest.point);
    out.extend_from_slice(&[0u8; 4]); // product data
}

fn write_message(out: &mut Vec<u8>, msg: &PacketMessage, packet: &Packet) {
    push_u16(out, MSG_TYPE);
    push_u16(out, msg.orig_node);
    push_u16(out, msg.dest_node);
    push_u16(out, msg.orig_net);
    push_u16(out, msg.dest_net);
    push_u16(out, msg.attribute);
    push_u16(out, 0); // cost

    let cs = charset::charset_from_chrs(msg.chrs());

    let date = if msg.date.is_empty() {
        format_fido_datetime(&packet.created)
    } else {
        msg.date.clone()
    };
    write_cstr(out, &date, 19, "date", cs);
    write_cstr(out, &msg.to_name, 35, "to_name", cs);
    write_cstr(out, &msg.from_name, 35, "from_name", cs);
    write_cstr(out, &msg.subject, 71, "subject", cs);

    let text = assemble_text(msg, packet);
    out.extend_from_slice(&charset::encode(&text, cs));
    out.push(0);
}

/// Encode a string field, clamp to the FTS-0001 width, NUL-terminate
fn write_cstr(out: &mut Vec<u8>, value: &str, max_len: usize, field: &str, cs: FtnCharset) {
    let mut bytes = charset::encode(value, cs);
    if bytes.len() > max_len {
        warn!(
            "truncated {} from {} to {} bytes: {}",
            field,
            bytes.len(),
            max_len,
            value
        );
        bytes.truncate(max_len);
        if cs == FtnCharset::Utf8 {
            // Do not leave a split multi-byte sequence at the end
            while bytes.last().is_some_and(|&b| b & 0xC0 == 0x80) {
                bytes.pop();
            }
        }
    }
    out.extend_from_slice(&bytes);
    out.push(0);
}

/// Build the message text: AREA line, kludges, body, echomail trailer
fn assemble_text(msg: &PacketMessage, packet: &Packet) -> String {
    let mut lines: Vec<String> = Vec::new();

    if let Some(area) = &msg.area {
        // AREA: must be the first non-kludge line of echomail
        lines.push(format!("AREA:{}", area));
    } else if msg.kludge("INTL").is_none() {
        // Netmail gets an INTL kludge for inter-zone routing (FTS-4001)
        lines.push(format!(
            "\u{1}INTL {}:{}/{} {}:{}/{}",
            packet.dest.zone,
            msg.dest_net,
            msg.dest_node,
            packet.orig.zone,
            msg.orig_net,
            msg.orig_node
        ));
    }

    // PATH goes after the trailer, everything else up front
    for kludge in msg.kludges.iter().filter(|k| k.key != "PATH") {
        lines.push(format_kludge(&kludge.key, &kludge.value));
    }

    for line in &msg.body {
        // An embedded NUL would terminate the record early
        lines.push(line.replace('\u{0}', ""));
    }

    if msg.area.is_some() {
        lines.push(String::new());
        let tear = msg.tear_line.as_deref().unwrap_or("");
        lines.push(if tear.is_empty() {
            "---".to_string()
        } else {
            format!("--- {}", tear)
        });
        if let Some(origin) = &msg.origin {
            lines.push(format!(" * Origin: {}", origin));
        }
        if !msg.seen_by.is_empty() {
            lines.push(format!("SEEN-BY:{}", abbreviate_addresses(&msg.seen_by)));
        }
        for kludge in msg.kludges.iter().filter(|k| k.key == "PATH") {
            lines.push(format!("\u{1}PATH: {}", kludge.value));
        }
    }

    lines.join("\r")
}

fn format_kludge(key: &str, value: &str) -> String {
    // A few kludges are historically written without the colon
    match key {
        "INTL" | "REPLYADDR" | "REPLYTO" => format!("\u{1}{} {}", key, value),
        _ => format!("\u{1}{}: {}", key, value),
    }
}

/// Abbreviate a `net/node` list: the net is only written when it changes
fn abbreviate_addresses(entries: &[String]) -> String {
    let mut out = String::new();
    let mut current_net: Option<&str> = None;
    for entry in entries {
        match entry.split_once('/') {
            Some((net, node)) => {
                if current_net == Some(net) {
                    out.push(' ');
                    out.push_str(node);
                } else {
                    out.push(' ');
                    out.push_str(entry);
                    current_net = Some(net);
                }
            }
            None => {
                out.push(' ');
                out.push_str(entry);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbreviate_addresses() {
        let entries = vec![
            "292/8".to_string(),
            "292/854".to_string(),
            "123/45".to_string(),
        ];
        assert_eq!(abbreviate_addresses(&entries), " 292/8 854 123/45");
    }

    #[test]
    fn test_kludge_colon_conventions() {
        assert_eq!(format_kludge("MSGID", "x y"), "\u{1}MSGID: x y");
        assert_eq!(format_kludge("REPLYADDR", "a@b"), "\u{1}REPLYADDR a@b");
    }
}
