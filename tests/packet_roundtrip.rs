//! Packet codec round-trip properties
//!
//! The multi-message tests double as the regression suite for the
//! end-of-message sentinel: a decoder that confuses the NUL terminator with
//! a blank body line yields only the first message of a packet.

use chrono::NaiveDate;
use ftn_gate::packet::{Packet, PacketMessage, decode, encode};
use ftn_gate::{GateError, Kludge};

fn test_packet(messages: Vec<PacketMessage>) -> Packet {
    Packet {
        orig: "2:292/8".parse().unwrap(),
        dest: "2:292/854.1".parse().unwrap(),
        password: "secret".to_string(),
        created: NaiveDate::from_ymd_opt(2026, 8, 7)
            .unwrap()
            .and_hms_opt(14, 30, 5)
            .unwrap(),
        messages,
    }
}

fn echomail(subject: &str, body: &[&str]) -> PacketMessage {
    let mut msg = PacketMessage {
        from_name: "Alice Example".to_string(),
        to_name: "All".to_string(),
        subject: subject.to_string(),
        date: "07 Aug 26  14:30:05".to_string(),
        orig_net: 292,
        orig_node: 8,
        dest_net: 292,
        dest_node: 854,
        attribute: 0,
        area: Some("FIDOTEST".to_string()),
        body: body.iter().map(|s| s.to_string()).collect(),
        tear_line: Some("ftn-gate linux".to_string()),
        origin: Some("Test System (2:292/8)".to_string()),
        seen_by: vec!["292/8".to_string(), "292/854".to_string()],
        ..Default::default()
    };
    msg.set_kludge("MSGID", "2:292/8 1a2b3c4d");
    msg.set_kludge("PID", "ftn-gate 0.4.1");
    msg
}

#[test]
fn multi_message_packet_round_trips() {
    let original = test_packet(vec![
        echomail("first", &["line one", "line two"]),
        echomail("second", &["only line"]),
        echomail("third", &["a", "b", "c"]),
    ]);

    let decoded = decode(&encode(&original)).unwrap();

    assert_eq!(decoded.orig, original.orig);
    assert_eq!(decoded.dest, original.dest);
    assert_eq!(decoded.dest.point, 1);
    assert_eq!(decoded.password, "secret");
    assert_eq!(decoded.created, original.created);
    assert_eq!(decoded.messages.len(), 3);

    for (got, want) in decoded.messages.iter().zip(&original.messages) {
        assert_eq!(got.from_name, want.from_name);
        assert_eq!(got.to_name, want.to_name);
        assert_eq!(got.subject, want.subject);
        assert_eq!(got.date, want.date);
        assert_eq!(got.area, want.area);
        assert_eq!(got.body, want.body);
        assert_eq!(got.msgid(), want.msgid());
        assert_eq!(got.kludge("PID"), want.kludge("PID"));
        assert_eq!(got.tear_line, want.tear_line);
        assert_eq!(got.origin, want.origin);
        assert_eq!(got.seen_by, want.seen_by);
    }
}

#[test]
fn blank_body_lines_do_not_end_the_message() {
    // Historically a decoder that mapped both "blank line" and "end of
    // message" to an empty string stopped after message one
    let original = test_packet(vec![
        echomail("has blanks", &["para one", "", "para two", "", ""]),
        echomail("still here", &["second message"]),
        echomail("and here", &["third message"]),
    ]);

    let decoded = decode(&encode(&original)).unwrap();

    assert_eq!(decoded.messages.len(), 3, "sentinel/blank-line confusion");
    assert_eq!(
        decoded.messages[0].body,
        vec!["para one", "", "para two", "", ""]
    );
    assert_eq!(decoded.messages[1].subject, "still here");
    assert_eq!(decoded.messages[2].subject, "and here");
}

#[test]
fn unknown_kludges_survive_the_round_trip() {
    let mut msg = echomail("kludges", &["body"]);
    msg.kludges.push(Kludge {
        key: "FLAGS".to_string(),
        value: "NPD DIR".to_string(),
    });
    msg.kludges.push(Kludge {
        key: "RESCANNED".to_string(),
        value: "2:292/8".to_string(),
    });

    let decoded = decode(&encode(&test_packet(vec![msg]))).unwrap();
    assert_eq!(decoded.messages[0].kludge("FLAGS"), Some("NPD DIR"));
    assert_eq!(decoded.messages[0].kludge("RESCANNED"), Some("2:292/8"));
}

#[test]
fn netmail_gets_intl_and_no_trailer() {
    let mut netmail = echomail("private", &["netmail body"]);
    netmail.area = None;
    netmail.tear_line = None;
    netmail.origin = None;
    netmail.seen_by.clear();

    let decoded = decode(&encode(&test_packet(vec![netmail]))).unwrap();
    let msg = &decoded.messages[0];
    assert!(msg.is_netmail());
    assert_eq!(msg.kludge("INTL"), Some("2:292/854 2:292/8"));
    assert_eq!(msg.body, vec!["netmail body"]);
}

#[test]
fn cp866_charset_round_trips_cyrillic() {
    let mut msg = echomail("Тема", &["Привет, мир"]);
    msg.set_kludge("CHRS", "CP866 2");

    let decoded = decode(&encode(&test_packet(vec![msg]))).unwrap();
    assert_eq!(decoded.messages[0].subject, "Тема");
    assert_eq!(decoded.messages[0].body, vec!["Привет, мир"]);
    assert_eq!(decoded.messages[0].chrs(), Some("CP866 2"));
}

#[test]
fn truncated_message_is_a_decode_error() {
    let bytes = encode(&test_packet(vec![echomail("cut off", &["body"])]));
    // Cut inside the message text, before its NUL terminator
    let cut = &bytes[..bytes.len() - 20];
    match decode(cut) {
        Err(GateError::TruncatedMessage(_)) => {}
        other => panic!("expected TruncatedMessage, got {:?}", other.map(|p| p.messages.len())),
    }
}

#[test]
fn short_file_is_an_invalid_header() {
    match decode(&[0u8; 30]) {
        Err(GateError::InvalidHeader(_)) => {}
        other => panic!("expected InvalidHeader, got {:?}", other.map(|p| p.messages.len())),
    }
}

#[test]
fn identity_survives_fido_nntp_fido_round_trip() {
    // The loop-prevention law end-to-end: a message leaves as a packet,
    // becomes an article, comes back, and carries its original MSGID
    let config: ftn_gate::GateConfig = toml::from_str(
        r#"
            [fidonet]
            gateway_address = "2:292/854"
            linked_address = "2:292/8"

            [nntp]
            host = "news.example.com"

            [paths]
            inbound_dir = "in"
            outbound_dir = "out"
            areas_file = "areas.cfg"
            hold_dir = "hold"
        "#,
    )
    .unwrap();
    let translator = ftn_gate::Translator::new(&config);
    let now = chrono::Utc::now();

    let original = echomail("loop test", &["does it loop?"]);
    let original_msgid = original.msgid().unwrap().to_string();

    let article = translator.to_article(&original, "alt.bbs.test", now);
    let returned = translator.to_packet_message(&article, "FIDOTEST", now);

    assert_eq!(returned.msgid(), Some(original_msgid.as_str()));

    // And the packed form of the returned message still decodes to it
    let decoded = decode(&encode(&test_packet(vec![returned]))).unwrap();
    assert_eq!(decoded.messages[0].msgid(), Some(original_msgid.as_str()));
}
