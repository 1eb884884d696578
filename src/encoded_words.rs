//! RFC 2047 encoded-word decoding for article headers
//!
//! From and Subject headers fetched from the news server may carry
//! `=?charset?encoding?text?=` encoded words; FidoNet name and subject
//! fields want the decoded text. Only decoding is provided — headers the
//! gateway emits are built from already-decoded text and tagged through the
//! Content-Type charset instead.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};

use crate::charset::{charset_from_mime, decode};

/// Decode a header value that may contain one or more encoded words
///
/// Plain text segments pass through unchanged. Whitespace between two
/// consecutive encoded words is removed per RFC 2047 section 6.2.
pub fn decode_header_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut rest = value;
    let mut last_was_encoded = false;

    while let Some(start) = rest.find("=?") {
        let (before, from_marker) = rest.split_at(start);
        let Some(end) = find_encoded_word_end(from_marker) else {
            break;
        };
        let word = &from_marker[..end];

        // Whitespace between adjacent encoded words is transparent
        if !before.is_empty() && !(last_was_encoded && before.chars().all(char::is_whitespace)) {
            result.push_str(before);
        }

        result.push_str(&decode_encoded_word(word));
        last_was_encoded = true;
        rest = &from_marker[end..];
    }

    result.push_str(rest);
    result
}

/// Find the byte offset just past `?=` of an encoded word starting at `=?`
fn find_encoded_word_end(s: &str) -> Option<usize> {
    // =?charset?enc?text?= -- scan for the fourth '?' followed by '='
    let mut question_marks = 0;
    let bytes = s.as_bytes();
    let mut i = 2;
    while i < bytes.len() {
        if bytes[i] == b'?' {
            question_marks += 1;
            if question_marks == 3 {
                return if bytes.get(i + 1) == Some(&b'=') {
                    Some(i + 2)
                } else {
                    None
                };
            }
        }
        i += 1;
    }
    None
}

/// Decode a single `=?charset?encoding?text?=` word
///
/// Invalid encoded words are returned unchanged rather than erroring: a
/// garbled From header should still gate, just un-decoded.
pub fn decode_encoded_word(encoded: &str) -> String {
    if !encoded.starts_with("=?") || !encoded.ends_with("?=") {
        return encoded.to_string();
    }
    let inner = &encoded[2..encoded.len() - 2];
    let parts: Vec<&str> = inner.splitn(3, '?').collect();
    if parts.len() != 3 {
        return encoded.to_string();
    }
    let (charset, encoding, text) = (parts[0], parts[1], parts[2]);

    let bytes = match encoding.to_ascii_uppercase().as_str() {
        "B" => match BASE64.decode(text.as_bytes()) {
            Ok(b) => b,
            Err(_) => return encoded.to_string(),
        },
        "Q" => decode_q(text),
        _ => return encoded.to_string(),
    };

    decode(&bytes, charset_from_mime(charset))
}

/// Q-encoding: underscore is space, =XX is a hex-escaped byte
fn decode_q(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                out.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => {
                let hex = &text[i + 1..i + 3];
                match u8::from_str_radix(hex, 16) {
                    Ok(b) => {
                        out.push(b);
                        i += 3;
                    }
                    Err(_) => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_utf8() {
        assert_eq!(decode_header_value("=?UTF-8?B?SGVsbG8gV29ybGQ=?="), "Hello World");
    }

    #[test]
    fn test_quoted_printable_latin1() {
        assert_eq!(decode_header_value("=?ISO-8859-1?Q?Andr=E9?="), "André");
        assert_eq!(decode_header_value("=?ISO-8859-1?Q?M=FCnchen?="), "München");
    }

    #[test]
    fn test_mixed_plain_and_encoded() {
        assert_eq!(
            decode_header_value("Re: =?UTF-8?B?SGVsbG8=?= World"),
            "Re: Hello World"
        );
        assert_eq!(
            decode_header_value("=?UTF-8?Q?Fran=C3=A7ois?= <francois@example.com>"),
            "François <francois@example.com>"
        );
    }

    #[test]
    fn test_adjacent_encoded_words_drop_whitespace() {
        assert_eq!(
            decode_header_value("=?UTF-8?B?SGVsbG8=?= =?UTF-8?B?V29ybGQ=?="),
            "HelloWorld"
        );
    }

    #[test]
    fn test_invalid_passes_through() {
        assert_eq!(decode_header_value("not an encoded word"), "not an encoded word");
        assert_eq!(decode_header_value("=?broken"), "=?broken");
        assert_eq!(decode_header_value("=?UTF-8?X?abc?="), "=?UTF-8?X?abc?=");
    }

    #[test]
    fn test_underscore_is_space_in_q() {
        assert_eq!(decode_header_value("=?UTF-8?Q?a_b?="), "a b");
    }
}
