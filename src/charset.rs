//! FTS-5003 character set handling
//!
//! FidoNet messages declare their encoding in a CHRS kludge
//! (`<identifier> <level>`); NNTP articles declare theirs in the
//! Content-Type charset parameter. This module maps between the two worlds:
//! decoding packet bytes to UTF-8 on the way in, choosing the smallest
//! FTS-5003 identifier that can represent the text on the way out.
//!
//! The default encoding with no CHRS kludge is CP437, per FTS-5003
//! recommendations. Single-byte codepages the gateway does not carry a table
//! for fall back to CP437.

/// A character set the gateway can decode packet text from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtnCharset {
    /// Seven-bit ASCII (level 1)
    Ascii,
    /// IBM codepage 437, DOS Latin US; the FidoNet default
    Cp437,
    /// IBM codepage 866, DOS Cyrillic
    Cp866,
    /// Windows codepage 1251, Cyrillic
    Cp1251,
    /// Windows codepage 1252, Western Europe
    Cp1252,
    /// ISO 8859-1
    Latin1,
    /// UTF-8 (level 4)
    Utf8,
}

impl FtnCharset {
    /// MIME charset name for the Content-Type header
    pub fn mime_name(&self) -> &'static str {
        match self {
            FtnCharset::Ascii => "us-ascii",
            FtnCharset::Cp437 => "IBM437",
            FtnCharset::Cp866 => "IBM866",
            FtnCharset::Cp1251 => "windows-1251",
            FtnCharset::Cp1252 => "windows-1252",
            FtnCharset::Latin1 => "iso-8859-1",
            FtnCharset::Utf8 => "utf-8",
        }
    }
}

/// Resolve a CHRS kludge value (`<identifier> <level>`) to a charset
///
/// Unknown and absent identifiers resolve to CP437. Obsolete identifiers
/// (IBMPC, +7_FIDO, CODEPAGE-derived CPxxx) are accepted per FTS-5003.
pub fn charset_from_chrs(chrs: Option<&str>) -> FtnCharset {
    let Some(chrs) = chrs else {
        return FtnCharset::Cp437;
    };
    let identifier = chrs
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();

    match identifier.as_str() {
        "ASCII" => FtnCharset::Ascii,
        "UTF-8" | "UTF8" => FtnCharset::Utf8,
        "CP866" | "+7_FIDO" => FtnCharset::Cp866,
        "CP1251" => FtnCharset::Cp1251,
        "CP1252" => FtnCharset::Cp1252,
        "LATIN-1" | "LATIN1" | "ISO-8859-1" => FtnCharset::Latin1,
        // CP437 proper, IBMPC, and every codepage without its own table
        _ => FtnCharset::Cp437,
    }
}

/// Decode packet bytes to UTF-8 text
pub fn decode(bytes: &[u8], charset: FtnCharset) -> String {
    match charset {
        FtnCharset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        FtnCharset::Ascii => bytes
            .iter()
            .map(|&b| if b < 0x80 { b as char } else { '\u{FFFD}' })
            .collect(),
        FtnCharset::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        FtnCharset::Cp437 => decode_table(bytes, &CP437_HIGH),
        FtnCharset::Cp866 => decode_table(bytes, &CP866_HIGH),
        FtnCharset::Cp1251 => decode_table(bytes, &CP1251_HIGH),
        FtnCharset::Cp1252 => bytes
            .iter()
            .map(|&b| match b {
                0x80..=0x9F => CP1252_WINDOW[(b - 0x80) as usize],
                _ => b as char,
            })
            .collect(),
    }
}

fn decode_table(bytes: &[u8], high: &[char; 128]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b < 0x80 {
                b as char
            } else {
                high[(b - 0x80) as usize]
            }
        })
        .collect()
}

/// Resolve a MIME charset name (Content-Type parameter) to a charset
pub fn charset_from_mime(name: &str) -> FtnCharset {
    match name.to_ascii_uppercase().as_str() {
        "UTF-8" | "UTF8" => FtnCharset::Utf8,
        "ISO-8859-1" | "LATIN1" | "LATIN-1" => FtnCharset::Latin1,
        "WINDOWS-1252" | "CP1252" => FtnCharset::Cp1252,
        "WINDOWS-1251" | "CP1251" => FtnCharset::Cp1251,
        "IBM866" | "CP866" => FtnCharset::Cp866,
        "US-ASCII" | "ASCII" => FtnCharset::Ascii,
        "IBM437" | "CP437" => FtnCharset::Cp437,
        _ => FtnCharset::Cp437,
    }
}

/// CHRS kludge value announcing this charset (FTS-5003 identifier + level)
pub fn chrs_for_charset(charset: FtnCharset) -> &'static str {
    match charset {
        FtnCharset::Ascii => "ASCII 1",
        FtnCharset::Cp437 => "CP437 2",
        FtnCharset::Cp866 => "CP866 2",
        FtnCharset::Cp1251 => "CP1251 2",
        FtnCharset::Cp1252 => "CP1252 2",
        FtnCharset::Latin1 => "LATIN-1 2",
        FtnCharset::Utf8 => "UTF-8 4",
    }
}

/// Encode text for packet serialization
///
/// Unmappable characters become `?`, matching how DOS-era tossers degrade.
pub fn encode(text: &str, charset: FtnCharset) -> Vec<u8> {
    match charset {
        FtnCharset::Utf8 => text.as_bytes().to_vec(),
        FtnCharset::Ascii => text
            .chars()
            .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
            .collect(),
        FtnCharset::Latin1 => text
            .chars()
            .map(|c| if (c as u32) < 0x100 { c as u8 } else { b'?' })
            .collect(),
        FtnCharset::Cp437 => encode_table(text, &CP437_HIGH),
        FtnCharset::Cp866 => encode_table(text, &CP866_HIGH),
        FtnCharset::Cp1251 => encode_table(text, &CP1251_HIGH),
        FtnCharset::Cp1252 => text
            .chars()
            .map(|c| {
                let cp = c as u32;
                if cp < 0x80 || (0xA0..=0xFF).contains(&cp) {
                    cp as u8
                } else {
                    match CP1252_WINDOW.iter().position(|&t| t == c) {
                        Some(idx) => (idx as u8) + 0x80,
                        None => b'?',
                    }
                }
            })
            .collect(),
    }
}

fn encode_table(text: &str, high: &[char; 128]) -> Vec<u8> {
    text.chars()
        .map(|c| {
            if (c as u32) < 0x80 {
                c as u8
            } else {
                match high.iter().position(|&t| t == c) {
                    Some(idx) => (idx as u8) + 0x80,
                    None => b'?',
                }
            }
        })
        .collect()
}

/// Encode text as CP437, the packet default
pub fn encode_cp437(text: &str) -> Vec<u8> {
    encode(text, FtnCharset::Cp437)
}

/// Pick the smallest FTS-5003 CHRS value able to represent the text
///
/// Preference order follows common tosser behavior: pure ASCII, then CP437,
/// then CP1252, then UTF-8 level 4 for everything else.
pub fn best_chrs(text: &str) -> &'static str {
    if text.is_ascii() {
        return "ASCII 1";
    }
    if text.chars().all(cp437_encodable) {
        return "CP437 2";
    }
    if text.chars().all(cp1252_encodable) {
        return "CP1252 2";
    }
    "UTF-8 4"
}

fn cp437_encodable(c: char) -> bool {
    (c as u32) < 0x80 || CP437_HIGH.contains(&c)
}

fn cp1252_encodable(c: char) -> bool {
    let cp = c as u32;
    if cp < 0x80 || (0xA0..=0xFF).contains(&cp) {
        return true;
    }
    CP1252_WINDOW.contains(&c)
}

/// CP437 0x80..=0xFF
const CP437_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', //
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ', //
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»', //
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐', //
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧', //
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀', //
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩', //
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{A0}',
];

/// CP866 0x80..=0xFF
const CP866_HIGH: [char; 128] = [
    'А', 'Б', 'В', 'Г', 'Д', 'Е', 'Ж', 'З', 'И', 'Й', 'К', 'Л', 'М', 'Н', 'О', 'П', //
    'Р', 'С', 'Т', 'У', 'Ф', 'Х', 'Ц', 'Ч', 'Ш', 'Щ', 'Ъ', 'Ы', 'Ь', 'Э', 'Ю', 'Я', //
    'а', 'б', 'в', 'г', 'д', 'е', 'ж', 'з', 'и', 'й', 'к', 'л', 'м', 'н', 'о', 'п', //
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐', //
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧', //
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀', //
    'р', 'с', 'т', 'у', 'ф', 'х', 'ц', 'ч', 'ш', 'щ', 'ъ', 'ы', 'ь', 'э', 'ю', 'я', //
    'Ё', 'ё', 'Є', 'є', 'Ї', 'ї', 'Ў', 'ў', '°', '∙', '·', '√', '№', '¤', '■', '\u{A0}',
];

/// CP1251 0x80..=0xFF
const CP1251_HIGH: [char; 128] = [
    'Ђ', 'Ѓ', '‚', 'ѓ', '„', '…', '†', '‡', '€', '‰', 'Љ', '‹', 'Њ', 'Ќ', 'Ћ', 'Џ', //
    'ђ', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '•', '–', '—', '\u{98}', '™', 'љ',
    '›', 'њ', 'ќ', 'ћ', 'џ', //
    '\u{A0}', 'Ў', 'ў', 'Ј', '¤', 'Ґ', '¦', '§', 'Ё', '©', 'Є', '«', '¬', '\u{AD}', '®', 'Ї', //
    '°', '±', 'І', 'і', 'ґ', 'µ', '¶', '·', 'ё', '№', 'є', '»', 'ј', 'Ѕ', 'ѕ', 'ї', //
    'А', 'Б', 'В', 'Г', 'Д', 'Е', 'Ж', 'З', 'И', 'Й', 'К', 'Л', 'М', 'Н', 'О', 'П', //
    'Р', 'С', 'Т', 'У', 'Ф', 'Х', 'Ц', 'Ч', 'Ш', 'Щ', 'Ъ', 'Ы', 'Ь', 'Э', 'Ю', 'Я', //
    'а', 'б', 'в', 'г', 'д', 'е', 'ж', 'з', 'и', 'й', 'к', 'л', 'м', 'н', 'о', 'п', //
    'р', 'с', 'т', 'у', 'ф', 'х', 'ц', 'ч', 'ш', 'щ', 'ъ', 'ы', 'ь', 'э', 'ю', 'я',
];

/// CP1252 0x80..=0x9F (the rest is identical to Latin-1)
const CP1252_WINDOW: [char; 32] = [
    '€', '\u{81}', '‚', 'ƒ', '„', '…', '†', '‡', 'ˆ', '‰', 'Š', '‹', 'Œ', '\u{8D}', 'Ž',
    '\u{8F}', //
    '\u{90}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '•', '–', '—', '˜', '™', 'š', '›',
    'œ', '\u{9D}', 'ž', 'Ÿ',
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cp437_round_trip() {
        let text = "Grüße από Zürich ░▒▓";
        // Not all of that survives CP437, but the umlauts do
        let bytes = encode_cp437("Grüße");
        assert_eq!(decode(&bytes, FtnCharset::Cp437), "Grüße");
        let _ = text;
    }

    #[test]
    fn test_cp437_unmappable_degrades_to_question_mark() {
        assert_eq!(encode_cp437("Я"), b"?");
        assert_eq!(encode_cp437("a€b"), b"a?b");
    }

    #[test]
    fn test_chrs_resolution() {
        assert_eq!(charset_from_chrs(None), FtnCharset::Cp437);
        assert_eq!(charset_from_chrs(Some("CP437 2")), FtnCharset::Cp437);
        assert_eq!(charset_from_chrs(Some("IBMPC 2")), FtnCharset::Cp437);
        assert_eq!(charset_from_chrs(Some("+7_FIDO 2")), FtnCharset::Cp866);
        assert_eq!(charset_from_chrs(Some("UTF-8 4")), FtnCharset::Utf8);
        assert_eq!(charset_from_chrs(Some("LATIN-1 2")), FtnCharset::Latin1);
        // Codepage without a table falls back to CP437
        assert_eq!(charset_from_chrs(Some("CP850 2")), FtnCharset::Cp437);
    }

    #[test]
    fn test_cp866_decode() {
        let bytes: Vec<u8> = vec![0x8F, 0xE0, 0xA8, 0xA2, 0xA5, 0xE2]; // "Привет"
        assert_eq!(decode(&bytes, FtnCharset::Cp866), "Привет");
    }

    #[test]
    fn test_cp1251_decode() {
        let bytes: Vec<u8> = vec![0xCF, 0xF0, 0xE8, 0xE2, 0xE5, 0xF2]; // "Привет"
        assert_eq!(decode(&bytes, FtnCharset::Cp1251), "Привет");
    }

    #[test]
    fn test_best_chrs_levels() {
        assert_eq!(best_chrs("hello world"), "ASCII 1");
        assert_eq!(best_chrs("Grüße"), "CP437 2");
        assert_eq!(best_chrs("smart “quotes”"), "CP1252 2");
        assert_eq!(best_chrs("Привет"), "UTF-8 4");
    }

    #[test]
    fn test_mime_names() {
        assert_eq!(FtnCharset::Cp437.mime_name(), "IBM437");
        assert_eq!(FtnCharset::Utf8.mime_name(), "utf-8");
    }

    #[test]
    fn test_mime_chrs_round_trip() {
        for cs in [
            FtnCharset::Ascii,
            FtnCharset::Cp437,
            FtnCharset::Cp866,
            FtnCharset::Cp1251,
            FtnCharset::Cp1252,
            FtnCharset::Latin1,
            FtnCharset::Utf8,
        ] {
            assert_eq!(charset_from_mime(cs.mime_name()), cs);
            assert_eq!(charset_from_chrs(Some(chrs_for_charset(cs))), cs);
        }
    }

    #[test]
    fn test_cp866_encode_round_trip() {
        let bytes = encode("Привет", FtnCharset::Cp866);
        assert_eq!(decode(&bytes, FtnCharset::Cp866), "Привет");
    }
}
