//! Font metrics and text decoding for the content interpreter
//!
//! Only what glyph placement and text extraction need: advance widths,
//! ascent/descent, code splitting and a best-effort Unicode mapping.

use std::collections::BTreeMap;

use lopdf::{Dictionary, Document, Object};

use crate::resources::{
    as_number, get, get_dict, get_name, get_number, number_array, resolve, stream_content,
};

/// Helvetica advance widths for codes 32..=126 (WinAnsi), in glyph units.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // 32-47
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 48-63
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // 64-79
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 80-95
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // 96-111
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 112-126
];

const HELVETICA_DEFAULT_WIDTH: f64 = 556.0;
const COURIER_WIDTH: f64 = 600.0;

/// WinAnsi code points for 0x80..=0x9F; zero marks an unused slot.
const WIN_ANSI_HIGH: [u16; 32] = [
    0x20AC, 0, 0x201A, 0x0192, 0x201E, 0x2026, 0x2020, 0x2021, 0x02C6, 0x2030, 0x0160, 0x2039,
    0x0152, 0, 0x017D, 0, 0, 0x2018, 0x2019, 0x201C, 0x201D, 0x2022, 0x2013, 0x2014, 0x02DC,
    0x2122, 0x0161, 0x203A, 0x0153, 0, 0x017E, 0x0178,
];

/// Advance width of `c` in Helvetica, in glyph units.
pub fn helvetica_width(c: char) -> f64 {
    match c as u32 {
        code @ 32..=126 => f64::from(HELVETICA_WIDTHS[(code - 32) as usize]),
        _ => HELVETICA_DEFAULT_WIDTH,
    }
}

/// Width of `text` set in Helvetica at `size` points.
pub fn helvetica_text_width(text: &str, size: f64) -> f64 {
    text.chars().map(helvetica_width).sum::<f64>() * size / 1000.0
}

/// Encode text for a simple font with WinAnsiEncoding. Unmappable chars become `?`.
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            code @ (0x20..=0x7E | 0xA0..=0xFF) => code as u8,
            code => WIN_ANSI_HIGH
                .iter()
                .position(|&u| u != 0 && u32::from(u) == code)
                .map(|i| 0x80 + i as u8)
                .unwrap_or(b'?'),
        })
        .collect()
}

fn decode_win_ansi(code: u8) -> char {
    match code {
        0x80..=0x9F => char::from_u32(u32::from(WIN_ANSI_HIGH[(code - 0x80) as usize]))
            .filter(|c| *c != '\0')
            .unwrap_or(char::REPLACEMENT_CHARACTER),
        _ => char::from(code),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Builtin {
    Helvetica,
    Courier,
}

#[derive(Debug, Clone)]
pub struct FontInfo {
    pub base_font: String,
    two_byte: bool,
    first_char: u32,
    widths: Vec<f64>,
    cid_widths: BTreeMap<u32, f64>,
    default_width: f64,
    builtin: Builtin,
    to_unicode: BTreeMap<u32, String>,
    /// Glyph units, y up.
    pub ascent: f64,
    pub descent: f64,
    /// Horizontal scale from glyph units to text space (0.001 except for Type3).
    width_scale: f64,
}

impl Default for FontInfo {
    fn default() -> Self {
        Self::builtin("Helvetica")
    }
}

impl FontInfo {
    /// Metrics for a standard font referenced without widths.
    pub fn builtin(base_font: &str) -> Self {
        let builtin = if base_font.contains("Courier") {
            Builtin::Courier
        } else {
            Builtin::Helvetica
        };
        Self {
            base_font: base_font.to_string(),
            two_byte: false,
            first_char: 0,
            widths: Vec::new(),
            cid_widths: BTreeMap::new(),
            default_width: 0.0,
            builtin,
            to_unicode: BTreeMap::new(),
            ascent: 718.0,
            descent: -207.0,
            width_scale: 0.001,
        }
    }

    pub fn load(doc: &Document, font: &Dictionary) -> Self {
        let base_font = get_name(doc, font, b"BaseFont")
            .map(|n| String::from_utf8_lossy(n).into_owned())
            .unwrap_or_default();
        let mut info = Self::builtin(&base_font);
        let subtype = get_name(doc, font, b"Subtype").unwrap_or(&b"Type1"[..]);

        if subtype == b"Type0" {
            info.two_byte = true;
            if let Some(Object::Array(descendants)) = get(doc, font, b"DescendantFonts") {
                if let Some(Object::Dictionary(cid_font)) = descendants.first().map(|d| resolve(doc, d)) {
                    info.default_width = get_number(doc, cid_font, b"DW").unwrap_or(1000.0);
                    if let Some(Object::Array(w)) = get(doc, cid_font, b"W") {
                        info.cid_widths = parse_cid_widths(doc, w);
                    }
                    info.read_descriptor(doc, cid_font);
                }
            }
        } else {
            info.first_char = get_number(doc, font, b"FirstChar").unwrap_or(0.0).max(0.0) as u32;
            if let Some(widths) = font.get(b"Widths").ok().and_then(|w| number_array(doc, w)) {
                info.widths = widths;
            }
            info.read_descriptor(doc, font);
            if subtype == b"Type3" {
                info.width_scale = font
                    .get(b"FontMatrix")
                    .ok()
                    .and_then(|m| number_array(doc, m))
                    .and_then(|m| m.first().copied())
                    .unwrap_or(0.001);
            }
        }

        if let Some(Object::Stream(stream)) = get(doc, font, b"ToUnicode") {
            if let Ok(data) = stream_content(stream) {
                info.to_unicode = parse_to_unicode(&data);
            }
        }
        info
    }

    fn read_descriptor(&mut self, doc: &Document, font: &Dictionary) {
        let Some(descriptor) = get_dict(doc, font, b"FontDescriptor") else {
            return;
        };
        let ascent = get_number(doc, descriptor, b"Ascent").unwrap_or(0.0);
        let descent = get_number(doc, descriptor, b"Descent").unwrap_or(0.0);
        // Some producers write zeros; keep the standard metrics then.
        if ascent > 0.0 && ascent > descent {
            self.ascent = ascent;
            self.descent = descent.min(0.0);
        }
        if let Some(missing) = get_number(doc, descriptor, b"MissingWidth") {
            self.default_width = missing;
        }
    }

    pub fn is_two_byte(&self) -> bool {
        self.two_byte
    }

    /// Split a shown string into character codes.
    pub fn codes(&self, bytes: &[u8]) -> Vec<u32> {
        if self.two_byte {
            bytes
                .chunks(2)
                .map(|pair| match pair {
                    [hi, lo] => u32::from(*hi) << 8 | u32::from(*lo),
                    [single] => u32::from(*single),
                    _ => 0,
                })
                .collect()
        } else {
            bytes.iter().map(|b| u32::from(*b)).collect()
        }
    }

    pub fn encode_code(&self, code: u32) -> Vec<u8> {
        if self.two_byte {
            vec![(code >> 8) as u8, code as u8]
        } else {
            vec![code as u8]
        }
    }

    /// Advance of `code` in text space units per unit of font size.
    pub fn advance(&self, code: u32) -> f64 {
        self.glyph_width(code) * self.width_scale
    }

    fn glyph_width(&self, code: u32) -> f64 {
        if self.two_byte {
            return self
                .cid_widths
                .get(&code)
                .copied()
                .unwrap_or(self.default_width);
        }
        if !self.widths.is_empty() {
            return code
                .checked_sub(self.first_char)
                .and_then(|i| self.widths.get(i as usize))
                .copied()
                .unwrap_or(self.default_width);
        }
        match self.builtin {
            Builtin::Courier => COURIER_WIDTH,
            Builtin::Helvetica => char::from_u32(code)
                .map(helvetica_width)
                .unwrap_or(HELVETICA_DEFAULT_WIDTH),
        }
    }

    /// Whether word spacing applies to this code.
    pub fn is_word_space(&self, code: u32) -> bool {
        !self.two_byte && code == 32
    }

    pub fn decode(&self, code: u32) -> String {
        if let Some(text) = self.to_unicode.get(&code) {
            return text.clone();
        }
        if self.two_byte {
            return char::from_u32(code)
                .unwrap_or(char::REPLACEMENT_CHARACTER)
                .to_string();
        }
        decode_win_ansi(code as u8).to_string()
    }
}

/// Parse a `/W` array: `c [w1 w2 ...]` and `c_first c_last w` entries.
fn parse_cid_widths(doc: &Document, items: &[Object]) -> BTreeMap<u32, f64> {
    let mut widths = BTreeMap::new();
    let items: Vec<&Object> = items.iter().map(|o| resolve(doc, o)).collect();
    let mut i = 0;
    while i < items.len() {
        let Some(first) = as_number(items[i]) else {
            break;
        };
        let first = first as u32;
        match items.get(i + 1) {
            Some(Object::Array(list)) => {
                for (offset, w) in list.iter().enumerate() {
                    if let Some(w) = as_number(resolve(doc, w)) {
                        widths.insert(first + offset as u32, w);
                    }
                }
                i += 2;
            }
            Some(last) => {
                let (Some(last), Some(w)) = (as_number(last), items.get(i + 2).and_then(|o| as_number(o)))
                else {
                    break;
                };
                for code in first..=last as u32 {
                    widths.insert(code, w);
                }
                i += 3;
            }
            None => break,
        }
    }
    widths
}

#[derive(Debug, PartialEq)]
enum CMapToken {
    Hex(Vec<u8>),
    Word(String),
    ArrayStart,
    ArrayEnd,
}

fn tokenize_cmap(data: &[u8]) -> Vec<CMapToken> {
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < data.len() {
        match data[i] {
            b'<' if data.get(i + 1) == Some(&b'<') => i += 2,
            b'>' if data.get(i + 1) == Some(&b'>') => i += 2,
            b'<' => {
                let end = data[i..].iter().position(|b| *b == b'>').map_or(data.len(), |p| i + p);
                let digits: Vec<u8> = data[i + 1..end]
                    .iter()
                    .filter(|b| b.is_ascii_hexdigit())
                    .copied()
                    .collect();
                tokens.push(CMapToken::Hex(hex_bytes(&digits)));
                i = end + 1;
            }
            b'[' => {
                tokens.push(CMapToken::ArrayStart);
                i += 1;
            }
            b']' => {
                tokens.push(CMapToken::ArrayEnd);
                i += 1;
            }
            b'%' => {
                while i < data.len() && data[i] != b'\n' && data[i] != b'\r' {
                    i += 1;
                }
            }
            b if b.is_ascii_whitespace() => i += 1,
            _ => {
                let start = i;
                while i < data.len()
                    && !data[i].is_ascii_whitespace()
                    && !matches!(data[i], b'<' | b'[' | b']' | b'%')
                {
                    i += 1;
                }
                tokens.push(CMapToken::Word(
                    String::from_utf8_lossy(&data[start..i]).into_owned(),
                ));
            }
        }
    }
    tokens
}

fn hex_bytes(digits: &[u8]) -> Vec<u8> {
    digits
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16).unwrap_or(0);
            let lo = pair.get(1).and_then(|d| (*d as char).to_digit(16)).unwrap_or(0);
            (hi * 16 + lo) as u8
        })
        .collect()
}

fn code_value(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0, |acc, b| acc << 8 | u32::from(*b))
}

fn utf16_text(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [single] => u16::from(*single),
            _ => 0,
        })
        .collect();
    String::from_utf16_lossy(&units)
}

/// Read `bfchar` and `bfrange` sections of a ToUnicode CMap.
pub fn parse_to_unicode(data: &[u8]) -> BTreeMap<u32, String> {
    let tokens = tokenize_cmap(data);
    let mut map = BTreeMap::new();
    let mut i = 0;

    while i < tokens.len() {
        match &tokens[i] {
            CMapToken::Word(w) if w == "beginbfchar" => {
                i += 1;
                while let (Some(CMapToken::Hex(src)), Some(CMapToken::Hex(dst))) =
                    (tokens.get(i), tokens.get(i + 1))
                {
                    map.insert(code_value(src), utf16_text(dst));
                    i += 2;
                }
            }
            CMapToken::Word(w) if w == "beginbfrange" => {
                i += 1;
                while let (Some(CMapToken::Hex(lo)), Some(CMapToken::Hex(hi))) =
                    (tokens.get(i), tokens.get(i + 1))
                {
                    let (lo, hi) = (code_value(lo), code_value(hi));
                    match tokens.get(i + 2) {
                        Some(CMapToken::Hex(dst)) => {
                            let base = utf16_text(dst);
                            let mut chars: Vec<char> = base.chars().collect();
                            for code in lo..=hi.min(lo.saturating_add(0xFFFF)) {
                                map.insert(code, chars.iter().collect());
                                if let Some(last) = chars.last_mut() {
                                    *last = char::from_u32(*last as u32 + 1).unwrap_or(*last);
                                }
                            }
                            i += 3;
                        }
                        Some(CMapToken::ArrayStart) => {
                            i += 3;
                            let mut code = lo;
                            while let Some(CMapToken::Hex(dst)) = tokens.get(i) {
                                if code <= hi {
                                    map.insert(code, utf16_text(dst));
                                }
                                code += 1;
                                i += 1;
                            }
                            if let Some(CMapToken::ArrayEnd) = tokens.get(i) {
                                i += 1;
                            }
                        }
                        _ => break,
                    }
                }
            }
            _ => i += 1,
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};

    #[test]
    fn test_helvetica_widths() {
        assert_eq!(helvetica_width(' '), 278.0);
        assert_eq!(helvetica_width('H'), 722.0);
        assert_eq!(helvetica_width('i'), 222.0);
        assert_eq!(helvetica_width('~'), 584.0);
        assert!((helvetica_text_width("Hi", 10.0) - 9.44).abs() < 1e-9);
    }

    #[test]
    fn test_win_ansi_round_trip() {
        let bytes = encode_win_ansi("Ünïcode €");
        assert_eq!(bytes[0], 0xDC);
        assert_eq!(*bytes.last().unwrap(), 0x80);
        let font = FontInfo::default();
        let decoded: String = bytes.iter().map(|b| font.decode(u32::from(*b))).collect();
        assert_eq!(decoded, "Ünïcode €");
        assert_eq!(encode_win_ansi("日"), b"?");
    }

    #[test]
    fn test_widths_array_with_first_char() {
        let doc = Document::with_version("1.7");
        let font = dictionary! {
            "Type" => "Font",
            "Subtype" => "TrueType",
            "BaseFont" => "Arial",
            "FirstChar" => 65,
            "Widths" => vec![600.into(), 700.into()],
        };
        let info = FontInfo::load(&doc, &font);
        assert!((info.advance(66) - 0.7).abs() < 1e-9);
        // Outside the table and no MissingWidth
        assert_eq!(info.advance(90), 0.0);
    }

    #[test]
    fn test_courier_is_monospaced() {
        let info = FontInfo::builtin("Courier-Bold");
        assert!((info.advance('i' as u32) - 0.6).abs() < 1e-9);
        assert!((info.advance('W' as u32) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_type0_font_uses_cid_widths_and_cmap() {
        let mut doc = Document::with_version("1.7");
        let cmap = b"/CIDInit /ProcSet findresource begin\n\
            2 beginbfchar\n<0003> <0020>\n<0024> <0041>\nendbfchar\n\
            1 beginbfrange\n<0044> <0046> <0061>\nendbfrange\nend";
        let cmap_id = doc.add_object(Stream::new(dictionary! {}, cmap.to_vec()));
        let font = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => "NotoSans",
            "Encoding" => "Identity-H",
            "ToUnicode" => cmap_id,
            "DescendantFonts" => vec![Object::Dictionary(dictionary! {
                "Subtype" => "CIDFontType2",
                "DW" => 500,
                "W" => vec![36.into(), vec![Object::from(650)].into(), 68.into(), 70.into(), 520.into()],
            })],
        };
        let info = FontInfo::load(&doc, &font);

        assert_eq!(info.codes(&[0x00, 0x24, 0x00, 0x45]), vec![0x24, 0x45]);
        assert_eq!(info.decode(0x24), "A");
        assert_eq!(info.decode(0x45), "b");
        assert_eq!(info.decode(0x03), " ");
        assert!((info.advance(0x24) - 0.65).abs() < 1e-9);
        assert!((info.advance(0x46) - 0.52).abs() < 1e-9);
        assert!((info.advance(0x10) - 0.5).abs() < 1e-9);
        assert!(!info.is_word_space(0x20));
    }

    #[test]
    fn test_bfrange_with_array_destination() {
        let cmap = b"1 beginbfrange <01> <02> [<0058> <0059>] endbfrange";
        let map = parse_to_unicode(cmap);
        assert_eq!(map.get(&1).map(String::as_str), Some("X"));
        assert_eq!(map.get(&2).map(String::as_str), Some("Y"));
    }
}
