use std::fmt;

use serde::Serialize;

use crate::errors::FrameError;
use crate::registry::{lookup_codec, CodecInfo};

/// Hex characters taken by the fixed-width header fields and the trailing CRC.
const PREAMBLE_CHARS: usize = 8;
const DATA_LENGTH_CHARS: usize = 8;
const CODEC_ID_CHARS: usize = 2;
const CRC_CHARS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Preamble,
    DataLength,
    CodecId,
    Payload,
    Crc,
}

impl FieldKind {
    pub fn label(&self) -> &'static str {
        match self {
            FieldKind::Preamble => "Preamble",
            FieldKind::DataLength => "Data Length",
            FieldKind::CodecId => "Codec ID",
            FieldKind::Payload => "Payload",
            FieldKind::Crc => "CRC",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One annotated field. `start` and `end` are inclusive offsets into the
/// normalized hex string, not byte offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameField {
    pub kind: FieldKind,
    pub start: usize,
    pub end: usize,
    pub hex: String,
}

impl FrameField {
    fn new(kind: FieldKind, hex: &str, start: usize, len: usize) -> Self {
        Self {
            kind,
            start,
            end: (start + len).saturating_sub(1),
            hex: hex[start..start + len].to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HexFrame {
    pub hex: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub fields: Vec<FrameField>,
    pub data_length: Option<u32>,
    pub codec_id: Option<u8>,
    #[serde(skip)]
    pub codec: Option<&'static CodecInfo>,
    pub payload_ascii: Option<String>,
}

impl HexFrame {
    pub fn field(&self, kind: FieldKind) -> Option<&FrameField> {
        self.fields.iter().find(|field| field.kind == kind)
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn payload_bytes(&self) -> Option<Vec<u8>> {
        self.field(FieldKind::Payload)
            .and_then(|field| decode_hex(&field.hex).ok())
    }
}

/// Parses a device frame given as hex.
///
/// Spaces and newlines are ignored and digits are normalized to upper case.
/// The layout is preamble (4 bytes), big-endian data length (4 bytes), codec
/// id (1 byte), payload and a trailing 4-byte CRC. Truncated input yields the
/// leading fields that fit; each field is only read once the previous one was.
pub fn parse_hex_frame(input: &str) -> Result<HexFrame, FrameError> {
    let hex: String = input
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();

    let bytes = decode_hex(&hex)?;
    let mut fields = Vec::new();
    let mut data_length = None;
    let mut codec_id = None;
    let mut payload_ascii = None;
    let mut pos = 0;

    'layout: {
        if hex.len() < pos + PREAMBLE_CHARS {
            break 'layout;
        }
        fields.push(FrameField::new(FieldKind::Preamble, &hex, pos, PREAMBLE_CHARS));
        pos += PREAMBLE_CHARS;

        if hex.len() < pos + DATA_LENGTH_CHARS {
            break 'layout;
        }
        let field = FrameField::new(FieldKind::DataLength, &hex, pos, DATA_LENGTH_CHARS);
        data_length = u32::from_str_radix(&field.hex, 16).ok();
        fields.push(field);
        pos += DATA_LENGTH_CHARS;

        if hex.len() < pos + CODEC_ID_CHARS {
            break 'layout;
        }
        let field = FrameField::new(FieldKind::CodecId, &hex, pos, CODEC_ID_CHARS);
        codec_id = u8::from_str_radix(&field.hex, 16).ok();
        fields.push(field);
        pos += CODEC_ID_CHARS;

        if hex.len() < pos + CRC_CHARS {
            break 'layout;
        }
        let payload_end = hex.len() - CRC_CHARS;
        let field = FrameField::new(FieldKind::Payload, &hex, pos, payload_end - pos);
        payload_ascii = decode_hex(&field.hex)
            .ok()
            .and_then(|payload| printable_preview(&payload));
        fields.push(field);
        pos = payload_end;

        fields.push(FrameField::new(FieldKind::Crc, &hex, pos, CRC_CHARS));
    }

    Ok(HexFrame {
        hex,
        bytes,
        fields,
        data_length,
        codec_id,
        codec: codec_id.and_then(lookup_codec),
        payload_ascii,
    })
}

pub(crate) fn decode_hex(hex: &str) -> Result<Vec<u8>, FrameError> {
    if hex.is_empty() {
        return Err(FrameError::Empty);
    }
    if hex.len() % 2 != 0 {
        return Err(FrameError::OddLength { length: hex.len() });
    }

    let digits: Vec<char> = hex.chars().collect();
    let mut bytes = Vec::with_capacity(digits.len() / 2);
    for (index, pair) in digits.chunks(2).enumerate() {
        let mut value = 0u8;
        for (offset, digit) in pair.iter().enumerate() {
            let nibble = digit.to_digit(16).ok_or(FrameError::InvalidDigit {
                digit: *digit,
                position: index * 2 + offset,
            })?;
            value = (value << 4) | nibble as u8;
        }
        bytes.push(value);
    }
    Ok(bytes)
}

/// Renders bytes as text, replacing anything non-printable with `.`.
/// Returns `None` when nothing readable is left.
pub(crate) fn printable_preview(bytes: &[u8]) -> Option<String> {
    let text: String = bytes
        .iter()
        .map(|&b| {
            if b == b'\n' || (0x20..0x7f).contains(&b) {
                b as char
            } else {
                '.'
            }
        })
        .collect();

    let readable = bytes.iter().any(|b| b.is_ascii_alphanumeric());
    readable.then_some(text)
}
