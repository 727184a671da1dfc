use std::fmt::Write;

use crate::model::{FieldKind, HexFrame};

const RULE_WIDTH: usize = 60;

/// Classic 16-bytes-per-line dump: offset, hex bytes, printable ASCII.
pub fn hex_dump(bytes: &[u8]) -> Vec<String> {
    bytes
        .chunks(16)
        .enumerate()
        .map(|(line, chunk)| {
            let hex = chunk
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<Vec<_>>()
                .join(" ");
            let ascii: String = chunk
                .iter()
                .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
                .collect();
            format!("{:08x}: {hex:<48} {ascii}", line * 16)
        })
        .collect()
}

pub fn render_report(frame: &HexFrame) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = String::new();

    let _ = writeln!(out, "{rule}\nHEX MESSAGE PARSER\n{rule}\n");
    let _ = writeln!(out, "Full hex: {}", frame.hex);
    let _ = writeln!(
        out,
        "Length: {} characters ({} bytes)\n",
        frame.hex.len(),
        frame.byte_len()
    );

    let _ = writeln!(out, "Raw bytes view:");
    for line in hex_dump(&frame.bytes) {
        let _ = writeln!(out, "{line}");
    }
    let _ = writeln!(out);

    for field in &frame.fields {
        let label = format!("{}:", field.kind.label());
        let _ = write!(
            out,
            "[{:04}-{:04}] {label:<12} {}",
            field.start, field.end, field.hex
        );
        match field.kind {
            FieldKind::DataLength => {
                if let Some(length) = frame.data_length {
                    let _ = write!(out, " ({length} bytes)");
                }
            }
            FieldKind::Payload => {
                if let Some(ascii) = &frame.payload_ascii {
                    let _ = write!(out, "\n                 (ASCII): {ascii}");
                }
            }
            _ => {}
        }
        let _ = writeln!(out);
    }

    if let Some(id) = frame.codec_id {
        let _ = writeln!(out, "\n{rule}\nCODEC INFORMATION\n{rule}");
        let _ = writeln!(out, "Codec ID: {id:02X}");
        match frame.codec {
            Some(info) => {
                let _ = writeln!(out, "Type: {}", info.kind);
                let _ = writeln!(out, "Description: {}", info.description);
                let _ = writeln!(out, "Decoder: {}", info.decoder);
            }
            None => {
                let _ = writeln!(out, "Type: Unknown");
                let _ = writeln!(out, "Description: Unknown codec ID: {id:02X}");
                let _ = writeln!(out, "Decoder: No decoder available");
            }
        }
        let _ = writeln!(out, "{rule}");
    }

    out
}
