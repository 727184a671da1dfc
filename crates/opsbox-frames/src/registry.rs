use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CodecInfo {
    pub id: u8,
    pub kind: &'static str,
    pub description: &'static str,
    pub decoder: &'static str,
}

const CODECS: &[CodecInfo] = &[
    CodecInfo {
        id: 0x87,
        kind: "AVL Data (High Priority)",
        description: "High priority AVL data with extended records",
        decoder: "Codec87 or Codec87BM50 (for BM50)",
    },
    CodecInfo {
        id: 0x88,
        kind: "AVL Data (Extended)",
        description: "Extended AVL data packet",
        decoder: "Codec88 or Codec88BM50 (for BM50)",
    },
    CodecInfo {
        id: 0x89,
        kind: "Command Response",
        description: "Response to commands sent to device",
        decoder: "Codec89 or Codec89BM (for BM50)",
    },
    CodecInfo {
        id: 0x90,
        kind: "Sensor List",
        description: "List of available sensors on the device",
        decoder: "Codec90 or Codec90BM (for BM50)",
    },
    CodecInfo {
        id: 0x91,
        kind: "Log Response",
        description: "Log data from device (shares the command response layout)",
        decoder: "Codec89 or Codec89BM (for BM50)",
    },
    CodecInfo {
        id: 0x92,
        kind: "PGN List",
        description: "List of CAN PGN (Parameter Group Numbers)",
        decoder: "Codec92 or Codec92BM (for BM50)",
    },
    CodecInfo {
        id: 0x94,
        kind: "Source List",
        description: "List of data sources",
        decoder: "Codec94 or Codec94BM (for BM50)",
    },
    CodecInfo {
        id: 0x95,
        kind: "Log Data",
        description: "Debug log data (mobile app)",
        decoder: "log data reader",
    },
    CodecInfo {
        id: 0xA0,
        kind: "Login/ACK",
        description: "Login acknowledgment for BM50 protocol",
        decoder: "CodecA0",
    },
    CodecInfo {
        id: 0xA4,
        kind: "Sensor List (BM50)",
        description: "BM50 sensor list",
        decoder: "CodecA4",
    },
    CodecInfo {
        id: 0xA7,
        kind: "AVL Data (BM50)",
        description: "BM50 AVL data",
        decoder: "CodecA7",
    },
    CodecInfo {
        id: 0xA8,
        kind: "AVL Data (BM50 Extended)",
        description: "BM50 extended AVL data",
        decoder: "CodecA8",
    },
];

pub fn known_codecs() -> &'static [CodecInfo] {
    CODECS
}

pub fn lookup_codec(id: u8) -> Option<&'static CodecInfo> {
    CODECS.iter().find(|codec| codec.id == id)
}
