pub mod errors;
pub mod model;
mod registry;
mod render;

pub use errors::FrameError;
pub use model::{parse_hex_frame, FieldKind, FrameField, HexFrame};
pub use registry::{known_codecs, lookup_codec, CodecInfo};
pub use render::{hex_dump, render_report};
