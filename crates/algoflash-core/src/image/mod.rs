//! Image formats
//!
//! Programming images arrive either as Intel HEX, which carries its own
//! addresses, or as a flat binary that is placed at a caller-supplied
//! flash address.

mod hex;

pub use hex::{DataChunk, HexDecoder, HexError, HexErrorKind, MAX_RECORD_DATA};

/// Format of a programming image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Intel HEX records (addresses intrinsic to the file)
    IntelHex,
    /// Raw bytes placed at an explicit flash address
    Binary,
}

impl ImageFormat {
    /// Guess the format from a file name
    ///
    /// `.hex` and `.ihex` (any case) are Intel HEX; everything else is
    /// treated as a flat binary.
    pub fn from_file_name(name: &str) -> Self {
        let ext = name.rsplit_once('.').map(|(_, ext)| ext);
        match ext {
            Some(ext) if ext.eq_ignore_ascii_case("hex") || ext.eq_ignore_ascii_case("ihex") => {
                ImageFormat::IntelHex
            }
            _ => ImageFormat::Binary,
        }
    }

    /// Whether images of this format need an explicit flash address
    pub fn needs_flash_address(self) -> bool {
        self == ImageFormat::Binary
    }
}
