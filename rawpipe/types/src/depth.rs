/*!
    PCM bit depth.
*/

use crate::{Error, Result};

/**
    Bit depth of signed little-endian PCM samples on the wire.

    The wire format is negotiated once when a session opens and is never
    renegotiated mid-stream.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BitDepth {
    /// Signed 16-bit samples.
    #[default]
    S16,
    /// Signed 24-bit samples.
    S24,
    /// Signed 32-bit samples.
    S32,
}

impl BitDepth {
    /**
        Create a bit depth from a bit count. Only 16, 24 and 32 are accepted.
    */
    pub fn from_bits(bits: u32) -> Result<Self> {
        match bits {
            16 => Ok(Self::S16),
            24 => Ok(Self::S24),
            32 => Ok(Self::S32),
            other => Err(Error::configuration(format!(
                "acceptable bit depths are 16, 24 and 32, got {}",
                other
            ))),
        }
    }

    /**
        Returns the number of bits per sample.
    */
    pub const fn bits(self) -> u32 {
        match self {
            Self::S16 => 16,
            Self::S24 => 24,
            Self::S32 => 32,
        }
    }

    /**
        Returns the number of bytes per sample per channel.
    */
    pub const fn bytes(self) -> usize {
        match self {
            Self::S16 => 2,
            Self::S24 => 3,
            Self::S32 => 4,
        }
    }

    /**
        Returns the FFmpeg raw-format name for this depth.
    */
    pub const fn pcm_format(self) -> &'static str {
        match self {
            Self::S16 => "s16le",
            Self::S24 => "s24le",
            Self::S32 => "s32le",
        }
    }
}
