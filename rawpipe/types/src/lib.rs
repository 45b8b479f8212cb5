/*!
    Shared types for the rawpipe crate ecosystem.

    This crate defines the vocabulary of the ecosystem: the types that cross
    crate boundaries, such as errors, raw media units and encoder option
    values. It does
    not spawn processes or touch the filesystem, so consumers can depend on it
    without pulling in the process-hosting machinery.
*/

mod depth;
mod error;
mod options;
mod unit;

pub use depth::BitDepth;
pub use error::{Error, Result};
pub use options::{
    AacEncoder, EncoderOptions, H264Encoder, Mp3Encoder, Preset, Profile, RateControl, Tune,
    Vp9Encoder, Vp9Quality,
};
pub use unit::{AudioBlock, MediaUnit, VideoFrame};
