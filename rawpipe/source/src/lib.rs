/*!
    Media sources for the rawpipe crate ecosystem.

    A source is a media file read through two subprocesses: a prober that
    reports what the file contains as a JSON document, and a decoder that
    turns one stream of it into raw units on a pipe. [`VideoReader`] and
    [`AudioReader`] wrap the pair behind a load/open/read/close surface.
*/

mod audio;
mod probe;
mod video;

pub use audio::AudioReader;
pub use probe::{
    AudioMetadata, FormatRecord, ProbeDocument, StreamRecord, VideoMetadata,
};
pub use video::VideoReader;
