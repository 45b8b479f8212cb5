/*!
    Media sinks for the rawpipe crate ecosystem.

    A sink feeds raw units into an encode subprocess. [`VideoWriter`] and
    [`AudioWriter`] drive a single-input encoder through its stdin;
    [`AudioVideoWriter`] adds a second input over a loopback socket so one
    encoder can mux both kinds into one container. Every writer lands its
    result in an [`Output`]: a file path or a caller-supplied byte stream.
*/

mod audio;
mod av;
mod output;
mod video;

pub use audio::AudioWriter;
pub use av::AudioVideoWriter;
pub use output::Output;
pub use video::VideoWriter;
