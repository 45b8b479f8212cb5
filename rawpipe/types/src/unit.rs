/*!
    Raw media units: fixed-size byte buffers holding one video frame or one
    block of audio samples.

    Units are allocated once and refilled across many reads, so hot decode
    loops do not allocate per frame. The load protocol reads until the buffer
    is full or the stream ends; a non-empty short tail is accepted as a final
    truncated unit (the logical payload shrinks), and only zero bytes on the
    first read of a unit signals end-of-stream. Callers that must reject
    truncated units can use [`VideoFrame::load_exact`] /
    [`AudioBlock::load_exact`] instead.
*/

use std::io::{self, Read};

use crate::{BitDepth, Error, Result};

/**
    Capability interface shared by raw media units.
*/
pub trait MediaUnit {
    /// Full capacity of the unit in bytes.
    fn capacity(&self) -> usize;

    /// The logically valid bytes of the unit. Equal to the capacity except
    /// after a tolerant load hit a truncated final unit.
    fn payload(&self) -> &[u8];

    /// Refill the unit from a byte stream. Returns false at end-of-stream.
    fn load(&mut self, reader: &mut dyn Read) -> io::Result<bool>;
}

/**
    Read into `buf` until it is full or the stream ends.

    Returns the number of bytes placed in the buffer. Interrupted reads are
    retried.
*/
fn fill(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut offset = 0;
    while offset < buf.len() {
        match reader.read(&mut buf[offset..]) {
            Ok(0) => break,
            Ok(n) => offset += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(offset)
}

/**
    One video frame of interleaved 24-bit RGB pixel data.
*/
#[derive(Debug)]
pub struct VideoFrame {
    width: u32,
    height: u32,
    buf: Vec<u8>,
    filled: usize,
}

impl VideoFrame {
    /**
        Create an empty frame with the given dimensions. The buffer holds
        `width * height * 3` bytes.
    */
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::configuration(
                "video frame dimensions must be at least one pixel",
            ));
        }

        let size = width as usize * height as usize * 3;
        Ok(Self {
            width,
            height,
            buf: vec![0; size],
            filled: size,
        })
    }

    /**
        Frame width in pixels.
    */
    pub fn width(&self) -> u32 {
        self.width
    }

    /**
        Frame height in pixels.
    */
    pub fn height(&self) -> u32 {
        self.height
    }

    /**
        Refill the frame from a raw RGB24 stream (tolerant policy).

        A short but non-empty final read yields a truncated payload and still
        returns true; zero bytes on the first read returns false.
    */
    pub fn load(&mut self, reader: &mut dyn Read) -> io::Result<bool> {
        let n = fill(reader, &mut self.buf)?;
        self.filled = n;
        Ok(n > 0)
    }

    /**
        Refill the frame, treating any short read as end-of-stream (strict
        policy). On false the payload is empty.
    */
    pub fn load_exact(&mut self, reader: &mut dyn Read) -> io::Result<bool> {
        let n = fill(reader, &mut self.buf)?;
        if n < self.buf.len() {
            self.filled = 0;
            return Ok(false);
        }
        self.filled = n;
        Ok(true)
    }

    /**
        The three bytes of the pixel at `(x, y)`.
    */
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let index = (x + y * self.width) as usize * 3;
        &self.buf[index..index + 3]
    }

    /**
        Mutable access to the pixel at `(x, y)`.
    */
    pub fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [u8] {
        let index = (x + y * self.width) as usize * 3;
        &mut self.buf[index..index + 3]
    }

    /**
        Mutable access to the whole frame buffer, for callers that produce
        frames rather than load them.
    */
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.filled = self.buf.len();
        &mut self.buf
    }

    /**
        Full capacity of the frame in bytes.
    */
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /**
        The logically valid bytes of the frame.
    */
    pub fn payload(&self) -> &[u8] {
        &self.buf[..self.filled]
    }
}

impl MediaUnit for VideoFrame {
    fn capacity(&self) -> usize {
        VideoFrame::capacity(self)
    }

    fn payload(&self) -> &[u8] {
        VideoFrame::payload(self)
    }

    fn load(&mut self, reader: &mut dyn Read) -> io::Result<bool> {
        VideoFrame::load(self, reader)
    }
}

/**
    One block of signed little-endian PCM audio samples.
*/
#[derive(Debug)]
pub struct AudioBlock {
    samples: u32,
    channels: u32,
    depth: BitDepth,
    buf: Vec<u8>,
    filled: usize,
}

impl AudioBlock {
    /**
        Create an empty block holding `samples` interleaved samples for
        `channels` channels at the given bit depth.
    */
    pub fn new(samples: u32, channels: u32, depth: BitDepth) -> Result<Self> {
        if samples == 0 {
            return Err(Error::configuration("sample count must be bigger than 0"));
        }
        if channels == 0 {
            return Err(Error::configuration("channel count must be bigger than 0"));
        }

        let size = samples as usize * channels as usize * depth.bytes();
        Ok(Self {
            samples,
            channels,
            depth,
            buf: vec![0; size],
            filled: size,
        })
    }

    /**
        Number of channels.
    */
    pub fn channels(&self) -> u32 {
        self.channels
    }

    /**
        Bit depth of the samples.
    */
    pub fn depth(&self) -> BitDepth {
        self.depth
    }

    /**
        Number of whole samples currently held, per channel. Less than the
        block's nominal sample count after a truncated final load.
    */
    pub fn loaded_samples(&self) -> u32 {
        (self.filled / (self.channels as usize * self.depth.bytes())) as u32
    }

    /**
        Refill the block from a raw PCM stream (tolerant policy).
    */
    pub fn load(&mut self, reader: &mut dyn Read) -> io::Result<bool> {
        let n = fill(reader, &mut self.buf)?;
        self.filled = n;
        Ok(n > 0)
    }

    /**
        Refill the block, treating any short read as end-of-stream (strict
        policy). On false the payload is empty.
    */
    pub fn load_exact(&mut self, reader: &mut dyn Read) -> io::Result<bool> {
        let n = fill(reader, &mut self.buf)?;
        if n < self.buf.len() {
            self.filled = 0;
            return Ok(false);
        }
        self.filled = n;
        Ok(true)
    }

    /**
        The bytes of sample `index` on channel `channel`.
    */
    pub fn sample(&self, index: u32, channel: u32) -> &[u8] {
        let bytes = self.depth.bytes();
        let start = (index * self.channels + channel) as usize * bytes;
        &self.buf[start..start + bytes]
    }

    /**
        Mutable access to the whole block buffer.
    */
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.filled = self.buf.len();
        &mut self.buf
    }

    /**
        Full capacity of the block in bytes.
    */
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /**
        The logically valid bytes of the block.
    */
    pub fn payload(&self) -> &[u8] {
        &self.buf[..self.filled]
    }
}

impl MediaUnit for AudioBlock {
    fn capacity(&self) -> usize {
        AudioBlock::capacity(self)
    }

    fn payload(&self) -> &[u8] {
        AudioBlock::payload(self)
    }

    fn load(&mut self, reader: &mut dyn Read) -> io::Result<bool> {
        AudioBlock::load(self, reader)
    }
}
