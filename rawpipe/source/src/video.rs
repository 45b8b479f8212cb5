/*!
    Raw video decoding from a media file.
*/

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ChildStdout;
use std::time::Duration;

use rawpipe_host::{IoMode, ProcessHost, Session, SessionState, SpawnOptions};
use rawpipe_types::{Error, Result, VideoFrame};

use crate::probe::{self, VideoMetadata};

const CLOSE_GRACE: Duration = Duration::from_secs(3);

/**
    Reads a media file as a stream of raw RGB24 frames.

    The file is probed once with [`load_metadata`](Self::load_metadata),
    then decoded by a transcoder subprocess whose stdout carries nothing
    but pixel data. The reader never parses the container itself.
*/
#[derive(Debug)]
pub struct VideoReader {
    path: PathBuf,
    transcoder: String,
    prober: String,
    spawn_options: SpawnOptions,
    metadata: Option<VideoMetadata>,
    session: Session,
    stream: Option<ChildStdout>,
    frames_read: u64,
}

impl VideoReader {
    /**
        Create a reader for the file at `path`. The file must exist.
    */
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such media file: {}", path.display()),
            )));
        }
        Ok(Self {
            path,
            transcoder: "ffmpeg".to_string(),
            prober: "ffprobe".to_string(),
            spawn_options: SpawnOptions::default(),
            metadata: None,
            session: Session::new(),
            stream: None,
            frames_read: 0,
        })
    }

    /**
        Use custom transcoder/prober executables instead of `ffmpeg` and
        `ffprobe` from PATH.
    */
    pub fn with_executables(
        mut self,
        transcoder: impl Into<String>,
        prober: impl Into<String>,
    ) -> Self {
        self.transcoder = transcoder.into();
        self.prober = prober.into();
        self
    }

    pub fn with_spawn_options(mut self, options: SpawnOptions) -> Self {
        self.spawn_options = options;
        self
    }

    /**
        Metadata, once loaded.
    */
    pub fn metadata(&self) -> Option<&VideoMetadata> {
        self.metadata.as_ref()
    }

    /**
        Probe the file and cache the derived video metadata. Loading twice
        is [`Error::AlreadyLoaded`].
    */
    pub fn load_metadata(&mut self, ignore_stream_errors: bool) -> Result<&VideoMetadata> {
        if self.metadata.is_some() {
            return Err(Error::AlreadyLoaded);
        }
        let document = probe::run_prober(&self.prober, &self.path)?;
        let metadata = VideoMetadata::from_document(document, ignore_stream_errors)?;
        Ok(self.metadata.insert(metadata))
    }

    /**
        Start decoding from the beginning of the file.
    */
    pub fn open(&mut self) -> Result<()> {
        self.open_at(0.0)
    }

    /**
        Start decoding from `offset_secs` into the file. The seek lands on
        the nearest decodable point, not an exact frame.

        Requires loaded metadata and a closed session.
    */
    pub fn open_at(&mut self, offset_secs: f64) -> Result<()> {
        // Reject before spawning anything: a live session must keep its
        // stream and counters untouched by a failed open.
        if self.session.is_open() {
            return Err(Error::invalid_state("reader is already open"));
        }
        if self.metadata.is_none() {
            return Err(Error::invalid_state(
                "metadata must be loaded before opening",
            ));
        }
        if !offset_secs.is_finite() || offset_secs < 0.0 {
            return Err(Error::configuration("decode offset must be non-negative"));
        }

        let mut args: Vec<String> = self.spawn_options.verbosity_args().into();
        if offset_secs > 0.0 {
            args.push("-ss".to_string());
            args.push(offset_secs.to_string());
        }
        args.extend([
            "-i".to_string(),
            self.path.to_string_lossy().into_owned(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-".to_string(),
        ]);

        let mut handle = ProcessHost::spawn(&self.transcoder, args, IoMode::read())?;
        self.stream = handle.take_output();
        self.frames_read = 0;
        self.session.begin_read(handle)
    }

    /**
        An empty frame sized to the probed dimensions, for reuse across
        [`next_frame`](Self::next_frame) calls.
    */
    pub fn frame_buffer(&self) -> Result<VideoFrame> {
        let metadata = self
            .metadata
            .as_ref()
            .ok_or_else(|| Error::invalid_state("metadata must be loaded first"))?;
        VideoFrame::new(metadata.width, metadata.height)
    }

    /**
        Refill `frame` with the next frame of the open decode session.
        Returns false at end-of-stream.
    */
    pub fn next_frame(&mut self, frame: &mut VideoFrame) -> Result<bool> {
        let stream = self.open_stream()?;
        let more = frame.load(stream)?;
        if more {
            self.frames_read += 1;
        }
        Ok(more)
    }

    /**
        Frames delivered by the current decode session.
    */
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /**
        Copy the rest of the raw decode stream into `dest`. Returns the
        number of bytes moved.
    */
    pub fn copy_to<W: Write + ?Sized>(&mut self, dest: &mut W) -> Result<u64> {
        let stream = self.open_stream()?;
        io::copy(stream, dest).map_err(Error::Io)
    }

    fn open_stream(&mut self) -> Result<&mut ChildStdout> {
        if self.session.state() != SessionState::Reading {
            return Err(Error::invalid_state("reader is not open"));
        }
        self.stream
            .as_mut()
            .ok_or_else(|| Error::invalid_state("decode stream was taken"))
    }

    /**
        End the decode session. Closing a closed reader is a no-op; the
        metadata survives for a later reopen.
    */
    pub fn close(&mut self) -> Result<()> {
        self.stream = None;
        self.session.close(CLOSE_GRACE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::test_support::{fake_media_file, stub_executable};

    const MINIMAL_DOC: &str = r#"{"streams":[{"codec_type":"video","codec_name":"h264","width":4,"height":2,"avg_frame_rate":"25/1","duration":"2.0"}]}"#;

    #[test]
    fn missing_file_is_rejected_up_front() {
        let err = VideoReader::new("/definitely/not/here.mp4").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("not/here.mp4"));
    }

    #[test]
    fn open_requires_loaded_metadata() {
        let media = fake_media_file();
        let mut reader = VideoReader::new(media.path()).unwrap();
        assert!(reader.open().unwrap_err().is_usage_error());
        assert!(reader.frame_buffer().unwrap_err().is_usage_error());
    }

    #[test]
    fn metadata_loads_once() {
        let media = fake_media_file();
        let (_dir, prober) = stub_executable(&format!("cat <<'EOF'\n{MINIMAL_DOC}\nEOF"));
        let mut reader = VideoReader::new(media.path())
            .unwrap()
            .with_executables("ffmpeg", &prober);

        let metadata = reader.load_metadata(false).unwrap();
        assert_eq!((metadata.width, metadata.height), (4, 2));
        assert_eq!(metadata.predicted_frame_count, 50);

        assert!(matches!(
            reader.load_metadata(false),
            Err(Error::AlreadyLoaded)
        ));
    }

    #[test]
    fn frames_flow_until_the_pipe_ends() {
        let media = fake_media_file();
        let (_probe_dir, prober) =
            stub_executable(&format!("cat <<'EOF'\n{MINIMAL_DOC}\nEOF"));
        // Two 4x2 RGB24 frames worth of zero bytes.
        let (_dec_dir, decoder) = stub_executable("head -c 48 /dev/zero");

        let mut reader = VideoReader::new(media.path())
            .unwrap()
            .with_executables(&decoder, &prober);
        reader.load_metadata(false).unwrap();
        reader.open().unwrap();

        let mut frame = reader.frame_buffer().unwrap();
        assert!(reader.next_frame(&mut frame).unwrap());
        assert!(reader.next_frame(&mut frame).unwrap());
        assert!(!reader.next_frame(&mut frame).unwrap());
        assert_eq!(reader.frames_read(), 2);

        reader.close().unwrap();
        reader.close().unwrap();
    }

    #[test]
    fn double_open_is_rejected_and_preserves_the_live_session() {
        let media = fake_media_file();
        let (_probe_dir, prober) =
            stub_executable(&format!("cat <<'EOF'\n{MINIMAL_DOC}\nEOF"));
        // One 4x2 frame of 'A' bytes, then linger so the session stays open.
        let (_dec_dir, decoder) =
            stub_executable("printf 'AAAAAAAAAAAAAAAAAAAAAAAA'; sleep 1");

        let mut reader = VideoReader::new(media.path())
            .unwrap()
            .with_executables(&decoder, &prober);
        reader.load_metadata(false).unwrap();
        reader.open().unwrap();
        assert!(reader.open().unwrap_err().is_usage_error());

        // The rejected open must not have clobbered the first session's
        // stream or counters.
        let mut frame = reader.frame_buffer().unwrap();
        assert!(reader.next_frame(&mut frame).unwrap());
        assert!(frame.payload().iter().all(|&b| b == b'A'));
        assert_eq!(reader.frames_read(), 1);
        reader.close().unwrap();
    }

    #[test]
    fn negative_offset_is_rejected() {
        let media = fake_media_file();
        let (_probe_dir, prober) =
            stub_executable(&format!("cat <<'EOF'\n{MINIMAL_DOC}\nEOF"));
        let mut reader = VideoReader::new(media.path())
            .unwrap()
            .with_executables("ffmpeg", &prober);
        reader.load_metadata(false).unwrap();
        assert!(reader.open_at(-1.0).unwrap_err().is_usage_error());
    }
}
