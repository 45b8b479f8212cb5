/*!
    Raw audio decoding from a media file.
*/

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ChildStdout;
use std::time::Duration;

use rawpipe_host::{IoMode, ProcessHost, Session, SessionState, SpawnOptions};
use rawpipe_types::{AudioBlock, BitDepth, Error, Result};

use crate::probe::{self, AudioMetadata};

const CLOSE_GRACE: Duration = Duration::from_secs(3);

/**
    Reads a media file as a stream of raw interleaved PCM samples.

    The wire bit depth is chosen when the session opens and held for its
    whole life; channel count and sample rate follow the source stream.
*/
pub struct AudioReader {
    path: PathBuf,
    transcoder: String,
    prober: String,
    spawn_options: SpawnOptions,
    metadata: Option<AudioMetadata>,
    session: Session,
    stream: Option<ChildStdout>,
    samples_read: u64,
}

impl AudioReader {
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
            samples_read: 0,
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
    pub fn metadata(&self) -> Option<&AudioMetadata> {
        self.metadata.as_ref()
    }

    /**
        Probe the file and cache the derived audio metadata. Loading twice
        is [`Error::AlreadyLoaded`].
    */
    pub fn load_metadata(&mut self, ignore_stream_errors: bool) -> Result<&AudioMetadata> {
        if self.metadata.is_some() {
            return Err(Error::AlreadyLoaded);
        }
        let document = probe::run_prober(&self.prober, &self.path)?;
        let metadata = AudioMetadata::from_document(document, ignore_stream_errors)?;
        Ok(self.metadata.insert(metadata))
    }

    /**
        Start decoding with samples delivered at `depth`.

        Requires loaded metadata and a closed session.
    */
    pub fn open(&mut self, depth: BitDepth) -> Result<()> {
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

        let mut args: Vec<String> = self.spawn_options.verbosity_args().into();
        args.extend([
            "-i".to_string(),
            self.path.to_string_lossy().into_owned(),
            "-f".to_string(),
            depth.pcm_format().to_string(),
            "-".to_string(),
        ]);

        let mut handle = ProcessHost::spawn(&self.transcoder, args, IoMode::read())?;
        self.stream = handle.take_output();
        self.samples_read = 0;
        self.session.begin_read(handle)
    }

    /**
        An empty block of `samples` samples matching the probed channel
        count, at the given wire depth.
    */
    pub fn block_buffer(&self, samples: u32, depth: BitDepth) -> Result<AudioBlock> {
        let metadata = self
            .metadata
            .as_ref()
            .ok_or_else(|| Error::invalid_state("metadata must be loaded first"))?;
        AudioBlock::new(samples, metadata.channels, depth)
    }

    /**
        Refill `block` with the next run of samples. Returns false at
        end-of-stream.
    */
    pub fn next_block(&mut self, block: &mut AudioBlock) -> Result<bool> {
        let stream = self.open_stream()?;
        let more = block.load(stream)?;
        if more {
            self.samples_read += u64::from(block.loaded_samples());
        }
        Ok(more)
    }

    /**
        Samples delivered by the current decode session, per channel.
    */
    pub fn samples_read(&self) -> u64 {
        self.samples_read
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

    const MINIMAL_DOC: &str = r#"{"streams":[{"codec_type":"audio","codec_name":"aac","sample_fmt":"fltp","sample_rate":"8000","channels":2,"duration":"1.0"}]}"#;

    #[test]
    fn open_requires_loaded_metadata() {
        let media = fake_media_file();
        let mut reader = AudioReader::new(media.path()).unwrap();
        assert!(reader.open(BitDepth::S16).unwrap_err().is_usage_error());
    }

    #[test]
    fn blocks_flow_until_the_pipe_ends() {
        let media = fake_media_file();
        let (_probe_dir, prober) =
            stub_executable(&format!("cat <<'EOF'\n{MINIMAL_DOC}\nEOF"));
        // 128 stereo s16 samples, then a truncated tail of 3 more.
        let (_dec_dir, decoder) = stub_executable("head -c 524 /dev/zero");

        let mut reader = AudioReader::new(media.path())
            .unwrap()
            .with_executables(&decoder, &prober);

        let metadata = reader.load_metadata(false).unwrap();
        assert_eq!(metadata.sample_rate, 8000);
        assert_eq!(metadata.predicted_sample_count, 8000);

        reader.open(BitDepth::S16).unwrap();
        let mut block = reader.block_buffer(128, BitDepth::S16).unwrap();

        assert!(reader.next_block(&mut block).unwrap());
        assert_eq!(block.loaded_samples(), 128);

        assert!(reader.next_block(&mut block).unwrap());
        assert_eq!(block.loaded_samples(), 3);

        assert!(!reader.next_block(&mut block).unwrap());
        assert_eq!(reader.samples_read(), 131);

        reader.close().unwrap();
        reader.close().unwrap();
    }

    #[test]
    fn double_open_is_rejected_and_preserves_the_live_session() {
        let media = fake_media_file();
        let (_probe_dir, prober) =
            stub_executable(&format!("cat <<'EOF'\n{MINIMAL_DOC}\nEOF"));
        // 8 stereo s16 samples of 'B' bytes, then linger so the session
        // stays open.
        let (_dec_dir, decoder) = stub_executable(
            "printf 'BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB'; sleep 1",
        );

        let mut reader = AudioReader::new(media.path())
            .unwrap()
            .with_executables(&decoder, &prober);
        reader.load_metadata(false).unwrap();
        reader.open(BitDepth::S16).unwrap();
        assert!(reader.open(BitDepth::S16).unwrap_err().is_usage_error());

        let mut block = reader.block_buffer(8, BitDepth::S16).unwrap();
        assert!(reader.next_block(&mut block).unwrap());
        assert_eq!(block.loaded_samples(), 8);
        assert!(block.payload().iter().all(|&b| b == b'B'));
        assert_eq!(reader.samples_read(), 8);
        reader.close().unwrap();
    }

    #[test]
    fn metadata_loads_once() {
        let media = fake_media_file();
        let (_dir, prober) = stub_executable(&format!("cat <<'EOF'\n{MINIMAL_DOC}\nEOF"));
        let mut reader = AudioReader::new(media.path())
            .unwrap()
            .with_executables("ffmpeg", &prober);

        reader.load_metadata(false).unwrap();
        assert!(matches!(
            reader.load_metadata(false),
            Err(Error::AlreadyLoaded)
        ));
    }
}
