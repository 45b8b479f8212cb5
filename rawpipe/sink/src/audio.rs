/*!
    Raw audio encoding into a container.
*/

use std::io::Write;
use std::process::ChildStdin;
use std::time::Duration;

use rawpipe_host::{
    IoMode, ProcessHost, ProgressMonitor, ProgressSubscription, Session, SessionState,
    SpawnOptions,
};
use rawpipe_types::{AudioBlock, BitDepth, EncoderOptions, Error, Result};

use crate::output::{Output, Relay};

const CLOSE_GRACE: Duration = Duration::from_secs(10);

/**
    Feeds raw interleaved PCM samples into an encode subprocess.
*/
#[derive(Debug)]
pub struct AudioWriter {
    destination: Output,
    channels: u32,
    sample_rate: u32,
    depth: BitDepth,
    options: EncoderOptions,
    transcoder: String,
    spawn_options: SpawnOptions,
    session: Session,
    input: Option<ChildStdin>,
    relay: Option<Relay>,
    samples_written: u64,
}

impl AudioWriter {
    /**
        Create a writer taking `channels`-channel samples at `sample_rate`
        hertz and `depth` on the wire, encoded per `options`.
    */
    pub fn new(
        destination: Output,
        channels: u32,
        sample_rate: u32,
        depth: BitDepth,
        options: EncoderOptions,
    ) -> Result<Self> {
        if channels == 0 {
            return Err(Error::configuration("channel count must be bigger than 0"));
        }
        if sample_rate == 0 {
            return Err(Error::configuration("sample rate must be bigger than 0"));
        }
        Ok(Self {
            destination,
            channels,
            sample_rate,
            depth,
            options,
            transcoder: "ffmpeg".to_string(),
            spawn_options: SpawnOptions::default(),
            session: Session::new(),
            input: None,
            relay: None,
            samples_written: 0,
        })
    }

    /**
        Use a custom transcoder executable instead of `ffmpeg` from PATH.
    */
    pub fn with_executable(mut self, transcoder: impl Into<String>) -> Self {
        self.transcoder = transcoder.into();
        self
    }

    pub fn with_spawn_options(mut self, options: SpawnOptions) -> Self {
        self.spawn_options = options;
        self
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn depth(&self) -> BitDepth {
        self.depth
    }

    /**
        Start the encode session. A stale file at a file destination is
        replaced.
    */
    pub fn open_write(&mut self) -> Result<()> {
        if self.session.is_open() {
            return Err(Error::invalid_state("writer is already open"));
        }
        self.destination.remove_stale_file()?;

        let mut args: Vec<String> = self.spawn_options.verbosity_args().into();
        args.extend([
            "-f".to_string(),
            self.depth.pcm_format().to_string(),
            "-channels".to_string(),
            self.channels.to_string(),
            "-sample_rate".to_string(),
            self.sample_rate.to_string(),
            "-i".to_string(),
            "-".to_string(),
            "-c:a".to_string(),
            self.options.encoder.clone(),
        ]);
        args.extend(self.options.args.iter().cloned());
        args.extend([
            "-f".to_string(),
            self.options.format.clone(),
            self.destination.as_argument(),
        ]);

        let io = if self.destination.is_stream() {
            IoMode::duplex()
        } else {
            IoMode::write()
        };
        let mut handle = ProcessHost::spawn(&self.transcoder, args, io)?;
        self.input = handle.take_input();
        self.relay = self.destination.start_relay(handle.take_output());
        self.samples_written = 0;
        self.session.begin_write(handle)
    }

    /**
        Push one block of samples down the encode pipe. Only the loaded
        part of a truncated block is written.
    */
    pub fn write_block(&mut self, block: &AudioBlock) -> Result<()> {
        if block.channels() != self.channels || block.depth() != self.depth {
            return Err(Error::configuration(format!(
                "block is {} channels at {} bits, writer expects {} at {}",
                block.channels(),
                block.depth().bits(),
                self.channels,
                self.depth.bits()
            )));
        }
        let input = self.open_input()?;
        input.write_all(block.payload()).map_err(Error::Io)?;
        self.samples_written += u64::from(block.loaded_samples());
        Ok(())
    }

    /**
        The raw input pipe of the open session, for bulk copies.
    */
    pub fn raw_input(&mut self) -> Result<&mut ChildStdin> {
        self.open_input()
    }

    fn open_input(&mut self) -> Result<&mut ChildStdin> {
        if self.session.state() != SessionState::Writing {
            return Err(Error::invalid_state("writer is not open"));
        }
        self.input
            .as_mut()
            .ok_or_else(|| Error::invalid_state("encode pipe was taken"))
    }

    /**
        Attach a progress parser to the open session's diagnostics, against
        `total_secs` of media.
    */
    pub fn attach_progress(&mut self, total_secs: f64) -> Result<ProgressSubscription> {
        ProgressMonitor::attach(self.session.handle_mut()?, total_secs)
    }

    /**
        Samples accepted by the current encode session, per channel.
    */
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /**
        End the encode session. Closing a closed writer is a no-op.
    */
    pub fn close(&mut self) -> Result<()> {
        self.input = None;
        self.session.close(CLOSE_GRACE)?;
        if let Some(relay) = self.relay.take() {
            relay.join()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::stub_transcoder;

    fn options() -> EncoderOptions {
        EncoderOptions::audio_default()
    }

    #[test]
    fn invalid_layout_is_rejected_before_any_spawn() {
        assert!(
            AudioWriter::new(Output::file("/tmp/x.mp3"), 0, 44100, BitDepth::S16, options())
                .unwrap_err()
                .is_usage_error()
        );
        assert!(
            AudioWriter::new(Output::file("/tmp/x.mp3"), 2, 0, BitDepth::S16, options())
                .unwrap_err()
                .is_usage_error()
        );
    }

    #[test]
    fn blocks_flow_through_a_stub_encoder() {
        let (_dir, transcoder) = stub_transcoder("cat >/dev/null");
        let out = tempfile::tempdir().unwrap();

        let mut writer = AudioWriter::new(
            Output::file(out.path().join("out.mp3")),
            2,
            44100,
            BitDepth::S16,
            options(),
        )
        .unwrap()
        .with_executable(&transcoder);

        writer.open_write().unwrap();
        let block = AudioBlock::new(64, 2, BitDepth::S16).unwrap();
        writer.write_block(&block).unwrap();
        assert_eq!(writer.samples_written(), 64);

        writer.close().unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn mismatched_block_layout_is_rejected() {
        let (_dir, transcoder) = stub_transcoder("cat >/dev/null");
        let out = tempfile::tempdir().unwrap();

        let mut writer = AudioWriter::new(
            Output::file(out.path().join("out.mp3")),
            2,
            44100,
            BitDepth::S16,
            options(),
        )
        .unwrap()
        .with_executable(&transcoder);
        writer.open_write().unwrap();

        let mono = AudioBlock::new(64, 1, BitDepth::S16).unwrap();
        assert!(writer.write_block(&mono).unwrap_err().is_usage_error());

        let wide = AudioBlock::new(64, 2, BitDepth::S32).unwrap();
        assert!(writer.write_block(&wide).unwrap_err().is_usage_error());
        writer.close().unwrap();
    }
}
