/*!
    Raw video encoding into a container.
*/

use std::io::Write;
use std::process::ChildStdin;
use std::time::Duration;

use rawpipe_host::{
    IoMode, ProcessHost, ProgressMonitor, ProgressSubscription, Session, SessionState,
    SpawnOptions,
};
use rawpipe_types::{EncoderOptions, Error, Result, VideoFrame};

use crate::output::{Output, Relay};

const CLOSE_GRACE: Duration = Duration::from_secs(10);

/**
    Feeds raw RGB24 frames into an encode subprocess.

    Frame geometry and rate are fixed for the life of the writer; the
    subprocess is told once, at open, and every written frame must match.
*/
#[derive(Debug)]
pub struct VideoWriter {
    destination: Output,
    width: u32,
    height: u32,
    framerate: f64,
    options: EncoderOptions,
    transcoder: String,
    spawn_options: SpawnOptions,
    session: Session,
    input: Option<ChildStdin>,
    relay: Option<Relay>,
    frames_written: u64,
}

impl VideoWriter {
    /**
        Create a writer producing `width` x `height` video at `framerate`
        frames per second, encoded per `options`.
    */
    pub fn new(
        destination: Output,
        width: u32,
        height: u32,
        framerate: f64,
        options: EncoderOptions,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::configuration(
                "video dimensions must be at least one pixel",
            ));
        }
        if !framerate.is_finite() || framerate <= 0.0 {
            return Err(Error::configuration("framerate must be positive"));
        }
        Ok(Self {
            destination,
            width,
            height,
            framerate,
            options,
            transcoder: "ffmpeg".to_string(),
            spawn_options: SpawnOptions::default(),
            session: Session::new(),
            input: None,
            relay: None,
            frames_written: 0,
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

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
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
            "rawvideo".to_string(),
            "-video_size".to_string(),
            format!("{}:{}", self.width, self.height),
            "-r".to_string(),
            self.framerate.to_string(),
            "-pixel_format".to_string(),
            "rgb24".to_string(),
            "-i".to_string(),
            "-".to_string(),
            "-c:v".to_string(),
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
        self.frames_written = 0;
        self.session.begin_write(handle)
    }

    /**
        Push one frame down the encode pipe.
    */
    pub fn write_frame(&mut self, frame: &VideoFrame) -> Result<()> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(Error::configuration(format!(
                "frame is {}x{}, writer expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        let input = self.open_input()?;
        input.write_all(frame.payload()).map_err(Error::Io)?;
        self.frames_written += 1;
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
        Frames accepted by the current encode session.
    */
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /**
        End the encode session: close the pipe so the encoder flushes, wait
        it out, then join the output relay. Closing a closed writer is a
        no-op.
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
        EncoderOptions::video_default()
    }

    #[test]
    fn invalid_geometry_is_rejected_before_any_spawn() {
        assert!(
            VideoWriter::new(Output::file("/tmp/x.mp4"), 0, 240, 30.0, options())
                .unwrap_err()
                .is_usage_error()
        );
        assert!(
            VideoWriter::new(Output::file("/tmp/x.mp4"), 320, 240, 0.0, options())
                .unwrap_err()
                .is_usage_error()
        );
        assert!(
            VideoWriter::new(Output::file("/tmp/x.mp4"), 320, 240, -1.0, options())
                .unwrap_err()
                .is_usage_error()
        );
    }

    #[test]
    fn write_before_open_is_rejected() {
        let mut writer =
            VideoWriter::new(Output::file("/tmp/x.mp4"), 4, 2, 30.0, options()).unwrap();
        let frame = VideoFrame::new(4, 2).unwrap();
        assert!(writer.write_frame(&frame).unwrap_err().is_usage_error());
    }

    #[test]
    fn frames_flow_through_a_stub_encoder() {
        // Stub swallows its stdin like an encoder would.
        let (_dir, transcoder) = stub_transcoder("cat >/dev/null");
        let out = tempfile::tempdir().unwrap();

        let mut writer = VideoWriter::new(
            Output::file(out.path().join("out.mp4")),
            4,
            2,
            30.0,
            options(),
        )
        .unwrap()
        .with_executable(&transcoder);

        writer.open_write().unwrap();
        assert!(writer.open_write().unwrap_err().is_usage_error());

        let frame = VideoFrame::new(4, 2).unwrap();
        writer.write_frame(&frame).unwrap();
        writer.write_frame(&frame).unwrap();
        assert_eq!(writer.frames_written(), 2);

        writer.close().unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn mismatched_frame_geometry_is_rejected() {
        let (_dir, transcoder) = stub_transcoder("cat >/dev/null");
        let out = tempfile::tempdir().unwrap();

        let mut writer = VideoWriter::new(
            Output::file(out.path().join("out.mp4")),
            4,
            2,
            30.0,
            options(),
        )
        .unwrap()
        .with_executable(&transcoder);
        writer.open_write().unwrap();

        let wrong = VideoFrame::new(8, 8).unwrap();
        assert!(writer.write_frame(&wrong).unwrap_err().is_usage_error());
        writer.close().unwrap();
    }

    #[test]
    fn stream_destination_receives_the_container() {
        // Stub ignores stdin and emits a recognizable container stand-in.
        let (_dir, transcoder) = stub_transcoder("cat >/dev/null; printf 'CONTAINER'");
        let dir = tempfile::tempdir().unwrap();
        let sink_path = dir.path().join("streamed.bin");
        let sink = std::fs::File::create(&sink_path).unwrap();

        let mut writer =
            VideoWriter::new(Output::stream(sink), 4, 2, 30.0, options())
                .unwrap()
                .with_executable(&transcoder);
        writer.open_write().unwrap();

        let frame = VideoFrame::new(4, 2).unwrap();
        writer.write_frame(&frame).unwrap();
        writer.close().unwrap();

        assert_eq!(std::fs::read(&sink_path).unwrap(), b"CONTAINER");
    }
}
