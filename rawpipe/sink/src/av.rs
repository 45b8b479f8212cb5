/*!
    Combined audio and video encoding into one container.

    A single-input encoder reads one pipe; muxing two raw streams needs a
    second way in. The writer binds a loopback listener before spawning and
    hands the subprocess a `tcp://127.0.0.1:<port>` audio input next to the
    stdin video input. Open only returns once the subprocess has actually
    connected, so both channels are writable immediately and a subprocess
    that never dials in surfaces as a timeout instead of a hang.
*/

use std::io::Write;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::process::ChildStdin;
use std::thread;
use std::time::{Duration, Instant};

use rawpipe_host::{IoMode, ProcessHost, Session, SessionState, SpawnOptions};
use rawpipe_types::{AudioBlock, BitDepth, EncoderOptions, Error, Result, VideoFrame};

use crate::output::{Output, Relay};

const CLOSE_GRACE: Duration = Duration::from_secs(10);
const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

/**
    Feeds raw video frames and audio samples into one encode subprocess,
    which interleaves them by timestamp into a single container.

    There is no ordering requirement across the two channels; write each
    at whatever pace produces it.
*/
#[derive(Debug)]
pub struct AudioVideoWriter {
    destination: Output,
    width: u32,
    height: u32,
    framerate: f64,
    video_options: EncoderOptions,
    channels: u32,
    sample_rate: u32,
    depth: BitDepth,
    audio_options: EncoderOptions,
    accept_timeout: Duration,
    thread_queue_size: u32,
    transcoder: String,
    spawn_options: SpawnOptions,
    session: Session,
    video_input: Option<ChildStdin>,
    audio_channel: Option<TcpStream>,
    relay: Option<Relay>,
}

impl AudioVideoWriter {
    /**
        Create a combined writer. Video geometry and rate, audio layout and
        wire depth are all fixed for the life of the writer.
    */
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        destination: Output,
        width: u32,
        height: u32,
        framerate: f64,
        video_options: EncoderOptions,
        channels: u32,
        sample_rate: u32,
        depth: BitDepth,
        audio_options: EncoderOptions,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::configuration(
                "video dimensions must be at least one pixel",
            ));
        }
        if !framerate.is_finite() || framerate <= 0.0 {
            return Err(Error::configuration("framerate must be positive"));
        }
        if channels == 0 {
            return Err(Error::configuration("channel count must be bigger than 0"));
        }
        if sample_rate == 0 {
            return Err(Error::configuration("sample rate must be bigger than 0"));
        }
        Ok(Self {
            destination,
            width,
            height,
            framerate,
            video_options,
            channels,
            sample_rate,
            depth,
            audio_options,
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
            thread_queue_size: 512,
            transcoder: "ffmpeg".to_string(),
            spawn_options: SpawnOptions::default(),
            session: Session::new(),
            video_input: None,
            audio_channel: None,
            relay: None,
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

    /**
        How long open waits for the subprocess to dial the audio channel.
    */
    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }

    /**
        Queue depth, in packets, the subprocess buffers per input while the
        other one stalls.
    */
    pub fn with_thread_queue_size(mut self, packets: u32) -> Self {
        self.thread_queue_size = packets;
        self
    }

    /**
        Start the encode session: bind the loopback listener, spawn, then
        wait for the subprocess to connect its audio input.
    */
    pub fn open_write(&mut self) -> Result<()> {
        if self.session.is_open() {
            return Err(Error::invalid_state("writer is already open"));
        }
        self.destination.remove_stale_file()?;

        // Bind before spawn, so the port in the argument vector is live
        // from the subprocess's first instant.
        let listener = TcpListener::bind(("127.0.0.1", 0)).map_err(Error::Io)?;
        let port = listener.local_addr().map_err(Error::Io)?.port();

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
            "-f".to_string(),
            self.depth.pcm_format().to_string(),
            "-channels".to_string(),
            self.channels.to_string(),
            "-sample_rate".to_string(),
            self.sample_rate.to_string(),
            "-thread_queue_size".to_string(),
            self.thread_queue_size.to_string(),
            "-i".to_string(),
            format!("tcp://127.0.0.1:{port}"),
            "-map".to_string(),
            "0".to_string(),
            "-map".to_string(),
            "1".to_string(),
            "-c:v".to_string(),
            self.video_options.encoder.clone(),
        ]);
        args.extend(self.video_options.args.iter().cloned());
        args.push("-c:a".to_string());
        args.push(self.audio_options.encoder.clone());
        args.extend(self.audio_options.args.iter().cloned());
        args.extend([
            "-f".to_string(),
            self.video_options.format.clone(),
            self.destination.as_argument(),
        ]);

        let io = if self.destination.is_stream() {
            IoMode::duplex()
        } else {
            IoMode::write()
        };
        let mut handle = ProcessHost::spawn(&self.transcoder, args, io)?;

        let audio_channel = match Self::accept_with_deadline(&listener, self.accept_timeout) {
            Ok(channel) => channel,
            Err(e) => {
                handle.terminate();
                return Err(e);
            }
        };

        self.video_input = handle.take_input();
        self.relay = self.destination.start_relay(handle.take_output());
        self.audio_channel = Some(audio_channel);
        self.session.begin_write(handle)
    }

    fn accept_with_deadline(listener: &TcpListener, timeout: Duration) -> Result<TcpStream> {
        listener.set_nonblocking(true).map_err(Error::Io)?;
        let deadline = Instant::now() + timeout;
        loop {
            match listener.accept() {
                Ok((channel, _)) => {
                    channel.set_nonblocking(false).map_err(Error::Io)?;
                    return Ok(channel);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(Error::ChannelTimeout(timeout));
                    }
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    /**
        Push one frame down the video channel.
    */
    pub fn write_video_frame(&mut self, frame: &VideoFrame) -> Result<()> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(Error::configuration(format!(
                "frame is {}x{}, writer expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        self.ensure_open()?;
        let input = self
            .video_input
            .as_mut()
            .ok_or_else(|| Error::invalid_state("video pipe was taken"))?;
        input.write_all(frame.payload()).map_err(Error::Io)
    }

    /**
        Push one block of samples down the audio channel.
    */
    pub fn write_audio_block(&mut self, block: &AudioBlock) -> Result<()> {
        if block.channels() != self.channels || block.depth() != self.depth {
            return Err(Error::configuration(format!(
                "block is {} channels at {} bits, writer expects {} at {}",
                block.channels(),
                block.depth().bits(),
                self.channels,
                self.depth.bits()
            )));
        }
        self.ensure_open()?;
        let channel = self
            .audio_channel
            .as_mut()
            .ok_or_else(|| Error::invalid_state("audio channel was taken"))?;
        channel.write_all(block.payload()).map_err(Error::Io)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.session.state() != SessionState::Writing {
            return Err(Error::invalid_state("writer is not open"));
        }
        Ok(())
    }

    /**
        End the encode session: close both channels so the subprocess sees
        end-of-input on each, wait it out, then join the output relay.
        Closing a closed writer is a no-op.
    */
    pub fn close(&mut self) -> Result<()> {
        self.video_input = None;
        if let Some(channel) = self.audio_channel.take() {
            let _ = channel.shutdown(Shutdown::Both);
        }
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
    use crate::test_support::{stub_bash_transcoder, stub_transcoder};

    fn writer(destination: Output) -> Result<AudioVideoWriter> {
        AudioVideoWriter::new(
            destination,
            4,
            2,
            30.0,
            EncoderOptions::video_default(),
            2,
            44100,
            BitDepth::S16,
            EncoderOptions::audio_default(),
        )
    }

    // Connects to the advertised port, then swallows both channels until
    // they close.
    const DIALING_STUB: &str = r#"
port=""
for a in "$@"; do
  case "$a" in
    tcp://127.0.0.1:*) port="${a##*:}" ;;
  esac
done
cat >/dev/null &
exec 3<>"/dev/tcp/127.0.0.1/$port"
cat <&3 >/dev/null
wait
"#;

    #[test]
    fn invalid_layout_is_rejected_before_any_spawn() {
        let bad = AudioVideoWriter::new(
            Output::file("/tmp/x.mp4"),
            4,
            2,
            30.0,
            EncoderOptions::video_default(),
            0,
            44100,
            BitDepth::S16,
            EncoderOptions::audio_default(),
        );
        assert!(bad.unwrap_err().is_usage_error());
    }

    #[test]
    fn open_times_out_when_the_channel_is_never_dialed() {
        let (_dir, transcoder) = stub_transcoder("sleep 5");
        let out = tempfile::tempdir().unwrap();

        let mut writer = writer(Output::file(out.path().join("out.mp4")))
            .unwrap()
            .with_executable(&transcoder)
            .with_accept_timeout(Duration::from_millis(200));

        let err = writer.open_write().unwrap_err();
        assert!(matches!(err, Error::ChannelTimeout(_)));

        // The failed open leaves the writer closed and reusable.
        assert!(writer.write_video_frame(&VideoFrame::new(4, 2).unwrap())
            .unwrap_err()
            .is_usage_error());
        writer.close().unwrap();
    }

    #[test]
    fn both_channels_accept_data_once_open_returns() {
        let (_dir, transcoder) = stub_bash_transcoder(DIALING_STUB);
        let out = tempfile::tempdir().unwrap();

        let mut writer = writer(Output::file(out.path().join("out.mp4")))
            .unwrap()
            .with_executable(&transcoder);
        writer.open_write().unwrap();

        let frame = VideoFrame::new(4, 2).unwrap();
        let block = AudioBlock::new(64, 2, BitDepth::S16).unwrap();

        // Interleave in an arbitrary order; the channels are independent.
        writer.write_audio_block(&block).unwrap();
        writer.write_video_frame(&frame).unwrap();
        writer.write_video_frame(&frame).unwrap();
        writer.write_audio_block(&block).unwrap();

        writer.close().unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn mismatched_units_are_rejected() {
        let (_dir, transcoder) = stub_bash_transcoder(DIALING_STUB);
        let out = tempfile::tempdir().unwrap();

        let mut writer = writer(Output::file(out.path().join("out.mp4")))
            .unwrap()
            .with_executable(&transcoder);
        writer.open_write().unwrap();

        let wrong_frame = VideoFrame::new(8, 8).unwrap();
        assert!(writer.write_video_frame(&wrong_frame).unwrap_err().is_usage_error());

        let wrong_block = AudioBlock::new(64, 1, BitDepth::S16).unwrap();
        assert!(writer.write_audio_block(&wrong_block).unwrap_err().is_usage_error());

        writer.close().unwrap();
    }
}
