use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::Context;
use clap::Parser;

use rawpipe_sink::{AudioWriter, Output, VideoWriter};
use rawpipe_source::{AudioReader, VideoReader};
use rawpipe_types::{BitDepth, EncoderOptions, Error};

#[derive(Parser, Debug)]
#[command(name = "rawconvert")]
#[command(about = "Re-encode a media file through a raw decode/encode pipe pair")]
struct Args {
    /// Source media file
    input: PathBuf,

    /// Destination file; the extension picks the container
    output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    // Video first; a file with no video stream falls back to audio-only.
    match convert_video(&args.input, &args.output) {
        Ok(()) => Ok(()),
        Err(e) if is_missing_stream(&e) => {
            log::info!("{} has no video stream, converting audio", args.input.display());
            convert_audio(&args.input, &args.output)
        }
        Err(e) => Err(e),
    }
}

fn is_missing_stream(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<Error>(),
        Some(Error::MetadataParse(_))
    )
}

fn convert_video(input: &Path, output: &Path) -> anyhow::Result<()> {
    let mut reader = VideoReader::new(input)
        .with_context(|| format!("opening {}", input.display()))?;
    let metadata = reader
        .load_metadata(false)
        .with_context(|| format!("probing {}", input.display()))?
        .clone();

    log::debug!(
        "{}: {} {}x{} @ {:.3} fps, {:.2}s",
        input.display(),
        metadata.codec,
        metadata.width,
        metadata.height,
        metadata.avg_framerate,
        metadata.duration
    );

    let mut writer = VideoWriter::new(
        Output::file(output),
        metadata.width,
        metadata.height,
        metadata.avg_framerate,
        video_options_for(output),
    )
    .with_context(|| format!("configuring encoder for {}", output.display()))?;

    writer
        .open_write()
        .with_context(|| format!("opening encoder for {}", output.display()))?;
    reader
        .open()
        .with_context(|| format!("opening decoder for {}", input.display()))?;

    let progress = start_progress(&mut writer, metadata.duration);

    let copied = {
        let dest = writer.raw_input()?;
        reader
            .copy_to(dest)
            .with_context(|| format!("copying {} into {}", input.display(), output.display()))?
    };

    reader.close()?;
    writer.close()?;
    if let Some(printer) = progress {
        let _ = printer.join();
    }

    log::info!("moved {} raw bytes into {}", copied, output.display());
    Ok(())
}

fn convert_audio(input: &Path, output: &Path) -> anyhow::Result<()> {
    let mut reader = AudioReader::new(input)
        .with_context(|| format!("opening {}", input.display()))?;
    let metadata = reader
        .load_metadata(false)
        .with_context(|| format!("probing {}", input.display()))?
        .clone();

    let depth = BitDepth::from_bits(metadata.bit_depth).unwrap_or_default();
    let mut writer = AudioWriter::new(
        Output::file(output),
        metadata.channels,
        metadata.sample_rate,
        depth,
        audio_options_for(output),
    )
    .with_context(|| format!("configuring encoder for {}", output.display()))?;

    writer
        .open_write()
        .with_context(|| format!("opening encoder for {}", output.display()))?;
    reader
        .open(depth)
        .with_context(|| format!("opening decoder for {}", input.display()))?;

    let progress = start_progress_audio(&mut writer, metadata.duration);

    let copied = {
        let dest = writer.raw_input()?;
        reader
            .copy_to(dest)
            .with_context(|| format!("copying {} into {}", input.display(), output.display()))?
    };

    reader.close()?;
    writer.close()?;
    if let Some(printer) = progress {
        let _ = printer.join();
    }

    log::info!("moved {} raw bytes into {}", copied, output.display());
    Ok(())
}

fn start_progress(writer: &mut VideoWriter, total_secs: f64) -> Option<thread::JoinHandle<()>> {
    if total_secs <= 0.0 {
        return None;
    }
    let subscription = writer.attach_progress(total_secs).ok()?;
    Some(thread::spawn(move || {
        for percent in subscription.updates() {
            print!("\rconverting: {percent:5.1}%");
            let _ = io::stdout().flush();
        }
        println!();
    }))
}

fn start_progress_audio(
    writer: &mut AudioWriter,
    total_secs: f64,
) -> Option<thread::JoinHandle<()>> {
    if total_secs <= 0.0 {
        return None;
    }
    let subscription = writer.attach_progress(total_secs).ok()?;
    Some(thread::spawn(move || {
        for percent in subscription.updates() {
            print!("\rconverting: {percent:5.1}%");
            let _ = io::stdout().flush();
        }
        println!();
    }))
}

/// Container and encoder from the output extension, H.264/MP4 otherwise.
fn video_options_for(output: &Path) -> EncoderOptions {
    match extension(output).as_deref() {
        Some("webm") => EncoderOptions::new("webm", "libvpx-vp9")
            .with_args(["-crf", "31", "-b:v", "0"]),
        Some("mkv") => EncoderOptions::new("matroska", "libx264")
            .with_args(["-preset", "veryfast", "-crf", "23"]),
        _ => EncoderOptions::video_default(),
    }
}

/// Container and encoder from the output extension, MP3 otherwise.
fn audio_options_for(output: &Path) -> EncoderOptions {
    match extension(output).as_deref() {
        Some("m4a") | Some("aac") => {
            EncoderOptions::new("m4a", "aac").with_args(["-b:a", "128k"])
        }
        _ => EncoderOptions::audio_default(),
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}
