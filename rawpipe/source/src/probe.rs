/*!
    The prober's JSON document and the metadata derived from it.

    The document model mirrors `-print_format json=c=1 -show_format
    -show_streams` output loosely: every field is optional, because the
    prober omits whatever does not apply to a given container or codec.
    Numeric values mostly arrive as strings and are parsed here, once, into
    [`VideoMetadata`] / [`AudioMetadata`]. The derived records never change
    after parsing.
*/

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use rawpipe_types::{Error, Result};

/**
    One stream entry of the probe document.
*/
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StreamRecord {
    pub codec_name: Option<String>,
    pub codec_long_name: Option<String>,
    pub codec_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub pix_fmt: Option<String>,
    pub sample_fmt: Option<String>,
    pub sample_rate: Option<String>,
    pub channels: Option<u32>,
    pub bits_per_sample: Option<u32>,
    pub bits_per_raw_sample: Option<String>,
    pub bit_rate: Option<String>,
    pub duration: Option<String>,
    pub avg_frame_rate: Option<String>,
    pub r_frame_rate: Option<String>,
    #[serde(default)]
    pub disposition: HashMap<String, i64>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/**
    The container entry of the probe document.
*/
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FormatRecord {
    pub filename: Option<String>,
    pub format_name: Option<String>,
    pub format_long_name: Option<String>,
    pub nb_streams: Option<u32>,
    pub start_time: Option<String>,
    pub duration: Option<String>,
    pub size: Option<String>,
    pub bit_rate: Option<String>,
    pub probe_score: Option<i64>,
}

/**
    Everything the prober reported about one file.
*/
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProbeDocument {
    #[serde(default)]
    pub streams: Vec<StreamRecord>,
    pub format: Option<FormatRecord>,
}

impl ProbeDocument {
    /**
        Parse the prober's stdout. Truncated or non-JSON output yields
        [`Error::ProbeOutput`].
    */
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::probe_output(e.to_string()))
    }

    /**
        First stream whose codec type is "video", in document order.
    */
    pub fn first_video_stream(&self) -> Option<&StreamRecord> {
        self.stream_of_type("video")
    }

    /**
        First stream whose codec type is "audio", in document order.
    */
    pub fn first_audio_stream(&self) -> Option<&StreamRecord> {
        self.stream_of_type("audio")
    }

    fn stream_of_type(&self, kind: &str) -> Option<&StreamRecord> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some(kind))
    }

    /// Stream duration if present, else container duration, else zero.
    fn duration_of(&self, stream: &StreamRecord) -> f64 {
        stream
            .duration
            .as_deref()
            .or_else(|| self.format.as_ref().and_then(|f| f.duration.as_deref()))
            .and_then(|d| d.parse().ok())
            .unwrap_or(0.0)
    }
}

/// "N/D" ratio or plain decimal, as the prober writes frame rates.
fn parse_ratio(value: &str) -> Option<f64> {
    match value.split_once('/') {
        Some((n, d)) => {
            let n: f64 = n.trim().parse().ok()?;
            let d: f64 = d.trim().parse().ok()?;
            if d == 0.0 { Some(0.0) } else { Some(n / d) }
        }
        None => value.trim().parse().ok(),
    }
}

fn parse_bit_rate(value: Option<&str>) -> u64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}

/// Bit depth of a video stream: the explicit raw-sample field when present,
/// else the component width embedded in the pixel format name ("yuv420p10le"
/// is 10-bit), else 8.
fn video_bit_depth(stream: &StreamRecord) -> u32 {
    if let Some(bits) = stream.bits_per_raw_sample.as_deref().and_then(|b| b.parse().ok()) {
        return bits;
    }
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"(\d+)[bl]e").unwrap());
    stream
        .pix_fmt
        .as_deref()
        .and_then(|fmt| pattern.captures(fmt))
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(8)
}

/// Bit depth of an audio stream: explicit fields first, then the widest
/// width named in the sample format ("s16p" is 16-bit), else zero.
fn audio_bit_depth(stream: &StreamRecord) -> u32 {
    if let Some(bits) = stream.bits_per_sample.filter(|&b| b > 0) {
        return bits;
    }
    if let Some(bits) = stream.bits_per_raw_sample.as_deref().and_then(|b| b.parse().ok()) {
        return bits;
    }
    let Some(fmt) = stream.sample_fmt.as_deref() else {
        return 0;
    };
    for (needle, bits) in [("64", 64), ("32", 32), ("24", 24), ("16", 16), ("8", 8)] {
        if fmt.contains(needle) {
            return bits;
        }
    }
    0
}

/// Run the prober over one file and parse what it prints.
pub(crate) fn run_prober(ffprobe: &str, path: &std::path::Path) -> Result<ProbeDocument> {
    use std::io::Read;
    use std::time::Duration;

    use rawpipe_host::{IoMode, ProcessHost};

    let args = [
        "-i".to_string(),
        path.to_string_lossy().into_owned(),
        "-v".to_string(),
        "quiet".to_string(),
        "-print_format".to_string(),
        "json=c=1".to_string(),
        "-show_format".to_string(),
        "-show_streams".to_string(),
    ];

    let mut handle = ProcessHost::spawn(ffprobe, args, IoMode::read())?;
    let mut output = String::new();
    if let Some(mut stdout) = handle.take_output() {
        stdout.read_to_string(&mut output).map_err(Error::Io)?;
    }
    handle.shutdown(Duration::from_secs(5))?;

    if output.trim().is_empty() {
        return Err(Error::probe_output("prober printed nothing"));
    }
    ProbeDocument::from_json(&output)
}

/**
    Fields of the authoritative video stream, parsed and derived once.
*/
#[derive(Clone, Debug, Default)]
pub struct VideoMetadata {
    pub codec: String,
    pub codec_long_name: String,
    pub width: u32,
    pub height: u32,
    pub pixel_format: String,
    pub bit_depth: u32,
    pub bit_rate: u64,
    /// Average frame rate in frames per second.
    pub avg_framerate: f64,
    /// Duration in seconds; zero when neither stream nor container knows.
    pub duration: f64,
    /// `round(avg_framerate * duration)`. A prediction, not a promise: the
    /// decode loop runs until the pipe ends.
    pub predicted_frame_count: u64,
    /// The full document the fields were derived from.
    pub document: ProbeDocument,
}

impl VideoMetadata {
    /**
        Derive video metadata from a probe document.

        Without a video stream, or with one whose fields cannot be
        interpreted, this is [`Error::MetadataParse`]; with
        `ignore_stream_errors` the derived fields stay at their zero
        defaults instead.
    */
    pub fn from_document(document: ProbeDocument, ignore_stream_errors: bool) -> Result<Self> {
        let derived = Self::derive(&document);
        match derived {
            Ok(mut metadata) => {
                metadata.document = document;
                Ok(metadata)
            }
            Err(e) if ignore_stream_errors => {
                log::warn!("ignoring stream metadata failure: {}", e);
                Ok(Self {
                    document,
                    ..Self::default()
                })
            }
            Err(e) => Err(e),
        }
    }

    /**
        Parse the prober's stdout and derive video metadata from it.
    */
    pub fn from_json(json: &str, ignore_stream_errors: bool) -> Result<Self> {
        Self::from_document(ProbeDocument::from_json(json)?, ignore_stream_errors)
    }

    fn derive(document: &ProbeDocument) -> Result<Self> {
        let stream = document
            .first_video_stream()
            .ok_or_else(|| Error::metadata("no video stream in probe document"))?;

        let width = stream
            .width
            .ok_or_else(|| Error::metadata("video stream has no width"))?;
        let height = stream
            .height
            .ok_or_else(|| Error::metadata("video stream has no height"))?;

        let avg_framerate = stream
            .avg_frame_rate
            .as_deref()
            .or(stream.r_frame_rate.as_deref())
            .and_then(parse_ratio)
            .ok_or_else(|| Error::metadata("video stream has no parseable frame rate"))?;

        let duration = document.duration_of(stream);

        Ok(Self {
            codec: stream.codec_name.clone().unwrap_or_default(),
            codec_long_name: stream.codec_long_name.clone().unwrap_or_default(),
            width,
            height,
            pixel_format: stream.pix_fmt.clone().unwrap_or_default(),
            bit_depth: video_bit_depth(stream),
            bit_rate: parse_bit_rate(stream.bit_rate.as_deref()),
            avg_framerate,
            duration,
            predicted_frame_count: (avg_framerate * duration).round() as u64,
            document: ProbeDocument::default(),
        })
    }
}

/**
    Fields of the authoritative audio stream, parsed and derived once.
*/
#[derive(Clone, Debug, Default)]
pub struct AudioMetadata {
    pub codec: String,
    pub codec_long_name: String,
    pub channels: u32,
    /// Sample rate in hertz.
    pub sample_rate: u32,
    pub sample_format: String,
    pub bit_depth: u32,
    pub bit_rate: u64,
    /// Duration in seconds; zero when neither stream nor container knows.
    pub duration: f64,
    /// `round(sample_rate * duration)` per channel.
    pub predicted_sample_count: u64,
    /// The full document the fields were derived from.
    pub document: ProbeDocument,
}

impl AudioMetadata {
    /**
        Derive audio metadata from a probe document. Same error contract as
        [`VideoMetadata::from_document`].
    */
    pub fn from_document(document: ProbeDocument, ignore_stream_errors: bool) -> Result<Self> {
        match Self::derive(&document) {
            Ok(mut metadata) => {
                metadata.document = document;
                Ok(metadata)
            }
            Err(e) if ignore_stream_errors => {
                log::warn!("ignoring stream metadata failure: {}", e);
                Ok(Self {
                    document,
                    ..Self::default()
                })
            }
            Err(e) => Err(e),
        }
    }

    /**
        Parse the prober's stdout and derive audio metadata from it.
    */
    pub fn from_json(json: &str, ignore_stream_errors: bool) -> Result<Self> {
        Self::from_document(ProbeDocument::from_json(json)?, ignore_stream_errors)
    }

    fn derive(document: &ProbeDocument) -> Result<Self> {
        let stream = document
            .first_audio_stream()
            .ok_or_else(|| Error::metadata("no audio stream in probe document"))?;

        let channels = stream
            .channels
            .ok_or_else(|| Error::metadata("audio stream has no channel count"))?;
        let sample_rate: u32 = stream
            .sample_rate
            .as_deref()
            .and_then(|r| r.parse().ok())
            .ok_or_else(|| Error::metadata("audio stream has no parseable sample rate"))?;

        let duration = document.duration_of(stream);

        Ok(Self {
            codec: stream.codec_name.clone().unwrap_or_default(),
            codec_long_name: stream.codec_long_name.clone().unwrap_or_default(),
            channels,
            sample_rate,
            sample_format: stream.sample_fmt.clone().unwrap_or_default(),
            bit_depth: audio_bit_depth(stream),
            bit_rate: parse_bit_rate(stream.bit_rate.as_deref()),
            duration,
            predicted_sample_count: (sample_rate as f64 * duration).round() as u64,
            document: ProbeDocument::default(),
        })
    }
}
