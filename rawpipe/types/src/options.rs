/*!
    Encoder option values and per-codec builders.

    [`EncoderOptions`] is the plain value object the pipeline hands to the
    transcoder: a container format, an encoder name, and the encoder's own
    argument tokens. The builders produce well-formed option sets for common
    encoders without the caller memorizing FFmpeg flag spellings.
*/

/**
    Encoding options passed to the transcoder when a writer opens.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncoderOptions {
    /// Container format name ("mp4", "webm", "mp3", ...).
    pub format: String,
    /// Encoder name ("libx264", "libvpx-vp9", "aac", ...).
    pub encoder: String,
    /// Argument tokens for the encoder.
    pub args: Vec<String>,
}

impl EncoderOptions {
    /**
        Create options with the given format and encoder and no extra
        arguments.
    */
    pub fn new(format: impl Into<String>, encoder: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            encoder: encoder.into(),
            args: Vec::new(),
        }
    }

    /**
        Default video options: H.264 in MP4 at a fast preset.
    */
    pub fn video_default() -> Self {
        Self::new("mp4", "libx264")
            .with_args(["-preset", "veryfast", "-crf", "23"])
    }

    /**
        Default audio options: MP3 at 192 kbit/s.
    */
    pub fn audio_default() -> Self {
        Self::new("mp3", "libmp3lame")
            .with_args(["-ar", "44100", "-ac", "2", "-b:a", "192k"])
    }

    /**
        Append a single argument token.
    */
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /**
        Append several argument tokens.
    */
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/**
    Encoder speed preset for libx264.

    Slower presets produce better compression but take longer to encode.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Preset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    #[default]
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl Preset {
    /**
        Get the FFmpeg preset string.
    */
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ultrafast => "ultrafast",
            Self::Superfast => "superfast",
            Self::Veryfast => "veryfast",
            Self::Faster => "faster",
            Self::Fast => "fast",
            Self::Medium => "medium",
            Self::Slow => "slow",
            Self::Slower => "slower",
            Self::Veryslow => "veryslow",
        }
    }
}

/**
    Content tuning for libx264.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tune {
    /// High quality movie content; lowers deblocking.
    Film,
    /// Cartoons; higher deblocking and more reference frames.
    Animation,
    /// Preserves grain structure in old, grainy film material.
    Grain,
    /// Slideshow-like content.
    StillImage,
    /// Faster decoding by disabling certain filters.
    FastDecode,
    /// Fast encoding and low-latency streaming.
    ZeroLatency,
}

impl Tune {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Film => "film",
            Self::Animation => "animation",
            Self::Grain => "grain",
            Self::StillImage => "stillimage",
            Self::FastDecode => "fastdecode",
            Self::ZeroLatency => "zerolatency",
        }
    }
}

/**
    Output profile limit for libx264. Affects compatibility with older
    players and compression efficiency.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Profile {
    /// Maximum compatibility on older devices.
    Baseline,
    /// Good compatibility even on older devices.
    Main,
    /// Supported by most modern devices.
    High,
    /// 10-bit depth support.
    High10,
    /// 4:2:2 chroma subsampling support.
    High422,
    /// 4:4:4 chroma subsampling support.
    High444,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Main => "main",
            Self::High => "high",
            Self::High10 => "high10",
            Self::High422 => "high422",
            Self::High444 => "high444",
        }
    }
}

/**
    Rate control mode for H.264 encoding.
*/
#[derive(Clone, Debug, PartialEq)]
pub enum RateControl {
    /// Constant quality (CRF). 0-51, lower is better, 0 is lossless.
    Crf(f32),
    /// Constant bitrate with a rate-control buffer.
    Cbr { bitrate: String, bufsize: String },
    /// Constrained quality: CRF raised when the bitrate cap is exceeded.
    Vbv {
        crf: f32,
        max_bitrate: String,
        bufsize: String,
    },
    /// Average bitrate.
    Abr(String),
}

impl Default for RateControl {
    fn default() -> Self {
        Self::Crf(22.0)
    }
}

/**
    Builder for libx264 encoder options.
*/
#[derive(Clone, Debug, Default)]
pub struct H264Encoder {
    preset: Preset,
    tune: Option<Tune>,
    profile: Option<Profile>,
    rate: RateControl,
    format: Option<String>,
}

impl H264Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /**
        Set the encoder speed preset.
    */
    pub fn with_preset(mut self, preset: Preset) -> Self {
        self.preset = preset;
        self
    }

    /**
        Tune for a content type.
    */
    pub fn with_tune(mut self, tune: Tune) -> Self {
        self.tune = Some(tune);
        self
    }

    /**
        Limit output to a specific profile.
    */
    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = Some(profile);
        self
    }

    /**
        Override the container format (default "mp4").
    */
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /**
        Constant quality encoding. CRF 0-51, 0 is lossless.
    */
    pub fn crf(mut self, crf: f32) -> Self {
        self.rate = RateControl::Crf(crf);
        self
    }

    /**
        Constant bitrate encoding with the given rate-control buffer size.
    */
    pub fn cbr(mut self, bitrate: impl Into<String>, bufsize: impl Into<String>) -> Self {
        self.rate = RateControl::Cbr {
            bitrate: bitrate.into(),
            bufsize: bufsize.into(),
        };
        self
    }

    /**
        Constrained quality encoding: CRF raised when the bitrate cap is
        exceeded.
    */
    pub fn vbv(
        mut self,
        crf: f32,
        max_bitrate: impl Into<String>,
        bufsize: impl Into<String>,
    ) -> Self {
        self.rate = RateControl::Vbv {
            crf,
            max_bitrate: max_bitrate.into(),
            bufsize: bufsize.into(),
        };
        self
    }

    /**
        Average bitrate encoding.
    */
    pub fn abr(mut self, bitrate: impl Into<String>) -> Self {
        self.rate = RateControl::Abr(bitrate.into());
        self
    }

    /**
        Build the encoder options.
    */
    pub fn build(self) -> EncoderOptions {
        let mut options = EncoderOptions::new(
            self.format.unwrap_or_else(|| "mp4".to_string()),
            "libx264",
        );

        options = match self.rate {
            RateControl::Crf(crf) => options.with_args(["-crf".to_string(), format!("{:.2}", crf)]),
            RateControl::Cbr { bitrate, bufsize } => options.with_args([
                "-x264-params".to_string(),
                "nal-hrd=cbr".to_string(),
                "-b:v".to_string(),
                bitrate.clone(),
                "-minrate".to_string(),
                bitrate.clone(),
                "-maxrate".to_string(),
                bitrate,
                "-bufsize".to_string(),
                bufsize,
            ]),
            RateControl::Vbv {
                crf,
                max_bitrate,
                bufsize,
            } => options.with_args([
                "-crf".to_string(),
                format!("{:.2}", crf),
                "-maxrate".to_string(),
                max_bitrate,
                "-bufsize".to_string(),
                bufsize,
            ]),
            RateControl::Abr(bitrate) => options.with_args(["-b:v".to_string(), bitrate]),
        };

        options = options.with_args(["-preset", self.preset.as_str()]);
        if let Some(tune) = self.tune {
            options = options.with_args(["-tune", tune.as_str()]);
        }
        if let Some(profile) = self.profile {
            options = options.with_args(["-profile:v", profile.as_str()]);
        }

        options
    }
}

/**
    Quality/speed deadline for libvpx-vp9.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Vp9Quality {
    /// Default, recommended for most applications.
    #[default]
    Good,
    /// Best compression efficiency, slowest.
    Best,
    /// Live/fast encoding.
    Realtime,
}

impl Vp9Quality {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Best => "best",
            Self::Realtime => "realtime",
        }
    }
}

/**
    Builder for libvpx-vp9 encoder options.
*/
#[derive(Clone, Debug)]
pub struct Vp9Encoder {
    quality: Vp9Quality,
    cpu_used: Option<i32>,
    row_multithreading: bool,
    rate_args: Vec<String>,
    format: Option<String>,
}

impl Default for Vp9Encoder {
    fn default() -> Self {
        Self {
            quality: Vp9Quality::default(),
            cpu_used: None,
            row_multithreading: false,
            // Constant quality at the libvpx-recommended midpoint.
            rate_args: vec!["-crf".into(), "31".into(), "-b:v".into(), "0".into()],
            format: None,
        }
    }
}

impl Vp9Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /**
        Set the quality/speed deadline.
    */
    pub fn with_quality(mut self, quality: Vp9Quality) -> Self {
        self.quality = quality;
        self
    }

    /**
        Quality/speed ratio modifier, -8 to 8.
    */
    pub fn with_cpu_used(mut self, cpu_used: i32) -> Self {
        self.cpu_used = Some(cpu_used);
        self
    }

    /**
        Enable row-based multithreading.
    */
    pub fn with_row_multithreading(mut self) -> Self {
        self.row_multithreading = true;
        self
    }

    /**
        Override the container format (default "webm").
    */
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /**
        Constant quality encoding. CRF 0-63, lower is better.
    */
    pub fn crf(mut self, crf: u8) -> Self {
        self.rate_args = vec!["-crf".into(), crf.to_string(), "-b:v".into(), "0".into()];
        self
    }

    /**
        Constrained quality: CRF raised when the bitrate cap is exceeded.
    */
    pub fn constrained(mut self, crf: u8, max_bitrate: impl Into<String>) -> Self {
        self.rate_args = vec!["-crf".into(), crf.to_string(), "-b:v".into(), max_bitrate.into()];
        self
    }

    /**
        Average bitrate encoding.
    */
    pub fn abr(mut self, bitrate: impl Into<String>) -> Self {
        self.rate_args = vec!["-b:v".into(), bitrate.into()];
        self
    }

    /**
        Constant bitrate encoding.
    */
    pub fn cbr(mut self, bitrate: impl Into<String>) -> Self {
        let bitrate = bitrate.into();
        self.rate_args = vec![
            "-minrate".into(),
            bitrate.clone(),
            "-maxrate".into(),
            bitrate.clone(),
            "-b:v".into(),
            bitrate,
        ];
        self
    }

    /**
        Lossless encoding.
    */
    pub fn lossless(mut self) -> Self {
        self.rate_args = vec!["-lossless".into(), "1".into()];
        self
    }

    /**
        Build the encoder options.
    */
    pub fn build(self) -> EncoderOptions {
        let mut options = EncoderOptions::new(
            self.format.unwrap_or_else(|| "webm".to_string()),
            "libvpx-vp9",
        )
        .with_args(self.rate_args)
        .with_args(["-deadline", self.quality.as_str()]);

        if let Some(cpu_used) = self.cpu_used {
            options = options.with_args(["-cpu-used".to_string(), cpu_used.to_string()]);
        }
        if self.row_multithreading {
            options = options.with_args(["-row-mt", "1"]);
        }

        options
    }
}

/**
    Builder for MP3 (libmp3lame) encoder options.
*/
#[derive(Clone, Debug)]
pub struct Mp3Encoder {
    rate_args: Vec<String>,
    format: Option<String>,
}

impl Default for Mp3Encoder {
    fn default() -> Self {
        Self {
            rate_args: vec!["-q:a".into(), "4".into()],
            format: None,
        }
    }
}

impl Mp3Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /**
        Constant bitrate, e.g. "192k" or "320k".
    */
    pub fn cbr(mut self, bitrate: impl Into<String>) -> Self {
        self.rate_args = vec!["-b:a".into(), bitrate.into()];
        self
    }

    /**
        Average bitrate, e.g. "192k" or "320k".
    */
    pub fn abr(mut self, bitrate: impl Into<String>) -> Self {
        self.rate_args = vec!["-b:a".into(), bitrate.into(), "-abr".into(), "1".into()];
        self
    }

    /**
        Variable bitrate at the given quality, 0 (best, about 240kbps)
        to 9 (worst). The default is 4.
    */
    pub fn vbr(mut self, quality: u8) -> Self {
        self.rate_args = vec!["-q:a".into(), quality.min(9).to_string()];
        self
    }

    /**
        Override the container format (default "mp3").
    */
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /**
        Build the encoder options.
    */
    pub fn build(self) -> EncoderOptions {
        EncoderOptions::new(
            self.format.unwrap_or_else(|| "mp3".to_string()),
            "libmp3lame",
        )
        .with_args(self.rate_args)
    }
}

/**
    Builder for AAC encoder options.
*/
#[derive(Clone, Debug)]
pub struct AacEncoder {
    bitrate: String,
    format: Option<String>,
}

impl Default for AacEncoder {
    fn default() -> Self {
        Self {
            bitrate: "128k".to_string(),
            format: None,
        }
    }
}

impl AacEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /**
        Target bitrate, e.g. "128k" or "320k".
    */
    pub fn with_bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.bitrate = bitrate.into();
        self
    }

    /**
        Override the container format (default "m4a").
    */
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /**
        Build the encoder options.
    */
    pub fn build(self) -> EncoderOptions {
        EncoderOptions::new(self.format.unwrap_or_else(|| "m4a".to_string()), "aac")
            .with_args(["-b:a".to_string(), self.bitrate])
    }
}
