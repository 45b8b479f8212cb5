/*!
    Error types shared across the rawpipe crates.

    Two families are distinguished: usage errors (bad configuration values,
    lifecycle misuse) that indicate a bug in the calling code, and environment
    errors (spawn failures, broken pipes, malformed probe output) that a
    caller may reasonably retry or report.
*/

use std::fmt;
use std::io;
use std::time::Duration;

/// Convenience alias used throughout the rawpipe crates.
pub type Result<T> = std::result::Result<T, Error>;

/**
    Error type for all rawpipe operations.
*/
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Invalid configuration value, rejected before any process is spawned.
    Configuration(String),
    /// A session method was called from the wrong lifecycle state.
    InvalidSessionState(String),
    /// Metadata was already loaded for this reader.
    AlreadyLoaded,
    /// The external executable could not be started.
    SpawnFailure {
        /// Executable name or path that failed to start.
        executable: String,
        /// Underlying OS error.
        source: io::Error,
    },
    /// The prober produced output that is not a well-formed document.
    ProbeOutput(String),
    /// The probe document parsed, but the authoritative stream's fields
    /// could not be interpreted.
    MetadataParse(String),
    /// The subprocess never connected to the loopback side channel.
    ChannelTimeout(Duration),
    /// A pipe or socket failed mid-transfer.
    Io(io::Error),
}

impl Error {
    /**
        Create a configuration error.
    */
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /**
        Create a session-state error.
    */
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidSessionState(msg.into())
    }

    /**
        Create a spawn-failure error for the given executable.
    */
    pub fn spawn(executable: impl Into<String>, source: io::Error) -> Self {
        Self::SpawnFailure {
            executable: executable.into(),
            source,
        }
    }

    /**
        Create a probe-output error.
    */
    pub fn probe_output(msg: impl Into<String>) -> Self {
        Self::ProbeOutput(msg.into())
    }

    /**
        Create a metadata-parse error.
    */
    pub fn metadata(msg: impl Into<String>) -> Self {
        Self::MetadataParse(msg.into())
    }

    /**
        Returns true for the usage-error family: configuration and lifecycle
        errors that indicate a bug in the calling code rather than a failure
        of the environment.
    */
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::InvalidSessionState(_) | Self::AlreadyLoaded
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "invalid configuration: {}", msg),
            Self::InvalidSessionState(msg) => write!(f, "invalid session state: {}", msg),
            Self::AlreadyLoaded => write!(f, "metadata is already loaded"),
            Self::SpawnFailure { executable, source } => {
                write!(f, "failed to start '{}': {}", executable, source)
            }
            Self::ProbeOutput(msg) => write!(f, "unparseable probe output: {}", msg),
            Self::MetadataParse(msg) => write!(f, "failed to parse stream metadata: {}", msg),
            Self::ChannelTimeout(timeout) => {
                write!(
                    f,
                    "subprocess did not connect to the side channel within {:?}",
                    timeout
                )
            }
            Self::Io(e) => write!(f, "i/o failure: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SpawnFailure { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_errors_are_classified() {
        assert!(Error::configuration("bad width").is_usage_error());
        assert!(Error::invalid_state("already open").is_usage_error());
        assert!(Error::AlreadyLoaded.is_usage_error());
    }

    #[test]
    fn environment_errors_are_not_usage_errors() {
        let spawn = Error::spawn("ffmpeg", io::Error::from(io::ErrorKind::NotFound));
        assert!(!spawn.is_usage_error());
        assert!(!Error::probe_output("truncated").is_usage_error());
        assert!(!Error::from(io::Error::from(io::ErrorKind::BrokenPipe)).is_usage_error());
    }

    #[test]
    fn display_names_the_executable() {
        let err = Error::spawn("ffprobe", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.to_string().contains("ffprobe"));
    }
}
