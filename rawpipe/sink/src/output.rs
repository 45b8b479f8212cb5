/*!
    Where encoded bytes land.

    File destinations are handed to the subprocess as its final argument.
    Stream destinations make the subprocess write the container to its
    stdout instead, and a relay thread copies that pipe into the caller's
    stream until the subprocess closes it. The relay is joined on close, so
    no bytes are still in flight once a session reports closed.
*/

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ChildStdout;
use std::thread::{self, JoinHandle};

use rawpipe_types::{Error, Result};

/**
    Destination of an encode session.
*/
pub enum Output {
    /// Write the container to a file at this path.
    File(PathBuf),
    /// Write the container into a caller-supplied stream.
    Stream(Box<dyn Write + Send>),
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl Output {
    /**
        A file destination.
    */
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /**
        A caller-supplied stream destination.
    */
    pub fn stream(dest: impl Write + Send + 'static) -> Self {
        Self::Stream(Box::new(dest))
    }

    /// The subprocess argument naming this destination.
    pub(crate) fn as_argument(&self) -> String {
        match self {
            Self::File(path) => path.to_string_lossy().into_owned(),
            Self::Stream(_) => "-".to_string(),
        }
    }

    pub(crate) fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// A stale file at a file destination is replaced, never appended to.
    pub(crate) fn remove_stale_file(&self) -> Result<()> {
        if let Self::File(path) = self {
            match fs::remove_file(path) {
                Ok(()) => log::debug!("replacing existing output {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }

    /// For stream destinations, start relaying the subprocess stdout into
    /// the destination. Consumes the boxed stream.
    pub(crate) fn start_relay(&mut self, source: Option<ChildStdout>) -> Option<Relay> {
        let Self::Stream(dest) = self else {
            return None;
        };
        let source = source?;
        // Swap in a sink so the Output stays usable as a marker.
        let dest = std::mem::replace(dest, Box::new(io::sink()));
        Some(Relay::spawn(source, dest))
    }
}

/**
    Thread copying the subprocess stdout into a caller stream.
*/
#[derive(Debug)]
pub(crate) struct Relay {
    worker: Option<JoinHandle<io::Result<u64>>>,
}

impl Relay {
    fn spawn(mut source: ChildStdout, mut dest: Box<dyn Write + Send>) -> Self {
        let worker = thread::spawn(move || {
            let copied = io::copy(&mut source, &mut dest)?;
            dest.flush()?;
            Ok(copied)
        });
        Self {
            worker: Some(worker),
        }
    }

    /// Wait for the subprocess to close its stdout and the last byte to
    /// reach the destination.
    pub(crate) fn join(mut self) -> Result<u64> {
        let Some(worker) = self.worker.take() else {
            return Ok(0);
        };
        match worker.join() {
            Ok(result) => result.map_err(Error::Io),
            Err(_) => Err(Error::Io(io::Error::other("output relay panicked"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_destination_argument_is_the_path() {
        let output = Output::file("/tmp/out.mp4");
        assert_eq!(output.as_argument(), "/tmp/out.mp4");
        assert!(!output.is_stream());
    }

    #[test]
    fn stream_destination_argument_is_stdout() {
        let output = Output::stream(Vec::new());
        assert_eq!(output.as_argument(), "-");
        assert!(output.is_stream());
    }

    #[test]
    fn removing_a_missing_stale_file_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never-created.mp4");
        Output::file(&path).remove_stale_file().unwrap();
    }

    #[test]
    fn stale_files_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.mp4");
        std::fs::write(&path, b"old bytes").unwrap();

        Output::file(&path).remove_stale_file().unwrap();
        assert!(!path.exists());
    }
}
