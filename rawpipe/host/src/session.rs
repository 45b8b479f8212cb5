/*!
    The open/transfer/close lifecycle shared by readers and writers.

    A session owns at most one live subprocess at a time. Opening twice
    without closing is a caller bug and is rejected; closing an already
    closed session is an accepted no-op, so teardown paths can close
    unconditionally.
*/

use std::time::Duration;

use rawpipe_types::{Error, Result};

use crate::process::ProcessHandle;

/**
    Lifecycle state of a session.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No subprocess is live. The only state a session can open from.
    #[default]
    Closed,
    /// A decode subprocess is live and units flow out of it.
    Reading,
    /// An encode subprocess is live and units flow into it.
    Writing,
}

impl SessionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Reading => "reading",
            Self::Writing => "writing",
        }
    }
}

/**
    State machine wrapping a [`ProcessHandle`] for the duration of one
    read or write session.
*/
#[derive(Debug, Default)]
pub struct Session {
    state: SessionState,
    handle: Option<ProcessHandle>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /**
        Current lifecycle state.
    */
    pub fn state(&self) -> SessionState {
        self.state
    }

    /**
        True while a subprocess is live.
    */
    pub fn is_open(&self) -> bool {
        self.state != SessionState::Closed
    }

    /**
        Enter the reading state with a freshly spawned subprocess. Valid
        only from the closed state.
    */
    pub fn begin_read(&mut self, handle: ProcessHandle) -> Result<()> {
        self.begin(SessionState::Reading, handle)
    }

    /**
        Enter the writing state with a freshly spawned subprocess. Valid
        only from the closed state.
    */
    pub fn begin_write(&mut self, handle: ProcessHandle) -> Result<()> {
        self.begin(SessionState::Writing, handle)
    }

    fn begin(&mut self, target: SessionState, handle: ProcessHandle) -> Result<()> {
        if self.state != SessionState::Closed {
            return Err(Error::invalid_state(format!(
                "cannot open a session that is already {}",
                self.state.as_str()
            )));
        }
        self.state = target;
        self.handle = Some(handle);
        Ok(())
    }

    /**
        The live subprocess handle. Errors when the session is closed.
    */
    pub fn handle_mut(&mut self) -> Result<&mut ProcessHandle> {
        self.handle
            .as_mut()
            .ok_or_else(|| Error::invalid_state("session is not open"))
    }

    /**
        Tear the session down. From the closed state this is a no-op.

        The caller drops its pipe handles before calling close, so the
        subprocess sees end-of-input and gets `grace` to finish flushing
        before it is killed.
    */
    pub fn close(&mut self, grace: Duration) -> Result<()> {
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };
        self.state = SessionState::Closed;
        // Exit races are swallowed inside shutdown; a child that quit on
        // its own is a success, not an error.
        handle.shutdown(grace)?;
        Ok(())
    }
}
