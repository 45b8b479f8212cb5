/*!
    Subprocess hosting for the rawpipe crate ecosystem.

    Media transcoders run as black-box child processes; this crate owns the
    mechanics of talking to them. [`ProcessHost`] spawns a child with the
    requested pipes and keeps its diagnostic stream drained, [`Session`]
    enforces the open/transfer/close lifecycle shared by readers and writers,
    and [`ProgressMonitor`] turns diagnostic chatter into percentage updates.
*/

mod process;
mod progress;
mod session;

pub use process::{IoMode, ProcessHandle, ProcessHost, SpawnOptions, Verbosity};
pub use progress::{ProgressMonitor, ProgressSubscription};
pub use session::{Session, SessionState};
