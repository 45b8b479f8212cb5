/*!
    Progress extraction from transcoder diagnostics.

    The transcoder reports position as `time=HH:MM:SS.ff` fragments inside
    its stderr chatter. Given the total duration of the job, those become
    percentages. Everything that does not match is ignored, so log format
    drift degrades progress reporting instead of breaking the transfer.
*/

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use regex::Regex;

use rawpipe_types::{Error, Result};

use crate::process::ProcessHandle;

fn time_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"time=\s*(\d+):(\d+):(\d+(?:\.\d+)?)").unwrap()
    })
}

/// Elapsed seconds from a diagnostic line, if it carries a time fragment.
fn parse_elapsed(line: &str) -> Option<f64> {
    let captures = time_pattern().captures(line)?;
    let hours: f64 = captures[1].parse().ok()?;
    let minutes: f64 = captures[2].parse().ok()?;
    let seconds: f64 = captures[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/**
    Attaches a progress parser to a running subprocess.
*/
pub struct ProgressMonitor;

impl ProgressMonitor {
    /**
        Take the diagnostic receiver of `handle` and parse it into
        percentage updates against `total_secs` of media.

        Fails when the total is not positive or when the diagnostics were
        not captured (or were already taken).
    */
    pub fn attach(handle: &mut ProcessHandle, total_secs: f64) -> Result<ProgressSubscription> {
        if !total_secs.is_finite() || total_secs <= 0.0 {
            return Err(Error::configuration(
                "progress needs a positive total duration",
            ));
        }
        let lines = handle.take_diagnostics().ok_or_else(|| {
            Error::invalid_state("diagnostics are not captured or already taken")
        })?;
        Ok(ProgressSubscription::spawn(lines, total_secs))
    }
}

/**
    Receiving side of a progress parser. Updates stop when the subprocess
    closes its diagnostic stream.
*/
#[derive(Debug)]
pub struct ProgressSubscription {
    latest: Arc<AtomicU64>,
    updates: Receiver<f64>,
    worker: Option<JoinHandle<()>>,
}

impl ProgressSubscription {
    fn spawn(lines: Receiver<String>, total_secs: f64) -> Self {
        let latest = Arc::new(AtomicU64::new(0f64.to_bits()));
        let (tx, rx) = mpsc::channel();

        let shared = Arc::clone(&latest);
        let worker = thread::spawn(move || {
            for line in lines {
                let Some(elapsed) = parse_elapsed(&line) else {
                    continue;
                };
                let percent = (100.0 * elapsed / total_secs).min(100.0);
                shared.store(percent.to_bits(), Ordering::Relaxed);
                // A dead receiver means the subscription was dropped.
                if tx.send(percent).is_err() {
                    break;
                }
            }
        });

        Self {
            latest,
            updates: rx,
            worker: Some(worker),
        }
    }

    /**
        Most recent percentage, 0 to 100. Zero until the first update.
    */
    pub fn latest(&self) -> f64 {
        f64::from_bits(self.latest.load(Ordering::Relaxed))
    }

    /**
        Blocking iterator over percentage updates. Ends when the diagnostic
        stream closes.
    */
    pub fn updates(&self) -> mpsc::Iter<'_, f64> {
        self.updates.iter()
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        // Disconnect the update channel first so the parser bails on its
        // next send instead of holding the join until the diagnostic
        // stream closes.
        drop(std::mem::replace(&mut self.updates, mpsc::channel().1));
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_parsed_from_typical_chatter() {
        let line = "frame=  120 fps= 30 q=28.0 size=512kB time=00:01:30.50 bitrate=463.1kbits/s";
        assert_eq!(parse_elapsed(line), Some(90.5));

        assert_eq!(parse_elapsed("time=01:00:00"), Some(3600.0));
        assert_eq!(parse_elapsed("time= 00:00:02.00"), Some(2.0));
    }

    #[test]
    fn unrelated_chatter_is_ignored() {
        assert_eq!(parse_elapsed("Stream #0:0: Video: h264"), None);
        assert_eq!(parse_elapsed(""), None);
        assert_eq!(parse_elapsed("duration: 00:01:30.50"), None);
    }

    #[test]
    fn percentages_track_the_stream_and_cap_at_100() {
        let (tx, lines) = mpsc::channel();
        let subscription = ProgressSubscription::spawn(lines, 10.0);

        tx.send("time=00:00:02.50 bitrate=1k".to_string()).unwrap();
        tx.send("configuration: --enable-gpl".to_string()).unwrap();
        tx.send("time=00:00:05.00 bitrate=1k".to_string()).unwrap();
        // Past the nominal total: must clamp, not overshoot.
        tx.send("time=00:00:12.00 bitrate=1k".to_string()).unwrap();
        drop(tx);

        let updates: Vec<f64> = subscription.updates().collect();
        assert_eq!(updates, vec![25.0, 50.0, 100.0]);
        assert_eq!(subscription.latest(), 100.0);
    }

    #[test]
    fn dropping_a_subscription_does_not_wait_for_the_stream() {
        let (tx, lines) = mpsc::channel();
        let subscription = ProgressSubscription::spawn(lines, 100.0);

        // Keeps chattering long past the drop below, like a transcoder
        // mid-encode. Stops once the parser side is gone.
        let feeder = std::thread::spawn(move || {
            for _ in 0..500 {
                if tx.send("time=00:00:01.00 bitrate=1k".to_string()).is_err() {
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(10));
            }
        });

        // Wait for at least one update so the parser is demonstrably live.
        assert_eq!(subscription.updates().next(), Some(1.0));

        let started = std::time::Instant::now();
        drop(subscription);
        assert!(started.elapsed() < std::time::Duration::from_secs(1));

        feeder.join().unwrap();
    }

    #[test]
    fn attach_rejects_a_zero_total() {
        let mut handle = crate::process::ProcessHost::spawn(
            "cat",
            Vec::<String>::new(),
            crate::process::IoMode::duplex(),
        )
        .unwrap();

        let err = ProgressMonitor::attach(&mut handle, 0.0).unwrap_err();
        assert!(err.is_usage_error());
        handle.terminate();
    }

    #[test]
    fn attach_needs_untaken_diagnostics() {
        let mut handle = crate::process::ProcessHost::spawn(
            "cat",
            Vec::<String>::new(),
            crate::process::IoMode::duplex(),
        )
        .unwrap();

        let _lines = handle.take_diagnostics().unwrap();
        let err = ProgressMonitor::attach(&mut handle, 10.0).unwrap_err();
        assert!(err.is_usage_error());
        handle.terminate();
    }
}
