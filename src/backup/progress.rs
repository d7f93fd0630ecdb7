//! Progress and log events emitted by the engine.
//!
//! Every operation reports through a [`Reporter`], which forwards
//! [`ProgressEvent`]s to a caller supplied callback (or an `mpsc` channel) and
//! mirrors them into `tracing`. Percentages are clamped to `0..=100` and never
//! go backwards within one reporter, even when destinations upload in
//! parallel.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    #[display("INFO")]
    Info,
    #[display("WARNING")]
    Warning,
    #[display("ERROR")]
    Error,
    #[display("DEBUG")]
    Debug,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub message: String,
    pub percent: u8,
    pub level: Level,
}

pub type ProgressCallback = dyn Fn(&ProgressEvent) + Send + Sync;

pub struct Reporter {
    callback: Arc<ProgressCallback>,
    last_percent: Mutex<u8>,
}

impl Reporter {
    pub fn new<F: Fn(&ProgressEvent) + Send + Sync + 'static>(callback: F) -> Self {
        Self::from_arc(Arc::new(callback))
    }

    fn from_arc(callback: Arc<ProgressCallback>) -> Self {
        Self {
            callback,
            last_percent: Mutex::new(0),
        }
    }

    /// Reporter that only mirrors events into `tracing`.
    pub fn silent() -> Self {
        Self::new(|_| {})
    }

    pub fn channel(sender: Sender<ProgressEvent>) -> Self {
        let sender = Mutex::new(sender);
        Self::new(move |event| {
            if let Ok(sender) = sender.lock() {
                // A dropped receiver only means nobody is watching anymore.
                let _ = sender.send(event.clone());
            }
        })
    }

    /// New reporter sharing the same callback, with its percentage reset.
    pub fn fork(&self) -> Self {
        Self::from_arc(self.callback.clone())
    }

    pub fn percent(&self) -> u8 {
        self.last_percent.lock().map(|p| *p).unwrap_or(100)
    }

    pub fn report<S: Into<String>>(&self, level: Level, message: S, percent: Option<u8>) {
        let message = message.into();
        match level {
            Level::Error => tracing::error!("{message}"),
            Level::Warning => tracing::warn!("{message}"),
            Level::Info | Level::Debug => tracing::debug!("{message}"),
        }

        // Hold the lock while calling back so that events reach the consumer
        // in percent order.
        let mut last = match self.last_percent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let percent = percent.map_or(*last, |p| p.min(100).max(*last));
        *last = percent;
        (self.callback)(&ProgressEvent {
            message,
            percent,
            level,
        });
    }

    pub fn info<S: Into<String>>(&self, message: S, percent: u8) {
        self.report(Level::Info, message, Some(percent))
    }

    pub fn debug<S: Into<String>>(&self, message: S) {
        self.report(Level::Debug, message, None)
    }

    pub fn warn<S: Into<String>>(&self, message: S) {
        self.report(Level::Warning, message, None)
    }

    pub fn error<S: Into<String>>(&self, message: S) {
        self.report(Level::Error, message, None)
    }
}

/// Linear position of step `index` of `total` inside `[start, end]`.
pub fn scaled(start: u8, end: u8, index: usize, total: usize) -> u8 {
    if total == 0 || end <= start {
        return start;
    }
    let span = (end - start) as usize;
    let offset = span * index.min(total) / total;
    start + offset as u8
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    /// Reporter collecting every event, for assertions in other modules.
    pub(crate) fn collecting() -> (Reporter, Arc<Mutex<Vec<ProgressEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let reporter = Reporter::new(move |e| sink.lock().unwrap().push(e.clone()));
        (reporter, events)
    }

    #[test]
    fn test_percent_is_monotonic_and_clamped() {
        let (reporter, events) = collecting();
        reporter.info("start", 10);
        reporter.info("backwards", 5);
        reporter.warn("no percent");
        reporter.info("overflow", 250);

        let percents: Vec<u8> = events.lock().unwrap().iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![10, 10, 10, 100]);
        assert_eq!(reporter.percent(), 100);
    }

    #[test]
    fn test_channel_reporter() {
        let (tx, rx) = channel();
        let reporter = Reporter::channel(tx);
        reporter.error("boom");
        drop(reporter);

        let received: Vec<_> = rx.iter().collect();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].level, Level::Error);
        assert_eq!(received[0].message, "boom");
    }

    #[test]
    fn test_fork_resets_percent() {
        let (reporter, events) = collecting();
        reporter.info("done", 100);
        let forked = reporter.fork();
        forked.info("again", 0);

        assert_eq!(events.lock().unwrap().last().unwrap().percent, 0);
    }

    #[test]
    fn test_scaled() {
        assert_eq!(scaled(10, 30, 0, 2), 10);
        assert_eq!(scaled(10, 30, 1, 2), 20);
        assert_eq!(scaled(10, 30, 2, 2), 30);
        assert_eq!(scaled(65, 95, 0, 0), 65);
    }

    #[test]
    fn test_level_serde() {
        assert_eq!(serde_json::to_string(&Level::Warning).unwrap(), "\"WARNING\"");
        assert_eq!(Level::Debug.to_string(), "DEBUG");
    }
}
