//! Transient user notifications.
//!
//! A `Notice` is one line of feedback (a toast) that auto-dismisses after a
//! TTL. Raising one always emits a `tracing` event as well, so nothing the
//! user is told goes unlogged.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// How loud a notice is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
}

impl Level {
    pub fn tag(self) -> &'static str {
        match self {
            Level::Info => "info",
            Level::Success => "ok",
            Level::Warning => "warn",
            Level::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: Level,
    pub text: String,
    pub raised_at: Instant,
}

/// Default time a notice stays visible.
pub const DEFAULT_TTL: Duration = Duration::from_millis(4000);

/// Most notices kept at once; older ones drop off first.
const MAX_VISIBLE: usize = 3;

/// Queue of live notices.
#[derive(Debug, Clone)]
pub struct Notices {
    ttl: Duration,
    queue: VecDeque<Notice>,
    revision: u64,
}

impl Default for Notices {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl Notices {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            queue: VecDeque::new(),
            revision: 0,
        }
    }

    /// Raise a notice now.
    pub fn raise(&mut self, level: Level, text: impl Into<String>) {
        self.raise_at(level, text, Instant::now());
    }

    pub fn raise_at(&mut self, level: Level, text: impl Into<String>, now: Instant) {
        let full: String = text.into();
        match level {
            Level::Error => tracing::error!(notice = %full),
            Level::Warning => tracing::warn!(notice = %full),
            Level::Info | Level::Success => tracing::info!(notice = %full),
        }
        // Toasts are single-line; the log keeps the rest.
        let text = full.lines().next().unwrap_or_default().to_string();
        self.queue.push_back(Notice {
            level,
            text,
            raised_at: now,
        });
        while self.queue.len() > MAX_VISIBLE {
            self.queue.pop_front();
        }
        self.revision += 1;
    }

    pub fn info(&mut self, text: impl Into<String>) {
        self.raise(Level::Info, text);
    }

    pub fn success(&mut self, text: impl Into<String>) {
        self.raise(Level::Success, text);
    }

    pub fn warn(&mut self, text: impl Into<String>) {
        self.raise(Level::Warning, text);
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.raise(Level::Error, text);
    }

    /// Drop notices older than the TTL. Returns `true` if any expired.
    pub fn expire(&mut self, now: Instant) -> bool {
        let before = self.queue.len();
        let ttl = self.ttl;
        self.queue
            .retain(|n| now.saturating_duration_since(n.raised_at) < ttl);
        let expired = self.queue.len() != before;
        if expired {
            self.revision += 1;
        }
        expired
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notice> {
        self.queue.iter()
    }

    /// Most recent notice.
    pub fn latest(&self) -> Option<&Notice> {
        self.queue.back()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Bumped on every change; renders compare it to skip redundant frames.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices_expire_after_ttl() {
        let mut notices = Notices::new(Duration::from_millis(100));
        let t0 = Instant::now();
        notices.raise_at(Level::Info, "loaded", t0);
        assert!(!notices.expire(t0 + Duration::from_millis(50)));
        assert_eq!(notices.latest().unwrap().text, "loaded");
        assert!(notices.expire(t0 + Duration::from_millis(150)));
        assert!(notices.is_empty());
    }

    #[test]
    fn notices_are_single_line_and_bounded() {
        let mut notices = Notices::default();
        notices.error("first line\nsecond line");
        assert_eq!(notices.latest().unwrap().text, "first line");
        for i in 0..10 {
            notices.info(format!("n{i}"));
        }
        assert_eq!(notices.iter().count(), MAX_VISIBLE);
        assert_eq!(notices.latest().unwrap().text, "n9");
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn log_keeps_every_line_of_a_notice() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let mut notices = Notices::default();
        tracing::subscriber::with_default(subscriber, || {
            notices.error("save failed\ncaused by: 500 Internal Server Error");
        });

        assert_eq!(notices.latest().unwrap().text, "save failed");
        let log = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(log.contains("caused by: 500 Internal Server Error"), "{log}");
    }
}
