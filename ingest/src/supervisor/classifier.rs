use std::sync::atomic::{AtomicBool, Ordering};

use crates::domain::value_objects::enums::stream_statuses::StreamStatus;

/// What one transcoder diagnostic line says about the live input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvidence {
    Connect,
    Disconnect,
    None,
}

const DISCONNECT_PATTERNS: [&str; 5] = [
    "connection timed out",
    "connection failed",
    "connection closed",
    "no more input",
    "end of file",
];

const CONNECT_PATTERNS: [&str; 2] = ["stream #0", "input #0"];

/// Heuristic, case-insensitive. Disconnect evidence wins when a line matches both.
pub fn classify_line(line: &str) -> LineEvidence {
    let line = line.to_ascii_lowercase();

    if DISCONNECT_PATTERNS.iter().any(|pattern| line.contains(pattern)) {
        return LineEvidence::Disconnect;
    }

    let reports_video_rate = line.contains("video:") && line.contains("fps");
    if reports_video_rate || CONNECT_PATTERNS.iter().any(|pattern| line.contains(pattern)) {
        return LineEvidence::Connect;
    }

    LineEvidence::None
}

/// Connected flag for one stream. Each method returns the status to announce
/// only when the flag actually flips, so repeated evidence is silent.
#[derive(Debug, Default)]
pub struct ConnectionMonitor {
    connected: AtomicBool,
}

impl ConnectionMonitor {
    pub fn observe(&self, line: &str) -> Option<StreamStatus> {
        match classify_line(line) {
            LineEvidence::Connect => self
                .connected
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .ok()
                .map(|_| StreamStatus::Running),
            LineEvidence::Disconnect => self.mark_disconnected(),
            LineEvidence::None => None,
        }
    }

    pub fn mark_disconnected(&self) -> Option<StreamStatus> {
        self.connected
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| StreamStatus::Waiting)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
