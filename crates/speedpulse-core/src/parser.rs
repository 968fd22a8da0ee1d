//! Incremental parser over the utility's stdout.
//!
//! [`LineParser::feed`] is called once per chunk, in arrival order. It keeps
//! the full text buffer for the finalizer and returns the readings found in
//! the line segments the chunk completed. A segment ends at `\n` or `\r`
//! (the CLI redraws progress with carriage returns); whatever follows the
//! last terminator waits for the next chunk, so a reading split across two
//! chunks is reported once.

use serde::{Deserialize, Serialize};

use crate::patterns;

/// Measurement phase a reading belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Ping,
    Download,
    Upload,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Ping => "ping",
            Phase::Download => "download",
            Phase::Upload => "upload",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recognised value. Ping in ms, rates in Mbps, never negative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub phase: Phase,
    pub value: f64,
}

/// Last value reported per phase; zero until the phase reports.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LastSeen {
    pub ping: f64,
    pub download: f64,
    pub upload: f64,
}

impl LastSeen {
    pub fn get(&self, phase: Phase) -> f64 {
        match phase {
            Phase::Ping => self.ping,
            Phase::Download => self.download,
            Phase::Upload => self.upload,
        }
    }

    fn record(&mut self, reading: &Reading) {
        match reading.phase {
            Phase::Ping => self.ping = reading.value,
            Phase::Download => self.download = reading.value,
            Phase::Upload => self.upload = reading.value,
        }
    }
}

#[derive(Debug, Default)]
pub struct LineParser {
    buffer: String,
    pending: String,
    last_seen: LastSeen,
}

impl LineParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the readings of every segment it completed.
    pub fn feed(&mut self, chunk: &str) -> Vec<Reading> {
        self.buffer.push_str(chunk);
        self.pending.push_str(chunk);

        let Some(end) = self.pending.rfind(|c: char| c == '\n' || c == '\r') else {
            return Vec::new();
        };
        // Both terminators are single-byte, so `end + 1` is a char boundary.
        let tail = self.pending.split_off(end + 1);
        let complete = std::mem::replace(&mut self.pending, tail);
        self.accept(&complete)
    }

    /// Scan the unterminated tail left at end of stream.
    pub fn finish(&mut self) -> Vec<Reading> {
        let rest = std::mem::take(&mut self.pending);
        self.accept(&rest)
    }

    /// Everything fed so far, in arrival order.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn last_seen(&self) -> LastSeen {
        self.last_seen
    }

    fn accept(&mut self, text: &str) -> Vec<Reading> {
        if text.is_empty() {
            return Vec::new();
        }
        let readings: Vec<Reading> = patterns::scan_readings(text)
            .into_iter()
            .filter(|r| !(r.phase == Phase::Ping && r.value == 0.0))
            .collect();
        for reading in &readings {
            self.last_seen.record(reading);
        }
        readings
    }
}
