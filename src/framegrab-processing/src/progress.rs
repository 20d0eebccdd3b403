//! Pull-parser for the ffmpeg `-progress` key=value stream
//!
//! Lines are fed one at a time; the parser keeps the latest `frame`,
//! `out_time_ms` and `speed` values and emits a snapshot whenever a
//! `progress=continue` or `progress=end` marker arrives.

/// Counters observed up to a progress marker
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// Output frame number, -1 when not reported yet
    pub frame: i64,
    /// Microseconds since media start (the key name is legacy), -1 when unknown
    pub out_time_ms: i64,
    pub speed: String,
    /// Set for `progress=end`
    pub ended: bool,
}

impl ProgressSnapshot {
    /// Absolute media cursor for a run that started at `start_sec_abs`.
    ///
    /// None when neither counter has been reported.
    pub fn cursor_sec(&self, start_sec_abs: f64) -> Option<f64> {
        if self.out_time_ms < 0 && self.frame < 0 {
            return None;
        }
        if self.out_time_ms < 0 {
            return Some(start_sec_abs);
        }
        Some(start_sec_abs + self.out_time_ms as f64 / 1_000_000.0)
    }

    /// Output time in seconds, or -1.0 when unknown
    pub fn out_time_sec(&self) -> f64 {
        if self.out_time_ms < 0 {
            -1.0
        } else {
            self.out_time_ms as f64 / 1_000_000.0
        }
    }
}

/// Classification of one stdout line
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressLine {
    /// Empty or whitespace-only line
    Blank,
    /// A recognized counter (`frame=`, `out_time_ms=`, `speed=`)
    Field,
    /// A `progress=` marker with the accumulated counters
    Snapshot(ProgressSnapshot),
    /// Anything else
    Other,
}

#[derive(Debug)]
pub struct ProgressParser {
    frame: i64,
    out_time_ms: i64,
    speed: String,
}

impl Default for ProgressParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressParser {
    pub fn new() -> Self {
        Self {
            frame: -1,
            out_time_ms: -1,
            speed: String::new(),
        }
    }

    /// Feed one line. Unparseable counter values (for example `N/A`) keep the previous value.
    pub fn feed(&mut self, line: &str) -> ProgressLine {
        let line = line.trim();
        if line.is_empty() {
            return ProgressLine::Blank;
        }

        let Some((key, value)) = line.split_once('=') else {
            return ProgressLine::Other;
        };

        match key {
            "frame" => {
                if let Ok(v) = value.trim().parse::<i64>() {
                    self.frame = v;
                }
                ProgressLine::Field
            }
            "out_time_ms" => {
                if let Ok(v) = value.trim().parse::<i64>() {
                    self.out_time_ms = v;
                }
                ProgressLine::Field
            }
            "speed" => {
                self.speed = value.trim().to_string();
                ProgressLine::Field
            }
            "progress" if value == "continue" || value == "end" => {
                ProgressLine::Snapshot(ProgressSnapshot {
                    frame: self.frame,
                    out_time_ms: self.out_time_ms,
                    speed: self.speed.clone(),
                    ended: value == "end",
                })
            }
            _ => ProgressLine::Other,
        }
    }
}
