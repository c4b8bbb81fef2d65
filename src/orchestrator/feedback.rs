//! Live operator feedback: a single rewritten status line per campaign.

use std::io::{IsTerminal, Write};

use crate::telemetry::TelemetrySample;

const SPINNER: [char; 8] = ['⣾', '⣽', '⣻', '⢿', '⡿', '⣟', '⣯', '⣷'];

/// Rewrites one line on stdout. Disabled output swallows everything, which
/// keeps tests and piped runs free of control sequences.
#[derive(Debug)]
pub struct ProgressLine {
    enabled: bool,
    frame: usize,
}

impl ProgressLine {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, frame: 0 }
    }

    /// Enabled only when stdout is a terminal.
    pub fn for_stdout() -> Self {
        Self::new(std::io::stdout().is_terminal())
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    /// Next spinner frame followed by `status`.
    pub fn frame(&mut self, status: &str) -> String {
        let spin = SPINNER[self.frame % SPINNER.len()];
        self.frame = self.frame.wrapping_add(1);
        format!("{spin} {status}")
    }

    pub fn update(&mut self, status: &str) {
        let line = self.frame(status);
        if self.enabled {
            let mut out = std::io::stdout().lock();
            let _ = write!(out, "\x1b[2K\x1b[?25l{line}\r");
            let _ = out.flush();
        }
    }

    /// Replace the status line with a final one and restore the cursor.
    pub fn finish(&mut self, line: &str) {
        self.frame = 0;
        if self.enabled {
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out, "\x1b[2K{line}\x1b[?25h");
            let _ = out.flush();
        } else {
            println!("{line}");
        }
    }
}

fn dbm(value: Option<i32>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{v}dBm"))
}

/// `RSSI: -62dBm, Noise Floor: -95dBm, SNR: 33dB`, with `N/A` for fields the
/// board does not report.
pub fn telemetry_status(sample: &TelemetrySample) -> String {
    let snr = sample
        .snr_db()
        .map_or_else(|| "N/A".to_string(), |v| format!("{v}dB"));
    format!(
        "RSSI: {}, Noise Floor: {}, SNR: {snr}",
        dbm(sample.rssi),
        dbm(sample.noise_floor)
    )
}

/// `1500.00 Kbps`, or `N/A` before the first accepted trial.
pub fn kbps(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{v:.2} Kbps"))
}

pub fn millis(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{v:.2} ms"))
}
