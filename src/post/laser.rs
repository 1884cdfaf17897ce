//! Grbl laser post-processor
//!
//! jscut brackets every cut with `; plunge` and `; Retract` comments. A laser
//! head has no depth to plunge to, so the comments become laser on/off
//! commands placed before the line that follows them, and every Z move is
//! dropped.
//!
//! Lines are handled as raw bytes: comments may carry Latin-1 or other
//! non-UTF-8 text, and those lines go through untouched.

use crate::config::Power;
use crate::post::{LineKind, PostProcessor};

pub const PLUNGE_MARKER: &str = "; plunge";
pub const RETRACT_MARKER: &str = "; Retract";
pub const Z_AXIS: u8 = b'Z';

pub const LASER_ON: &str = "M3";
pub const POWER_ON_DELAY: &str = "G4 P0.5";
pub const LASER_OFF: &str = "M5 S0";
pub const PROGRAM_END: &str = "M2";

fn contains(line: &[u8], pattern: &str) -> bool {
    line.windows(pattern.len()).any(|w| w == pattern.as_bytes())
}

/// Classify a line by substring. Plunge beats retract beats Z motion, so a
/// marker comment on a Z move is still a marker.
pub fn classify(line: &[u8]) -> LineKind {
    if contains(line, PLUNGE_MARKER) {
        LineKind::Plunge
    } else if contains(line, RETRACT_MARKER) {
        LineKind::Retract
    } else if line.contains(&Z_AXIS) {
        LineKind::ZMove
    } else {
        LineKind::Passthrough
    }
}

/// Follow-on state of one marker type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Marker {
    #[default]
    Idle,
    /// Seen on the previous line; its commands go out before the current one
    Pending,
}

impl Marker {
    fn arm(&mut self) {
        *self = Marker::Pending;
    }

    /// Reset to idle, reporting whether the marker was pending.
    fn take(&mut self) -> bool {
        std::mem::take(self) == Marker::Pending
    }
}

pub struct GrblLaserPost {
    laser_on: Vec<u8>,
    plunge: Marker,
    retract: Marker,
}

impl GrblLaserPost {
    pub fn new(power: Power) -> Self {
        Self {
            laser_on: format!("{} {}", LASER_ON, power.token()).into_bytes(),
            plunge: Marker::Idle,
            retract: Marker::Idle,
        }
    }
}

impl PostProcessor for GrblLaserPost {
    fn name(&self) -> &str {
        "Grbl laser"
    }

    fn process_line(&mut self, line: &[u8], out: &mut Vec<Vec<u8>>) -> LineKind {
        // Both states are consumed before the current line is looked at.
        if self.plunge.take() {
            out.push(self.laser_on.clone());
            out.push(POWER_ON_DELAY.as_bytes().to_vec());
        }
        if self.retract.take() {
            out.push(LASER_OFF.as_bytes().to_vec());
        }

        let kind = classify(line);
        match kind {
            LineKind::Plunge => self.plunge.arm(),
            LineKind::Retract => self.retract.arm(),
            LineKind::ZMove => {}
            LineKind::Passthrough => out.push(line.to_vec()),
        }
        kind
    }

    fn finish(&mut self, out: &mut Vec<Vec<u8>>) -> Option<LineKind> {
        // A marker with no line after it has nothing to precede; its block is lost.
        let dangling = if self.plunge.take() {
            Some(LineKind::Plunge)
        } else if self.retract.take() {
            Some(LineKind::Retract)
        } else {
            None
        };
        out.push(PROGRAM_END.as_bytes().to_vec());
        dangling
    }
}
