//! Post-processors for machine-specific G-code output
//!
//! CAM tools emit generic G-code; each controller wants its own dialect.
//! A post-processor rewrites the program one line at a time, so a job of any
//! size streams through in constant memory.

use std::fmt;
use std::io::{self, BufRead, Write};

use log::{debug, warn};
use thiserror::Error;

pub mod laser;

#[derive(Error, Debug)]
pub enum PostError {
    #[error("failed to read input line {line}: {source}")]
    Read {
        line: usize,
        #[source]
        source: io::Error,
    },

    #[error("failed to write output: {0}")]
    Write(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, PostError>;

/// How a post-processor treated an input line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// `; plunge` comment: the tool enters the material after this line
    Plunge,
    /// `; Retract` comment: the tool leaves the material after this line
    Retract,
    /// Motion on the Z axis, dropped
    ZMove,
    /// Copied to the output unchanged
    Passthrough,
}

impl LineKind {
    pub fn is_marker(self) -> bool {
        matches!(self, LineKind::Plunge | LineKind::Retract)
    }
}

impl fmt::Display for LineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LineKind::Plunge => "plunge",
            LineKind::Retract => "retract",
            LineKind::ZMove => "Z move",
            LineKind::Passthrough => "passthrough",
        };
        f.write_str(name)
    }
}

/// Post-processor trait - implemented for each controller type
pub trait PostProcessor {
    /// Machine/controller name
    fn name(&self) -> &str;

    /// Handle one input line, without its terminator, pushing the lines to
    /// emit for it onto `out`.
    fn process_line(&mut self, line: &[u8], out: &mut Vec<Vec<u8>>) -> LineKind;

    /// Close the program after the last input line. Returns the marker that
    /// was still waiting for a follow-up line, if any.
    fn finish(&mut self, out: &mut Vec<Vec<u8>>) -> Option<LineKind>;
}

/// Line counts for one run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    pub lines_read: usize,
    pub lines_written: usize,
    pub passed: usize,
    pub dropped: usize,
    pub plunges: usize,
    pub retracts: usize,
    pub dangling: Option<LineKind>,
}

impl Summary {
    fn record(&mut self, kind: LineKind) {
        match kind {
            LineKind::Plunge => self.plunges += 1,
            LineKind::Retract => self.retracts += 1,
            LineKind::ZMove => self.dropped += 1,
            LineKind::Passthrough => self.passed += 1,
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} lines in, {} out ({} passed, {} Z moves dropped, {} plunges, {} retracts)",
            self.lines_read,
            self.lines_written,
            self.passed,
            self.dropped,
            self.plunges,
            self.retracts
        )
    }
}

/// Stream `input` through `post` into `output`.
///
/// Each line is fully processed and written before the next one is read.
/// Lines are passed on as bytes, so text that is not UTF-8 survives intact.
/// A read error stops the run where it is: whatever was written stays
/// written, but the program is not closed.
pub fn run<R: BufRead, W: Write>(
    post: &mut dyn PostProcessor,
    mut input: R,
    mut output: W,
) -> Result<Summary> {
    let mut summary = Summary::default();
    let mut buf = Vec::new();
    let mut pending = Vec::new();

    loop {
        buf.clear();
        match input.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(source) => {
                // The read error wins; a failed flush here only loses buffered output.
                if let Err(e) = output.flush() {
                    debug!("flush after read error failed: {}", e);
                }
                return Err(PostError::Read {
                    line: summary.lines_read + 1,
                    source,
                });
            }
        }
        summary.lines_read += 1;

        let kind = post.process_line(strip_terminator(&buf), &mut pending);
        if kind.is_marker() {
            debug!("line {}: {} marker", summary.lines_read, kind);
        }
        summary.record(kind);
        emit(&mut output, &mut pending, &mut summary)?;
    }

    summary.dangling = post.finish(&mut pending);
    if let Some(kind) = summary.dangling {
        warn!(
            "input ends with a {} marker and no line after it; its command block was not emitted",
            kind
        );
    }
    emit(&mut output, &mut pending, &mut summary)?;
    output.flush().map_err(PostError::Write)?;

    Ok(summary)
}

fn emit<W: Write>(
    output: &mut W,
    lines: &mut Vec<Vec<u8>>,
    summary: &mut Summary,
) -> Result<()> {
    for line in lines.drain(..) {
        output.write_all(&line).map_err(PostError::Write)?;
        output.write_all(b"\n").map_err(PostError::Write)?;
        summary.lines_written += 1;
    }
    Ok(())
}

/// Drop one trailing `\n`, then one trailing `\r`.
fn strip_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::laser::GrblLaserPost;
    use super::*;
    use crate::config::Power;
    use pretty_assertions::assert_eq;
    use std::io::{Cursor, Read};

    fn post(percent: i64) -> GrblLaserPost {
        GrblLaserPost::new(Power::new(percent).unwrap())
    }

    fn run_str(percent: i64, input: &str) -> (String, Summary) {
        let mut output = Vec::new();
        let summary = run(&mut post(percent), input.as_bytes(), &mut output).unwrap();
        (String::from_utf8(output).unwrap(), summary)
    }

    /// Hands out its data, then fails instead of reporting end of stream.
    struct Unplugged(Cursor<Vec<u8>>);

    impl Read for Unplugged {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.read(buf)? {
                0 => Err(io::Error::new(io::ErrorKind::Other, "device unplugged")),
                n => Ok(n),
            }
        }
    }

    struct Full;

    impl Write for Full {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_jscut_job() {
        let input = "\
G21
G90
G1 Z2.5 F100
G0 X10 Y10
; plunge
G1 Z-1 F50
G1 X20 Y10 F200
G1 X20 Y20
; Retract
G0 Z2.5
G0 X0 Y0
";
        let (output, summary) = run_str(60, input);

        assert_eq!(
            output,
            "\
G21
G90
G0 X10 Y10
M3 S60
G4 P0.5
G1 X20 Y10 F200
G1 X20 Y20
M5 S0
G0 X0 Y0
M2
"
        );
        assert_eq!(
            summary,
            Summary {
                lines_read: 11,
                lines_written: 10,
                passed: 6,
                dropped: 3,
                plunges: 1,
                retracts: 1,
                dangling: None,
            }
        );
    }

    #[test]
    fn test_empty_input_still_ends_program() {
        let (output, summary) = run_str(10, "");
        assert_eq!(output, "M2\n");
        assert_eq!(summary.lines_read, 0);
        assert_eq!(summary.lines_written, 1);
    }

    #[test]
    fn test_crlf_and_missing_final_newline() {
        let (output, _) = run_str(10, "G0 X1\r\n; Retract\r\nG0 X2");
        assert_eq!(output, "G0 X1\nM5 S0\nG0 X2\nM2\n");
    }

    #[test]
    fn test_dangling_marker_is_reported_not_emitted() {
        let (output, summary) = run_str(50, "G0 X1\n; plunge\n");
        assert_eq!(output, "G0 X1\nM2\n");
        assert_eq!(summary.dangling, Some(LineKind::Plunge));
    }

    #[test]
    fn test_read_error_stops_without_program_end() {
        let data = b"G0 X1\n; plunge\nG1 X2\n".to_vec();
        let input = io::BufReader::new(Unplugged(Cursor::new(data)));
        let mut output = Vec::new();

        let err = run(&mut post(10), input, &mut output).unwrap_err();

        assert!(matches!(err, PostError::Read { line: 4, .. }));
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "G0 X1\nM3 S10\nG4 P0.5\nG1 X2\n"
        );
    }

    #[test]
    fn test_non_utf8_bytes_pass_through() {
        let input: &[u8] = b"G0 X1\n(angle 90\xb0)\n; plunge\nG0 X2 (\xe9)\n";
        let mut output = Vec::new();

        let summary = run(&mut post(10), input, &mut output).unwrap();

        assert_eq!(
            output,
            b"G0 X1\n(angle 90\xb0)\nM3 S10\nG4 P0.5\nG0 X2 (\xe9)\nM2\n".to_vec()
        );
        assert_eq!(summary.passed, 3);
        assert_eq!(summary.lines_written, 6);
    }

    #[test]
    fn test_write_error() {
        let err = run(&mut post(10), "G0 X1\n".as_bytes(), Full).unwrap_err();
        assert!(matches!(err, PostError::Write(_)));
    }

    #[test]
    fn test_summary_display() {
        let (_, summary) = run_str(10, "G0 X1\nG0 Z1\n");
        assert_eq!(
            summary.to_string(),
            "2 lines in, 2 out (1 passed, 1 Z moves dropped, 0 plunges, 0 retracts)"
        );
    }
}
