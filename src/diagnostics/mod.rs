//! Annotated reports for config file errors
//!
//! Errors that carry a span into a config file are drawn against the file
//! text, the same way source errors are.

use std::ops::Range;
use std::path::Path;

use ariadne::{Color, Config, Label, Report, ReportKind, Source};

use crate::config::ConfigError;

/// Render `err` against its source file. Returns `None` for errors that do
/// not point into a file.
pub fn annotate(err: &ConfigError, color: bool) -> Option<String> {
    let (path, text, span, note) = match err {
        ConfigError::Syntax {
            path,
            text,
            span: Some(span),
            message,
        } => (path, text, span.clone(), message.clone()),
        ConfigError::FilePowerOutOfRange {
            path,
            text,
            span,
            value,
        } => (path, text, span.clone(), format!("{value} is not within 0-100")),
        _ => return None,
    };

    render(path, text, span, &err.to_string(), &note, color).ok()
}

fn render(
    path: &Path,
    text: &str,
    span: Range<usize>,
    message: &str,
    note: &str,
    color: bool,
) -> std::io::Result<String> {
    let id = path.display().to_string();
    let mut buf = Vec::new();

    Report::build(ReportKind::Error, id.as_str(), span.start)
        .with_config(Config::default().with_color(color))
        .with_message(message)
        .with_label(
            Label::new((id.as_str(), span))
                .with_message(note)
                .with_color(Color::Red),
        )
        .finish()
        .write((id.as_str(), Source::from(text)), &mut buf)?;

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, FileConfig};
    use std::path::PathBuf;

    #[test]
    fn test_out_of_range_points_at_value() {
        let cfg = FileConfig::parse(PathBuf::from("shop.toml"), "power = 250\n".into()).unwrap();
        let err = resolve(None, Some(cfg)).unwrap_err();

        let report = annotate(&err, false).expect("no report");
        assert!(report.contains("shop.toml"));
        assert!(report.contains("250 is not within 0-100"));
        assert!(report.contains("power = 250"));
    }

    #[test]
    fn test_syntax_error_report() {
        let err = FileConfig::parse(PathBuf::from("shop.toml"), "power = = 3\n".into())
            .unwrap_err();
        let report = annotate(&err, false).expect("no report");
        assert!(report.contains("shop.toml"));
    }

    #[test]
    fn test_plain_errors_are_not_annotated() {
        assert!(annotate(&ConfigError::MissingPower, false).is_none());
        assert!(annotate(&ConfigError::PowerOutOfRange { value: -1 }, false).is_none());
    }
}
