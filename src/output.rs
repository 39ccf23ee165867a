use std::io::{self, Write};

use serde::Serialize;

use crate::app::ConvertResult;
use crate::diagnostics::Diagnostic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
pub struct ConvertReport<'a> {
    #[serde(flatten)]
    pub result: &'a ConvertResult,
    pub warnings: Vec<Diagnostic>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_convert(result: &ConvertResult, warnings: Vec<Diagnostic>) -> io::Result<()> {
        Self::print_json(&ConvertReport { result, warnings })
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_convert(result: &ConvertResult, warnings: &[Diagnostic]) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        Self::write_summary(&mut stdout, result, warnings)
    }

    pub fn write_summary(
        out: &mut impl Write,
        result: &ConvertResult,
        warnings: &[Diagnostic],
    ) -> io::Result<()> {
        let green = "\x1b[32m";
        let yellow = "\x1b[33m";
        let cyan = "\x1b[36m";
        let reset = "\x1b[0m";

        let title = if result.dry_run {
            "hcp2bids summary (dry run)"
        } else {
            "hcp2bids summary"
        };
        writeln!(out, "{cyan}{title}{reset}")?;
        if let Some(name) = &result.dataset_name {
            writeln!(out, "{cyan}Dataset: {name}{reset}")?;
        }
        writeln!(
            out,
            "{green}Subjects: {}  Images: {}  Files placed: {}{reset}",
            result.subjects.len(),
            result.images,
            result.transfers.len()
        )?;
        writeln!(
            out,
            "{yellow}Already present: {}  Skipped: {}  Renamed: {}  Warnings: {}{reset}",
            result.existing.len(),
            result.skipped.len(),
            result.renames.len(),
            warnings.len()
        )?;
        for warning in warnings {
            writeln!(out, "{yellow}  ! {}{reset}", warning.message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticKind;

    #[test]
    fn summary_lists_counts_and_warnings() {
        let result = ConvertResult {
            dry_run: true,
            dataset_name: Some("HCPAging".to_string()),
            subjects: vec!["HCA000001".to_string()],
            images: 3,
            transfers: Vec::new(),
            existing: Vec::new(),
            skipped: Vec::new(),
            renames: Vec::new(),
        };
        let warnings = vec![Diagnostic::warning(
            DiagnosticKind::MissingSidecar,
            "JSON sidecar file does not exist for /raw/x.nii.gz",
        )];

        let mut buffer = Vec::new();
        TextOutput::write_summary(&mut buffer, &result, &warnings).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("(dry run)"));
        assert!(text.contains("Dataset: HCPAging"));
        assert!(text.contains("Subjects: 1  Images: 3  Files placed: 0"));
        assert!(text.contains("JSON sidecar file does not exist"));
    }
}
