use camino::Utf8Path;
use serde::Serialize;

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::domain::SubjectId;
use crate::error::ConvertError;
use crate::sidecar;
use crate::transfer::FileOps;

pub const BIDS_VERSION: &str = "1.8.0";
pub const AUTO_NAME: &str = "auto";
pub const DESCRIPTION_FILE: &str = "dataset_description.json";
pub const README_FILE: &str = "README";
pub const BIDSIGNORE_FILE: &str = ".bidsignore";

const README: &str =
    "This is a BIDS dataset generated from the HCP Lifespan datasets using HCPLifespan2BIDS.\n";
const BIDSIGNORE: &[&str] = &["*.mp4", "*_physio.csv", "perf/"];

/// The converter's own identity, recorded in `dataset_description.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedBy {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "CodeURL")]
    pub code_url: String,
}

impl GeneratedBy {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        code_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            code_url: code_url.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DatasetDescription<'a> {
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "BIDSVersion")]
    bids_version: &'a str,
    #[serde(rename = "DatasetType")]
    dataset_type: &'a str,
    #[serde(rename = "GeneratedBy")]
    generated_by: [&'a GeneratedBy; 1],
}

/// Resolves `auto` from the study code in the first subject's id.
pub fn detect_name(name: &str, first_subject: &SubjectId, sink: &dyn DiagnosticSink) -> String {
    if name != AUTO_NAME {
        return name.to_string();
    }
    let id = first_subject.as_str();
    let detected = if id.contains("HCD") {
        "HCPDevelopment"
    } else if id.contains("HCA") {
        "HCPAging"
    } else {
        sink.emit(Diagnostic::warning(
            DiagnosticKind::DatasetName,
            format!("Could not determine dataset name from subject ID {id}"),
        ));
        "HCPUnknown"
    };
    detected.to_string()
}

/// Writes `dataset_description.json`, `README` and `.bidsignore` at the dataset root.
/// A dry run only reports them.
pub fn write_metadata_files(
    bids_dir: &Utf8Path,
    name: &str,
    generated_by: &GeneratedBy,
    dry_run: bool,
    fs: &dyn FileOps,
    sink: &dyn DiagnosticSink,
) -> Result<(), ConvertError> {
    for file in [DESCRIPTION_FILE, README_FILE, BIDSIGNORE_FILE] {
        let path = bids_dir.join(file);
        sink.emit(
            Diagnostic::info(DiagnosticKind::DatasetMetadata, format!("Writing {path}")).at(&path),
        );
    }
    if dry_run {
        return Ok(());
    }
    fs.create_dir_all(bids_dir)?;

    let description = DatasetDescription {
        name,
        bids_version: BIDS_VERSION,
        dataset_type: "raw",
        generated_by: [generated_by],
    };
    fs.write(
        &bids_dir.join(DESCRIPTION_FILE),
        &sidecar::to_json_bytes(&description)?,
    )?;

    fs.write(&bids_dir.join(README_FILE), README.as_bytes())?;

    let mut ignore = BIDSIGNORE.join("\n");
    ignore.push('\n');
    fs.write(&bids_dir.join(BIDSIGNORE_FILE), ignore.as_bytes())?;
    Ok(())
}
