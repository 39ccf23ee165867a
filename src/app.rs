use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::Value;
use walkdir::WalkDir;

use crate::classify::{Classification, Classifier, RawFile, SkipReason};
use crate::codec::{self, IMAGE_EXTENSION, SIDECAR_EXTENSION};
use crate::companions::PlanBuilder;
use crate::config::ConvertOptions;
use crate::dataset;
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::domain::{EntityKey, SubjectId};
use crate::error::ConvertError;
use crate::runs::{RenameRecord, RunDisambiguator};
use crate::sidecar;
use crate::transfer::{FileOps, LocalFs, PlanOutcome, TransferRecord, Transferer};

const UNPROCESSED_DIR: &str = "unprocessed";

#[derive(Debug, Clone, Serialize)]
pub struct ConvertResult {
    pub dry_run: bool,
    pub dataset_name: Option<String>,
    pub subjects: Vec<String>,
    pub images: usize,
    pub transfers: Vec<TransferRecord>,
    pub existing: Vec<String>,
    pub skipped: Vec<SkippedImage>,
    pub renames: Vec<RenameRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedImage {
    pub path: String,
    pub reason: SkipReason,
}

pub struct App<F: FileOps = LocalFs> {
    options: ConvertOptions,
    classifier: Classifier,
    fs: F,
}

impl App<LocalFs> {
    pub fn new(options: ConvertOptions) -> Self {
        Self::with_fs(options, LocalFs)
    }
}

impl<F: FileOps> App<F> {
    pub fn with_fs(options: ConvertOptions, fs: F) -> Self {
        let classifier = Classifier::new(options.classifier.clone());
        Self {
            options,
            classifier,
            fs,
        }
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    /// Converts every subject folder matched by `subject_pattern`.
    pub fn convert(
        &self,
        subject_pattern: &str,
        sink: &dyn DiagnosticSink,
    ) -> Result<ConvertResult, ConvertError> {
        let subject_dirs = discover_subjects(subject_pattern, sink)?;
        sink.emit(Diagnostic::info(
            DiagnosticKind::SubjectsFound,
            format!("Found {} subject folders matching {subject_pattern}", subject_dirs.len()),
        ));

        let mut result = ConvertResult {
            dry_run: self.options.dry_run,
            dataset_name: None,
            subjects: Vec::new(),
            images: 0,
            transfers: Vec::new(),
            existing: Vec::new(),
            skipped: Vec::new(),
            renames: Vec::new(),
        };
        let mut first_subject: Option<SubjectId> = None;

        for subject_dir in &subject_dirs {
            let subject = match subject_dir.file_name().map(SubjectId::from_folder_name) {
                Some(Ok(subject)) => subject,
                _ => {
                    sink.emit(
                        Diagnostic::warning(
                            DiagnosticKind::Excluded,
                            format!("Skipping folder without a usable subject id: {subject_dir}"),
                        )
                        .at(subject_dir),
                    );
                    continue;
                }
            };
            result.subjects.push(subject.to_string());
            if first_subject.is_none() {
                first_subject = Some(subject);
            }
            self.convert_subject(subject_dir, &mut result, sink)?;
        }

        let Some(first_subject) = first_subject else {
            sink.emit(Diagnostic::warning(
                DiagnosticKind::SubjectsFound,
                format!("No subjects found matching {subject_pattern}"),
            ));
            return Ok(result);
        };

        let name = dataset::detect_name(&self.options.name, &first_subject, sink);
        dataset::write_metadata_files(
            &self.options.output_dir,
            &name,
            &self.options.generated_by,
            self.options.dry_run,
            &self.fs,
            sink,
        )?;
        if !self.options.dry_run {
            result.renames = RunDisambiguator::new(
                &self.options.classifier.directions,
                self.options.run_order,
            )
            .fix_epi_runs(&self.options.output_dir, &self.fs, sink)?;
        }
        result.dataset_name = Some(name);
        Ok(result)
    }

    fn convert_subject(
        &self,
        subject_dir: &Utf8Path,
        result: &mut ConvertResult,
        sink: &dyn DiagnosticSink,
    ) -> Result<(), ConvertError> {
        let planner = PlanBuilder::new(&self.options.output_dir, self.options.sidecar_dir.as_deref());
        let transferer = Transferer::new(
            &self.fs,
            self.options.method,
            self.options.exists_policy,
            self.options.dry_run,
        );

        for path in discover_images(subject_dir, sink) {
            result.images += 1;
            sink.emit(Diagnostic::debug(
                DiagnosticKind::Classified,
                format!("Processing image file: {path}"),
            ));
            let raw = RawFile::new(subject_dir, path)?;
            let classified = match self.classifier.classify(&raw, sink)? {
                Classification::Accepted(classified) => classified,
                Classification::Skipped(reason) => {
                    report_skip(&raw, &reason, sink);
                    result.skipped.push(SkippedImage {
                        path: raw.path.to_string(),
                        reason,
                    });
                    continue;
                }
            };
            sink.emit(
                Diagnostic::info(
                    DiagnosticKind::Classified,
                    format!(
                        "{}: {} ({})",
                        raw.path, classified.modality, classified.folder
                    ),
                )
                .at(&raw.path),
            );

            let plan = planner.build(&raw, &classified, sink);
            match transferer.execute(&plan, sink)? {
                PlanOutcome::SkippedExisting => {
                    result.existing.push(plan.image().destination.to_string());
                }
                PlanOutcome::Transferred(records) => {
                    result.transfers.extend(records);
                    self.patch_sidecar(
                        &plan.image().destination,
                        classified.intended_for.as_deref(),
                        sink,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Adds `IntendedFor` and `TaskName` to the placed sidecar.
    fn patch_sidecar(
        &self,
        image: &Utf8Path,
        intended_for: Option<&str>,
        sink: &dyn DiagnosticSink,
    ) -> Result<(), ConvertError> {
        let sidecar_path = codec::swap_extension(image, SIDECAR_EXTENSION);
        if let Some(intended_for) = intended_for {
            sink.emit(
                Diagnostic::info(
                    DiagnosticKind::SidecarPatched,
                    format!("Adding IntendedFor {intended_for} to {sidecar_path}"),
                )
                .at(&sidecar_path),
            );
            if !self.options.dry_run {
                sidecar::patch(&self.fs, &sidecar_path, sidecar::INTENDED_FOR, Value::from(intended_for))?;
            }
        }
        let name = image.file_name().unwrap_or_default();
        if let Some(task) = codec::extract_entity(name, EntityKey::Task) {
            sink.emit(
                Diagnostic::info(
                    DiagnosticKind::SidecarPatched,
                    format!("Adding TaskName {task} to {sidecar_path}"),
                )
                .at(&sidecar_path),
            );
            if !self.options.dry_run {
                sidecar::patch(&self.fs, &sidecar_path, sidecar::TASK_NAME, Value::from(task))?;
            }
        }
        Ok(())
    }
}

fn report_skip(raw: &RawFile, reason: &SkipReason, sink: &dyn DiagnosticSink) {
    let diagnostic = match reason {
        SkipReason::UnknownModality => Diagnostic::info(
            DiagnosticKind::UnknownModality,
            format!("Unknown modality: {}", raw.path),
        ),
        SkipReason::InvalidEntity(entity) => Diagnostic::warning(
            DiagnosticKind::Excluded,
            format!("Skipping {}: invalid entity {entity}", raw.path),
        ),
        other => Diagnostic::debug(
            DiagnosticKind::Excluded,
            format!("Skipping {} ({other:?})", raw.path),
        ),
    };
    sink.emit(diagnostic.at(&raw.path));
}

/// Directories matching `pattern`, sorted.
pub fn discover_subjects(
    pattern: &str,
    sink: &dyn DiagnosticSink,
) -> Result<Vec<Utf8PathBuf>, ConvertError> {
    let paths = glob::glob(pattern).map_err(|err| ConvertError::InvalidPattern {
        pattern: pattern.to_string(),
        message: err.to_string(),
    })?;
    let mut dirs = Vec::new();
    for path in paths.filter_map(Result::ok).filter(|path| path.is_dir()) {
        match Utf8PathBuf::from_path_buf(path) {
            Ok(path) => dirs.push(path),
            Err(path) => sink.emit(Diagnostic::warning(
                DiagnosticKind::NonUtf8Path,
                format!("Skipping non-UTF-8 path: {}", path.display()),
            )),
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Every `*.nii.gz` below `<subject>/unprocessed`, in path order.
pub fn discover_images(subject_dir: &Utf8Path, sink: &dyn DiagnosticSink) -> Vec<Utf8PathBuf> {
    let root = subject_dir.join(UNPROCESSED_DIR);
    let mut images = Vec::new();
    for entry in WalkDir::new(&root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
    {
        match Utf8PathBuf::from_path_buf(entry.into_path()) {
            Ok(path) if path.as_str().ends_with(IMAGE_EXTENSION) => images.push(path),
            Ok(_) => {}
            Err(path) => sink.emit(Diagnostic::warning(
                DiagnosticKind::NonUtf8Path,
                format!("Skipping non-UTF-8 path: {}", path.display()),
            )),
        }
    }
    images.sort();
    images
}
