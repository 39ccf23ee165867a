use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::write::GzEncoder;

use crate::classify::{ClassificationResult, RawFile};
use crate::codec::{self, IMAGE_EXTENSION, SIDECAR_EXTENSION};
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::domain::{EntityKey, EntitySet, Modality};
use crate::error::ConvertError;
use crate::sidecar;
use crate::transfer::{CompanionKind, PlannedFile, TransferPlan};

const LINKED_DATA: &str = "LINKED_DATA";
const EVENT_DIRS: &[&str] = &["PSYCHOPY", "EPRIME"];
const SYNC_FILE: &str = "Sync.txt";
pub const EVENTS_HEADER: &str = "onset\tduration\tvalue\ttrial_type";

pub struct PlanBuilder<'a> {
    bids_dir: &'a Utf8Path,
    sidecar_library: Option<&'a Utf8Path>,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(bids_dir: &'a Utf8Path, sidecar_library: Option<&'a Utf8Path>) -> Self {
        Self {
            bids_dir,
            sidecar_library,
        }
    }

    pub fn build(
        &self,
        raw: &RawFile,
        result: &ClassificationResult,
        sink: &dyn DiagnosticSink,
    ) -> TransferPlan {
        let image = self.target(raw, result, result.modality, &result.entities, IMAGE_EXTENSION);
        let mut plan = TransferPlan::new(PlannedFile::new(
            CompanionKind::Image,
            result.source.clone(),
            image.clone(),
        ));

        let sidecar_source = match self.sidecar_library {
            Some(library) => {
                sidecar::template_sidecar(library, image.file_name().unwrap_or_default())
            }
            None => Some(codec::swap_extension(&result.source, SIDECAR_EXTENSION)),
        };
        match sidecar_source.filter(|path| path.exists()) {
            Some(source) => plan.push(PlannedFile::new(
                CompanionKind::Sidecar,
                source,
                codec::swap_extension(&image, SIDECAR_EXTENSION),
            )),
            None => sink.emit(
                Diagnostic::warning(
                    DiagnosticKind::MissingSidecar,
                    format!("JSON sidecar file does not exist for {}", result.source),
                )
                .at(&result.source),
            ),
        }

        match result.modality {
            Modality::Dwi => {
                for (kind, extension) in [(CompanionKind::Bval, ".bval"), (CompanionKind::Bvec, ".bvec")] {
                    let source = codec::swap_extension(&result.source, extension);
                    if source.exists() {
                        plan.push(PlannedFile::new(
                            kind,
                            source,
                            codec::swap_extension(&image, extension),
                        ));
                    } else {
                        sink.emit(
                            Diagnostic::warning(
                                DiagnosticKind::MissingCompanion,
                                format!("Gradient file does not exist: {source}"),
                            )
                            .at(&source),
                        );
                    }
                }
            }
            Modality::Bold => {
                let Some(raw_dir) = raw.path.parent() else {
                    return plan;
                };
                self.add_physio(&mut plan, raw, raw_dir, result, sink);
                self.add_eye_tracking(&mut plan, raw, raw_dir, result, sink);
                add_events(&mut plan, raw_dir, &image);
            }
            _ => {}
        }
        plan
    }

    fn target(
        &self,
        raw: &RawFile,
        result: &ClassificationResult,
        modality: Modality,
        entities: &EntitySet,
        extension: &str,
    ) -> Utf8PathBuf {
        codec::output_path(
            self.bids_dir,
            &raw.subject,
            modality,
            result.folder,
            entities,
            extension,
        )
    }

    fn add_physio(
        &self,
        plan: &mut TransferPlan,
        raw: &RawFile,
        raw_dir: &Utf8Path,
        result: &ClassificationResult,
        sink: &dyn DiagnosticSink,
    ) {
        let physio_dir = raw_dir.join(LINKED_DATA).join("PHYSIO");
        let mut candidates = glob_files(&physio_dir, "*.csv");
        candidates.extend(glob_files(&physio_dir, "*.txt"));
        candidates.extend(glob_files(raw_dir, "*_Physio_log.txt"));

        let source = match candidates.as_slice() {
            [] => return,
            [single] => single.clone(),
            many => {
                sink.emit(
                    Diagnostic::warning(
                        DiagnosticKind::AmbiguousCompanion,
                        format!(
                            "Found {} physiological recordings for {}, skipping them",
                            many.len(),
                            result.source
                        ),
                    )
                    .at(raw_dir),
                );
                return;
            }
        };

        if source.extension() == Some("csv") {
            let target = self.target(raw, result, Modality::Physio, &result.entities, ".csv");
            plan.push(PlannedFile::new(CompanionKind::Physio, source, target));
        } else {
            let target = self.target(raw, result, Modality::Physio, &result.entities, ".tsv.gz");
            let json = codec::swap_extension(&target, SIDECAR_EXTENSION);
            let template = sidecar::physio_template_path(self.sidecar_library);
            plan.push(PlannedFile::new(CompanionKind::PhysioLog, source, target));
            plan.push(PlannedFile::generated(CompanionKind::PhysioSidecar, template, json));
        }
    }

    fn add_eye_tracking(
        &self,
        plan: &mut TransferPlan,
        raw: &RawFile,
        raw_dir: &Utf8Path,
        result: &ClassificationResult,
        sink: &dyn DiagnosticSink,
    ) {
        let videos = glob_files(&raw_dir.join(LINKED_DATA).join("PSYCHOPY"), "*.mp4");
        match videos.as_slice() {
            [] => {}
            [video] => {
                let mut entities = result.entities.clone();
                if entities.insert(EntityKey::Recording, "eyetracking").is_ok() {
                    let target = self.target(raw, result, Modality::Physio, &entities, ".mp4");
                    plan.push(PlannedFile::new(CompanionKind::EyeTracking, video.clone(), target));
                }
            }
            many => sink.emit(
                Diagnostic::warning(
                    DiagnosticKind::AmbiguousCompanion,
                    format!(
                        "Found {} eye-tracking videos for {}, skipping them",
                        many.len(),
                        result.source
                    ),
                )
                .at(raw_dir),
            ),
        }
    }
}

fn add_events(plan: &mut TransferPlan, raw_dir: &Utf8Path, image: &Utf8Path) {
    let events_dir = EVENT_DIRS
        .iter()
        .map(|name| raw_dir.join(LINKED_DATA).join(name).join("EVs"))
        .find(|dir| !event_files(dir).is_empty());
    if let Some(dir) = events_dir {
        let name = image.file_name().unwrap_or_default();
        let stem = codec::stem(name);
        let prefix = stem.strip_suffix(Modality::Bold.suffix()).unwrap_or(stem);
        let target = image.with_file_name(format!("{prefix}{}.tsv", Modality::Events.suffix()));
        plan.push(PlannedFile::new(CompanionKind::Events, dir, target));
    }
}

/// Sorted files in `dir` matching `pattern`; the directory part is matched literally.
fn glob_files(dir: &Utf8Path, pattern: &str) -> Vec<Utf8PathBuf> {
    let full = format!("{}/{pattern}", glob::Pattern::escape(dir.as_str()));
    let Ok(paths) = glob::glob(&full) else {
        return Vec::new();
    };
    let mut files: Vec<Utf8PathBuf> = paths
        .filter_map(Result::ok)
        .filter(|path| path.is_file())
        .filter_map(|path| Utf8PathBuf::from_path_buf(path).ok())
        .collect();
    files.sort();
    files
}

fn event_files(dir: &Utf8Path) -> Vec<Utf8PathBuf> {
    glob_files(dir, "*.txt")
        .into_iter()
        .filter(|path| path.file_name() != Some(SYNC_FILE))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
struct EventRow {
    onset: f64,
    columns: [String; 3],
    trial_type: String,
}

/// The file stem becomes the trial type. Ties in onset keep file order.
pub fn merge_events(dir: &Utf8Path, sink: &dyn DiagnosticSink) -> Result<String, ConvertError> {
    let mut rows = Vec::new();
    for path in event_files(dir) {
        let content = fs::read_to_string(&path)
            .map_err(|err| ConvertError::Filesystem(format!("read {path}: {err}")))?;
        if content.trim().is_empty() {
            continue;
        }
        let trial_type = path.file_stem().unwrap_or_default().to_string();
        for (index, line) in content.lines().enumerate() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            let onset = fields.first().and_then(|value| value.parse::<f64>().ok());
            match (onset, fields.as_slice()) {
                (Some(onset), [first, second, third, ..]) => rows.push(EventRow {
                    onset,
                    columns: [first.to_string(), second.to_string(), third.to_string()],
                    trial_type: trial_type.clone(),
                }),
                _ => sink.emit(
                    Diagnostic::warning(
                        DiagnosticKind::MalformedEvent,
                        format!("Skipping malformed event on line {} of {path}", index + 1),
                    )
                    .at(&path),
                ),
            }
        }
    }
    rows.sort_by(|left, right| left.onset.total_cmp(&right.onset));

    let mut table = String::from(EVENTS_HEADER);
    table.push('\n');
    for row in rows {
        let [onset, duration, value] = row.columns;
        table.push_str(&format!("{onset}\t{duration}\t{value}\t{}\n", row.trial_type));
    }
    Ok(table)
}

/// Whitespace-separated physiological log -> gzip-compressed TSV.
pub fn transcode_physio(source: &Utf8Path) -> Result<Vec<u8>, ConvertError> {
    let content = fs::read_to_string(source)
        .map_err(|err| ConvertError::Filesystem(format!("read {source}: {err}")))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        writeln!(encoder, "{}", fields.join("\t"))
            .map_err(|err| ConvertError::Filesystem(err.to_string()))?;
    }
    encoder
        .finish()
        .map_err(|err| ConvertError::Filesystem(err.to_string()))
}
