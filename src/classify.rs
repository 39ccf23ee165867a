use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::codec;
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::domain::{
    BidsFolder, EntityKey, EntitySet, Modality, PhaseEncodingDirection, SubjectId,
};
use crate::error::ConvertError;

const OTHER_FILES_DIR: &str = "OTHER_FILES";
const BIAS_MARKER: &str = "BIAS";
const SBREF_MARKER: &str = "SBRef";

#[derive(Debug, Clone)]
pub struct ClassifierOptions {
    pub directions: Vec<PhaseEncodingDirection>,
    pub skip: Vec<String>,
    pub skip_bias: bool,
    pub t1w_use_derived: bool,
    pub t2w_use_derived: bool,
    pub grad_unwarp: bool,
    pub use_bids_uris: bool,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            directions: Vec::new(),
            skip: Vec::new(),
            skip_bias: true,
            t1w_use_derived: false,
            t2w_use_derived: false,
            grad_unwarp: false,
            use_bids_uris: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawFile {
    pub path: Utf8PathBuf,
    pub subject: SubjectId,
    pub subject_dir: Utf8PathBuf,
}

impl RawFile {
    pub fn new(subject_dir: &Utf8Path, path: Utf8PathBuf) -> Result<Self, ConvertError> {
        let folder_name = subject_dir.file_name().unwrap_or_default();
        Ok(Self {
            subject: SubjectId::from_folder_name(folder_name)?,
            subject_dir: subject_dir.to_path_buf(),
            path,
        })
    }

    /// The path below the subject folder; classification markers are searched here.
    pub fn lineage(&self) -> &str {
        self.path
            .strip_prefix(&self.subject_dir)
            .map(Utf8Path::as_str)
            .unwrap_or(self.path.as_str())
    }

    pub fn basename(&self) -> &str {
        self.path.file_name().unwrap_or_default()
    }

    pub fn parent_name(&self) -> &str {
        self.path
            .parent()
            .and_then(Utf8Path::file_name)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationResult {
    pub modality: Modality,
    pub folder: BidsFolder,
    pub entities: EntitySet,
    pub source: Utf8PathBuf,
    pub intended_for: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    OtherFiles,
    BiasField,
    SkipList(String),
    UnknownModality,
    InvalidEntity(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Accepted(ClassificationResult),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Redirect {
    DerivedT1w,
    DerivedT2w,
    GradientUnwarp,
}

#[derive(Debug, Clone)]
struct RuleMatch {
    modality: Modality,
    entities: Vec<(EntityKey, String)>,
    redirect: Option<Redirect>,
}

impl RuleMatch {
    fn new(modality: Modality) -> Self {
        Self {
            modality,
            entities: Vec::new(),
            redirect: None,
        }
    }

    fn entity(mut self, key: EntityKey, value: impl Into<String>) -> Self {
        self.entities.push((key, value.into()));
        self
    }

    fn redirect(mut self, redirect: Redirect) -> Self {
        self.redirect = Some(redirect);
        self
    }
}

struct Rule {
    marker: &'static str,
    apply: fn(&RawFile) -> RuleMatch,
}

/// Checked top to bottom; a path carrying several markers takes the first one listed.
const RULES: &[Rule] = &[
    Rule {
        marker: "SpinEchoFieldMap",
        apply: spin_echo_rule,
    },
    Rule {
        marker: "T1w",
        apply: t1w_rule,
    },
    Rule {
        marker: "T2w",
        apply: t2w_rule,
    },
    Rule {
        marker: "fMRI",
        apply: functional_rule,
    },
    Rule {
        marker: "Diffusion",
        apply: diffusion_rule,
    },
    Rule {
        marker: "PCASL",
        apply: asl_rule,
    },
];

fn spin_echo_rule(raw: &RawFile) -> RuleMatch {
    let parent = raw.parent_name().to_lowercase();
    let run = match parent.split_once('_') {
        Some((_, rest)) => rest.split('_').collect::<String>(),
        None => parent,
    };
    RuleMatch::new(Modality::Epi).entity(EntityKey::Run, run)
}

fn t1w_rule(_: &RawFile) -> RuleMatch {
    RuleMatch::new(Modality::T1w).redirect(Redirect::DerivedT1w)
}

fn t2w_rule(_: &RawFile) -> RuleMatch {
    RuleMatch::new(Modality::T2w).redirect(Redirect::DerivedT2w)
}

fn functional_rule(raw: &RawFile) -> RuleMatch {
    let parent = raw.parent_name();
    let task = parent.split('_').nth(1).unwrap_or(parent).to_lowercase();
    let mut rule = RuleMatch::new(Modality::Bold).redirect(Redirect::GradientUnwarp);
    let (task, run) = split_rest_run(task);
    if let Some(run) = run {
        rule = rule.entity(EntityKey::Run, run);
    }
    rule.entity(EntityKey::Task, task)
}

fn diffusion_rule(raw: &RawFile) -> RuleMatch {
    let lineage = raw.lineage();
    // The 98-direction scheme is acquired before the 99-direction one.
    let rule = RuleMatch::new(Modality::Dwi);
    if lineage.contains("dir98") {
        rule.entity(EntityKey::Run, "1")
    } else if lineage.contains("dir99") {
        rule.entity(EntityKey::Run, "2")
    } else {
        rule
    }
}

fn asl_rule(_: &RawFile) -> RuleMatch {
    RuleMatch::new(Modality::Asl)
}

/// `rest1a` becomes task `rest` with run `1a`.
fn split_rest_run(task: String) -> (String, Option<String>) {
    match task.split_once("rest") {
        Some((_, run)) => {
            let run = (!run.is_empty()).then(|| run.to_string());
            ("rest".to_string(), run)
        }
        None => (task, None),
    }
}

pub fn detect_direction<'a>(
    basename: &str,
    directions: &'a [PhaseEncodingDirection],
) -> Option<&'a PhaseEncodingDirection> {
    directions
        .iter()
        .find(|direction| basename.contains(&format!("_{}", direction.as_str())))
}

pub struct Classifier {
    options: ClassifierOptions,
}

impl Classifier {
    pub fn new(options: ClassifierOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ClassifierOptions {
        &self.options
    }

    pub fn classify(
        &self,
        raw: &RawFile,
        sink: &dyn DiagnosticSink,
    ) -> Result<Classification, ConvertError> {
        if let Some(reason) = self.exclusion(raw) {
            return Ok(Classification::Skipped(reason));
        }

        let Some(rule) = RULES.iter().find(|rule| raw.lineage().contains(rule.marker)) else {
            return Ok(Classification::Skipped(SkipReason::UnknownModality));
        };
        let matched = (rule.apply)(raw);

        let mut entities = EntitySet::new();
        if let Some(direction) = detect_direction(raw.basename(), &self.options.directions) {
            entities.insert(EntityKey::Direction, direction.as_str())?;
        }
        for (key, value) in matched.entities {
            if entities.insert(key, value.clone()).is_err() {
                return Ok(Classification::Skipped(SkipReason::InvalidEntity(format!(
                    "{key}-{value}"
                ))));
            }
        }

        let Some(folder) = matched.modality.folder() else {
            return Ok(Classification::Skipped(SkipReason::UnknownModality));
        };
        let source = self.resolve_source(raw, matched.redirect)?;

        let mut modality = matched.modality;
        let mut intended_for = None;
        if modality == Modality::Epi {
            intended_for = self.spin_echo_intended_for(raw, sink);
        }
        if raw.basename().contains(SBREF_MARKER) {
            intended_for = Some(codec::intended_for(
                &raw.subject,
                modality,
                folder,
                &entities,
                self.options.use_bids_uris,
            ));
            modality = Modality::Sbref;
        }

        Ok(Classification::Accepted(ClassificationResult {
            modality,
            folder,
            entities,
            source,
            intended_for,
        }))
    }

    fn exclusion(&self, raw: &RawFile) -> Option<SkipReason> {
        let in_other_files = raw
            .path
            .parent()
            .map(|parent| parent.as_str().ends_with(OTHER_FILES_DIR))
            .unwrap_or(false);
        if in_other_files {
            return Some(SkipReason::OtherFiles);
        }
        if self.options.skip_bias && raw.lineage().contains(BIAS_MARKER) {
            return Some(SkipReason::BiasField);
        }
        self.options
            .skip
            .iter()
            .find(|pattern| raw.path.as_str().contains(pattern.as_str()))
            .map(|pattern| SkipReason::SkipList(pattern.clone()))
    }

    fn resolve_source(
        &self,
        raw: &RawFile,
        redirect: Option<Redirect>,
    ) -> Result<Utf8PathBuf, ConvertError> {
        let derived = match redirect {
            Some(Redirect::DerivedT1w) if self.options.t1w_use_derived => {
                raw.subject_dir.join("T1w").join("T1w_acpc_dc.nii.gz")
            }
            Some(Redirect::DerivedT2w) if self.options.t2w_use_derived => {
                raw.subject_dir.join("T1w").join("T2w_acpc_dc.nii.gz")
            }
            Some(Redirect::GradientUnwarp) if self.options.grad_unwarp => {
                Utf8PathBuf::from(raw.path.as_str().replace("unprocessed/3T", "gradunwarp"))
            }
            _ => return Ok(raw.path.clone()),
        };
        if !derived.exists() {
            return Err(ConvertError::MissingDerivedFile(derived.into_std_path_buf()));
        }
        Ok(derived)
    }

    /// Field maps live in the folder of the scan they correct; the folder name names that scan.
    fn spin_echo_intended_for(&self, raw: &RawFile, sink: &dyn DiagnosticSink) -> Option<String> {
        let parent = raw.parent_name();
        let segments: Vec<&str> = parent.split('_').collect();
        let mut entities = EntitySet::new();

        let target = if parent.contains("fMRI") {
            let task = segments.get(1).map(|task| task.to_lowercase());
            let (task, run) = match task {
                Some(task) => split_rest_run(task),
                None => (String::new(), None),
            };
            let inserted = entities
                .insert(EntityKey::Task, task)
                .and_then(|_| match run {
                    Some(run) => entities.insert(EntityKey::Run, run),
                    None => Ok(()),
                })
                .and_then(|_| match segments.get(2) {
                    Some(direction) => entities.insert(EntityKey::Direction, *direction),
                    None => Ok(()),
                });
            inserted.ok().map(|_| (Modality::Bold, BidsFolder::Func))
        } else if parent.contains("PCASL") {
            entities
                .insert(EntityKey::Direction, "PA")
                .ok()
                .map(|_| (Modality::Asl, BidsFolder::Perf))
        } else if parent.contains("T1w") {
            Some((Modality::T1w, BidsFolder::Anat))
        } else if parent.contains("T2w") {
            Some((Modality::T2w, BidsFolder::Anat))
        } else {
            None
        };

        match target {
            Some((modality, folder)) => Some(codec::intended_for(
                &raw.subject,
                modality,
                folder,
                &entities,
                self.options.use_bids_uris,
            )),
            None => {
                sink.emit(
                    Diagnostic::warning(
                        DiagnosticKind::UnknownIntendedFor,
                        format!(
                            "Unknown IntendedFor modality: {parent}. Not setting IntendedFor field for {}",
                            raw.path
                        ),
                    )
                    .at(&raw.path),
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticLog;

    fn raw(relative: &str) -> RawFile {
        let subject_dir = Utf8PathBuf::from("/nda/imagingcollection01/HCA000001_V1_MR");
        let path = subject_dir.join(relative);
        RawFile::new(&subject_dir, path).unwrap()
    }

    fn lifespan() -> Classifier {
        Classifier::new(ClassifierOptions {
            directions: vec!["AP".parse().unwrap(), "PA".parse().unwrap()],
            ..ClassifierOptions::default()
        })
    }

    fn accepted(classification: Classification) -> ClassificationResult {
        match classification {
            Classification::Accepted(result) => result,
            Classification::Skipped(reason) => panic!("unexpectedly skipped: {reason:?}"),
        }
    }

    #[test]
    fn rest_run_is_split_from_task() {
        assert_eq!(
            split_rest_run("rest1a".to_string()),
            ("rest".to_string(), Some("1a".to_string()))
        );
        assert_eq!(split_rest_run("rest".to_string()), ("rest".to_string(), None));
        assert_eq!(split_rest_run("carit".to_string()), ("carit".to_string(), None));
    }

    #[test]
    fn spin_echo_run_from_parent_folder() {
        let log = DiagnosticLog::new();
        let result = accepted(
            lifespan()
                .classify(
                    &raw("unprocessed/tfMRI_CARIT_PA/HCA000001_V1_MR_SpinEchoFieldMap2_AP.nii.gz"),
                    &log,
                )
                .unwrap(),
        );
        assert_eq!(result.modality, Modality::Epi);
        assert_eq!(result.entities.get(EntityKey::Run), Some("caritpa"));
        assert_eq!(result.entities.get(EntityKey::Direction), Some("AP"));
        assert_eq!(
            result.intended_for.as_deref(),
            Some("func/sub-HCA000001_task-carit_dir-PA_bold.nii.gz")
        );
    }

    #[test]
    fn first_configured_direction_wins() {
        let directions: Vec<PhaseEncodingDirection> =
            vec!["AP".parse().unwrap(), "PA".parse().unwrap()];
        let found = detect_direction("x_PA_AP.nii.gz", &directions).unwrap();
        assert_eq!(found.as_str(), "AP");
        assert!(detect_direction("T1w_MPR.nii.gz", &directions).is_none());
    }
}
