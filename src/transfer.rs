use std::fs;
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::companions;
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::domain::{ExistsPolicy, TransferMethod};
use crate::error::ConvertError;
use crate::sidecar;

/// Filesystem mutations the converter performs. Reads go straight to `std::fs`.
pub trait FileOps {
    fn hard_link(&self, source: &Utf8Path, destination: &Utf8Path) -> Result<(), ConvertError>;
    fn symlink(&self, source: &Utf8Path, destination: &Utf8Path) -> Result<(), ConvertError>;
    fn copy(&self, source: &Utf8Path, destination: &Utf8Path) -> Result<(), ConvertError>;
    fn rename(&self, source: &Utf8Path, destination: &Utf8Path) -> Result<(), ConvertError>;
    fn remove_file(&self, path: &Utf8Path) -> Result<(), ConvertError>;
    fn create_dir_all(&self, path: &Utf8Path) -> Result<(), ConvertError>;
    fn write(&self, path: &Utf8Path, contents: &[u8]) -> Result<(), ConvertError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl FileOps for LocalFs {
    fn hard_link(&self, source: &Utf8Path, destination: &Utf8Path) -> Result<(), ConvertError> {
        fs::hard_link(source, destination)
            .map_err(|err| fs_error("hardlink", source, destination, err))
    }

    fn symlink(&self, source: &Utf8Path, destination: &Utf8Path) -> Result<(), ConvertError> {
        let target = fs::canonicalize(source)
            .map_err(|err| ConvertError::Filesystem(format!("resolve {source}: {err}")))?;
        symlink_file(&target, destination.as_std_path())
            .map_err(|err| fs_error("symlink", source, destination, err))
    }

    fn copy(&self, source: &Utf8Path, destination: &Utf8Path) -> Result<(), ConvertError> {
        let parent = destination
            .parent()
            .ok_or_else(|| ConvertError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent).map_err(|err| ConvertError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix(".hcp2bids-file")
            .tempfile_in(parent)
            .map_err(|err| ConvertError::Filesystem(err.to_string()))?;
        fs::copy(source, temp.path()).map_err(|err| fs_error("copy", source, destination, err))?;
        temp.persist(destination)
            .map_err(|err| ConvertError::Filesystem(err.to_string()))?;
        Ok(())
    }

    fn rename(&self, source: &Utf8Path, destination: &Utf8Path) -> Result<(), ConvertError> {
        match fs::rename(source, destination) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
                self.copy(source, destination)?;
                self.remove_file(source)
            }
            Err(err) => Err(fs_error("move", source, destination, err)),
        }
    }

    fn remove_file(&self, path: &Utf8Path) -> Result<(), ConvertError> {
        fs::remove_file(path).map_err(|err| ConvertError::Filesystem(format!("remove {path}: {err}")))
    }

    fn create_dir_all(&self, path: &Utf8Path) -> Result<(), ConvertError> {
        fs::create_dir_all(path)
            .map_err(|err| ConvertError::Filesystem(format!("create {path}: {err}")))
    }

    fn write(&self, path: &Utf8Path, contents: &[u8]) -> Result<(), ConvertError> {
        let parent = path
            .parent()
            .ok_or_else(|| ConvertError::Filesystem("invalid destination path".to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".hcp2bids-file")
            .tempfile_in(parent)
            .map_err(|err| ConvertError::Filesystem(err.to_string()))?;
        temp.write_all(contents)
            .map_err(|err| ConvertError::Filesystem(err.to_string()))?;
        temp.persist(path)
            .map_err(|err| ConvertError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

#[cfg(unix)]
fn symlink_file(target: &std::path::Path, link: &std::path::Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_file(target: &std::path::Path, link: &std::path::Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

fn fs_error(verb: &str, source: &Utf8Path, destination: &Utf8Path, err: io::Error) -> ConvertError {
    ConvertError::Filesystem(format!("{verb} {source} -> {destination}: {err}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanionKind {
    Image,
    Sidecar,
    Bval,
    Bvec,
    Physio,
    PhysioLog,
    PhysioSidecar,
    EyeTracking,
    Events,
}

/// How a planned file reaches its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Method(TransferMethod),
    /// Sidecars are edited after placement, so they are never linked to the source.
    CopySidecar,
    Transcode,
    Generate,
}

impl Action {
    fn verb(self) -> &'static str {
        match self {
            Action::Method(TransferMethod::Hardlink) => "Creating hardlink",
            Action::Method(TransferMethod::Symlink) => "Creating symlink",
            Action::Method(TransferMethod::Copy) | Action::CopySidecar => "Copying file",
            Action::Method(TransferMethod::Move) => "Moving file",
            Action::Transcode => "Transcoding file",
            Action::Generate => "Generating file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedFile {
    pub kind: CompanionKind,
    /// `None` when the file is generated from the built-in physio template.
    pub source: Option<Utf8PathBuf>,
    pub destination: Utf8PathBuf,
}

impl PlannedFile {
    pub fn new(kind: CompanionKind, source: Utf8PathBuf, destination: Utf8PathBuf) -> Self {
        Self::generated(kind, Some(source), destination)
    }

    pub fn generated(
        kind: CompanionKind,
        source: Option<Utf8PathBuf>,
        destination: Utf8PathBuf,
    ) -> Self {
        Self {
            kind,
            source,
            destination,
        }
    }

    fn describe_source(&self) -> String {
        match &self.source {
            Some(source) => source.to_string(),
            None => "built-in template".to_string(),
        }
    }
}

/// Every file belonging to one acquisition; the image always comes first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferPlan {
    pub files: Vec<PlannedFile>,
}

impl TransferPlan {
    pub fn new(image: PlannedFile) -> Self {
        Self { files: vec![image] }
    }

    pub fn push(&mut self, file: PlannedFile) {
        self.files.push(file);
    }

    pub fn image(&self) -> &PlannedFile {
        &self.files[0]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferRecord {
    pub kind: CompanionKind,
    pub action: Action,
    pub source: Option<String>,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    Transferred(Vec<TransferRecord>),
    SkippedExisting,
}

pub struct Transferer<'a> {
    fs: &'a dyn FileOps,
    method: TransferMethod,
    policy: ExistsPolicy,
    dry_run: bool,
}

impl<'a> Transferer<'a> {
    pub fn new(
        fs: &'a dyn FileOps,
        method: TransferMethod,
        policy: ExistsPolicy,
        dry_run: bool,
    ) -> Self {
        Self {
            fs,
            method,
            policy,
            dry_run,
        }
    }

    pub fn action_for(&self, kind: CompanionKind) -> Action {
        match kind {
            CompanionKind::Sidecar => Action::CopySidecar,
            CompanionKind::PhysioLog => Action::Transcode,
            CompanionKind::PhysioSidecar | CompanionKind::Events => Action::Generate,
            _ => Action::Method(self.method),
        }
    }

    pub fn execute(
        &self,
        plan: &TransferPlan,
        sink: &dyn DiagnosticSink,
    ) -> Result<PlanOutcome, ConvertError> {
        let image = plan.image();
        let mut cleared = false;
        if image.destination.exists() {
            match self.policy {
                ExistsPolicy::Skip => {
                    sink.emit(
                        Diagnostic::warning(
                            DiagnosticKind::DestinationExists,
                            format!("File already exists: {}", image.destination),
                        )
                        .at(&image.destination),
                    );
                    return Ok(PlanOutcome::SkippedExisting);
                }
                ExistsPolicy::Fail => {
                    return Err(ConvertError::DestinationExists(
                        image.destination.clone().into_std_path_buf(),
                    ));
                }
                ExistsPolicy::Overwrite => {
                    sink.emit(
                        Diagnostic::info(
                            DiagnosticKind::Overwrite,
                            format!("Overwriting file: {}", image.destination),
                        )
                        .at(&image.destination),
                    );
                    if !self.dry_run {
                        for file in &plan.files {
                            if file.destination.exists() {
                                self.fs.remove_file(&file.destination)?;
                            }
                        }
                    }
                    cleared = true;
                }
            }
        }

        if !self.dry_run
            && let Some(parent) = image.destination.parent()
        {
            self.fs.create_dir_all(parent)?;
        }

        let mut records = Vec::new();
        for file in &plan.files {
            if file.kind != CompanionKind::Image && !cleared && file.destination.exists() {
                sink.emit(
                    Diagnostic::warning(
                        DiagnosticKind::DestinationExists,
                        format!("Companion already exists, leaving it in place: {}", file.destination),
                    )
                    .at(&file.destination),
                );
                continue;
            }
            let action = self.action_for(file.kind);
            sink.emit(
                Diagnostic::info(
                    DiagnosticKind::Transfer,
                    format!(
                        "{}: {} --> {}",
                        action.verb(),
                        file.describe_source(),
                        file.destination
                    ),
                )
                .at(&file.destination),
            );
            if file.kind == CompanionKind::Events {
                sink.emit(
                    Diagnostic::info(
                        DiagnosticKind::EventsMerged,
                        format!("Combining events files into {}", file.destination),
                    )
                    .at(&file.destination),
                );
            }
            if !self.dry_run {
                self.perform(action, file, sink)?;
            }
            records.push(TransferRecord {
                kind: file.kind,
                action,
                source: file.source.as_ref().map(ToString::to_string),
                destination: file.destination.to_string(),
            });
        }
        Ok(PlanOutcome::Transferred(records))
    }

    fn perform(
        &self,
        action: Action,
        file: &PlannedFile,
        sink: &dyn DiagnosticSink,
    ) -> Result<(), ConvertError> {
        let destination = file.destination.as_path();
        if file.kind == CompanionKind::PhysioSidecar {
            let template = sidecar::physio_template(file.source.as_deref())?;
            return self.fs.write(destination, &sidecar::to_json_bytes(&template)?);
        }
        let source = file.source.as_deref().ok_or_else(|| {
            ConvertError::Filesystem(format!("no source planned for {destination}"))
        })?;
        match action {
            Action::Method(TransferMethod::Hardlink) => self.fs.hard_link(source, destination),
            Action::Method(TransferMethod::Symlink) => self.fs.symlink(source, destination),
            Action::Method(TransferMethod::Copy) | Action::CopySidecar => {
                self.fs.copy(source, destination)
            }
            Action::Method(TransferMethod::Move) => self.fs.rename(source, destination),
            Action::Transcode => {
                let contents = companions::transcode_physio(source)?;
                self.fs.write(destination, &contents)
            }
            Action::Generate => {
                let table = companions::merge_events(source, sink)?;
                self.fs.write(destination, table.as_bytes())
            }
        }
    }
}
