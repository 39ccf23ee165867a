use std::cmp::Ordering;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveTime;
use serde::Serialize;

use crate::codec::{self, BidsName, IMAGE_EXTENSION, SIDECAR_EXTENSION};
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::domain::{BidsFolder, EntityKey, Modality, PhaseEncodingDirection};
use crate::error::ConvertError;
use crate::sidecar;
use crate::transfer::FileOps;

const STAGING_SUFFIX: &str = ".renaming";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOrder {
    AcquisitionTime,
    Name,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenameRecord {
    pub from: String,
    pub to: String,
}

pub struct RunDisambiguator<'a> {
    directions: &'a [PhaseEncodingDirection],
    order: RunOrder,
}

#[derive(Debug)]
struct FieldMap {
    path: Utf8PathBuf,
    name: BidsName,
}

impl<'a> RunDisambiguator<'a> {
    pub fn new(directions: &'a [PhaseEncodingDirection], order: RunOrder) -> Self {
        Self { directions, order }
    }

    pub fn fix_epi_runs(
        &self,
        bids_dir: &Utf8Path,
        fs: &dyn FileOps,
        sink: &dyn DiagnosticSink,
    ) -> Result<Vec<RenameRecord>, ConvertError> {
        let mut records = Vec::new();
        for fmap_dir in fmap_dirs(bids_dir)? {
            for direction in self.directions {
                let maps = field_maps(&fmap_dir, direction, sink)?;
                let targets = self.targets(&maps)?;
                let pairs: Vec<(Utf8PathBuf, Utf8PathBuf)> = maps
                    .iter()
                    .zip(targets)
                    .filter(|(map, target)| map.path.file_name() != Some(target.as_str()))
                    .map(|(map, target)| (map.path.clone(), fmap_dir.join(target)))
                    .collect();
                records.extend(rename_all(&pairs, fs, sink)?);
            }
        }
        Ok(records)
    }

    fn targets(&self, maps: &[FieldMap]) -> Result<Vec<String>, ConvertError> {
        if let [single] = maps {
            return Ok(vec![single.name.clone().with_run(None)?.file_name()]);
        }
        let mut order: Vec<usize> = (0..maps.len()).collect();
        match self.order {
            RunOrder::AcquisitionTime => {
                let times = maps
                    .iter()
                    .map(|map| sidecar::acquisition_time(&map.path))
                    .collect::<Result<Vec<NaiveTime>, _>>()?;
                order.sort_by(|&left, &right| times[left].cmp(&times[right]));
            }
            RunOrder::Name => {
                order.sort_by(|&left, &right| compare_run_labels(&maps[left], &maps[right]));
            }
        }
        let mut targets = vec![String::new(); maps.len()];
        for (position, index) in order.into_iter().enumerate() {
            let run = format!("{:02}", position + 1);
            targets[index] = maps[index].name.clone().with_run(Some(run))?.file_name();
        }
        Ok(targets)
    }
}

fn compare_run_labels(left: &FieldMap, right: &FieldMap) -> Ordering {
    let label = |map: &FieldMap| map.name.entities.get(EntityKey::Run).unwrap_or("").to_string();
    label(left).cmp(&label(right))
}

fn fmap_dirs(bids_dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, ConvertError> {
    let pattern = format!(
        "{}/sub-*/{}",
        glob::Pattern::escape(bids_dir.as_str()),
        BidsFolder::Fmap.as_str()
    );
    let paths = glob::glob(&pattern).map_err(|err| ConvertError::InvalidPattern {
        pattern: pattern.clone(),
        message: err.to_string(),
    })?;
    let mut dirs: Vec<Utf8PathBuf> = paths
        .filter_map(Result::ok)
        .filter(|path| path.is_dir())
        .filter_map(|path| Utf8PathBuf::from_path_buf(path).ok())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn field_maps(
    fmap_dir: &Utf8Path,
    direction: &PhaseEncodingDirection,
    sink: &dyn DiagnosticSink,
) -> Result<Vec<FieldMap>, ConvertError> {
    let entries = fmap_dir
        .read_dir_utf8()
        .map_err(|err| ConvertError::Filesystem(format!("read {fmap_dir}: {err}")))?;
    let mut maps = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| ConvertError::Filesystem(err.to_string()))?;
        let staged = staged_name(entry.file_name());
        let Some(name) = BidsName::parse(staged.as_deref().unwrap_or(entry.file_name())) else {
            continue;
        };
        let matches = name.modality == Modality::Epi
            && name.extension == IMAGE_EXTENSION
            && name.entities.get(EntityKey::Direction) == Some(direction.as_str());
        if matches {
            if staged.is_some() {
                sink.emit(
                    Diagnostic::warning(
                        DiagnosticKind::Rename,
                        format!(
                            "Recovering field map left from an interrupted rename: {}",
                            entry.path()
                        ),
                    )
                    .at(entry.path()),
                );
            }
            maps.push(FieldMap {
                path: entry.path().to_path_buf(),
                name,
            });
        }
    }
    maps.sort_by(|left, right| left.path.cmp(&right.path));
    Ok(maps)
}

/// When a target is another map's current name every pair is first moved to a
/// hidden staging name, which `field_maps` picks up again if a later rename fails.
fn rename_all(
    pairs: &[(Utf8PathBuf, Utf8PathBuf)],
    fs: &dyn FileOps,
    sink: &dyn DiagnosticSink,
) -> Result<Vec<RenameRecord>, ConvertError> {
    let collides = pairs
        .iter()
        .any(|(_, target)| pairs.iter().any(|(source, _)| source == target));

    let mut records = Vec::new();
    let mut staged = Vec::new();
    for (source, target) in pairs {
        sink.emit(
            Diagnostic::info(
                DiagnosticKind::Rename,
                format!("Renaming {source} to {target}"),
            )
            .at(target),
        );
        records.push(RenameRecord {
            from: source.to_string(),
            to: target.to_string(),
        });
        let from = if collides {
            let staging = staging_path(source);
            move_with_sidecar(source, &staging, fs, sink)?;
            staging
        } else {
            source.clone()
        };
        staged.push((from, target));
    }
    for (from, target) in staged {
        move_with_sidecar(&from, target, fs, sink)?;
    }
    Ok(records)
}

/// `.{stem}.renaming.nii.gz` -> `{stem}.nii.gz`.
fn staged_name(file_name: &str) -> Option<String> {
    let stem = file_name
        .strip_prefix('.')?
        .strip_suffix(IMAGE_EXTENSION)?
        .strip_suffix(STAGING_SUFFIX)?;
    Some(format!("{stem}{IMAGE_EXTENSION}"))
}

fn staging_path(path: &Utf8Path) -> Utf8PathBuf {
    let name = path.file_name().unwrap_or_default();
    let stem = codec::stem(name);
    path.with_file_name(format!(".{stem}{STAGING_SUFFIX}{IMAGE_EXTENSION}"))
}

fn move_with_sidecar(
    image: &Utf8Path,
    target: &Utf8Path,
    fs: &dyn FileOps,
    sink: &dyn DiagnosticSink,
) -> Result<(), ConvertError> {
    fs.rename(image, target)?;
    let sidecar = codec::swap_extension(image, SIDECAR_EXTENSION);
    if sidecar.exists() {
        fs.rename(&sidecar, &codec::swap_extension(target, SIDECAR_EXTENSION))?;
    } else {
        sink.emit(
            Diagnostic::debug(
                DiagnosticKind::MissingSidecar,
                format!("No sidecar to rename alongside {image}"),
            )
            .at(image),
        );
    }
    Ok(())
}
