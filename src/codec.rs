use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::domain::{BidsFolder, EntityKey, EntitySet, Modality, SubjectId, normalize_run};

pub const IMAGE_EXTENSION: &str = ".nii.gz";
pub const SIDECAR_EXTENSION: &str = ".json";

const COMPOUND_EXTENSIONS: &[&str] = &[".nii.gz", ".tsv.gz"];

static ENTITY_PATTERNS: LazyLock<Vec<(EntityKey, Regex)>> = LazyLock::new(|| {
    EntityKey::ALL
        .into_iter()
        .map(|key| {
            let pattern = format!(r"(?:^|_){}-([a-zA-Z0-9]+)_", key.as_str());
            let regex = Regex::new(&pattern).expect("entity pattern is a valid regex");
            (key, regex)
        })
        .collect()
});

pub fn file_name(
    subject: &SubjectId,
    modality: Modality,
    entities: &EntitySet,
    extension: &str,
) -> String {
    let mut parts = vec![format!("sub-{subject}")];
    for (key, value) in entities.iter() {
        let value = match key {
            EntityKey::Run => normalize_run(value),
            _ => value,
        };
        parts.push(format!("{key}-{value}"));
    }
    parts.push(modality.suffix().to_string());
    format!("{}{extension}", parts.join("_"))
}

pub fn relative_path(
    subject: &SubjectId,
    modality: Modality,
    folder: BidsFolder,
    entities: &EntitySet,
    extension: &str,
) -> Utf8PathBuf {
    Utf8PathBuf::from(folder.as_str()).join(file_name(subject, modality, entities, extension))
}

pub fn output_path(
    bids_dir: &Utf8Path,
    subject: &SubjectId,
    modality: Modality,
    folder: BidsFolder,
    entities: &EntitySet,
    extension: &str,
) -> Utf8PathBuf {
    bids_dir
        .join(format!("sub-{subject}"))
        .join(relative_path(subject, modality, folder, entities, extension))
}

pub fn intended_for(
    subject: &SubjectId,
    modality: Modality,
    folder: BidsFolder,
    entities: &EntitySet,
    bids_uris: bool,
) -> String {
    let relative = relative_path(subject, modality, folder, entities, IMAGE_EXTENSION);
    if bids_uris {
        format!("bids::sub-{subject}/{relative}")
    } else {
        relative.into_string()
    }
}

/// Finds `<key>-<value>_` anywhere in `name`.
pub fn extract_entity(name: &str, key: EntityKey) -> Option<String> {
    ENTITY_PATTERNS
        .iter()
        .find(|(candidate, _)| *candidate == key)
        .and_then(|(_, regex)| regex.captures(name))
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str().to_string())
}

pub fn extract_entities(name: &str) -> EntitySet {
    let mut entities = EntitySet::new();
    for key in EntityKey::ALL {
        if let Some(value) = extract_entity(name, key) {
            let inserted = entities.insert(key, value);
            debug_assert!(inserted.is_ok(), "captured values are alphanumeric labels");
        }
    }
    entities
}

pub fn stem(name: &str) -> &str {
    for extension in COMPOUND_EXTENSIONS {
        if let Some(stem) = name.strip_suffix(extension) {
            return stem;
        }
    }
    name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name)
}

/// Same directory and stem, different extension (`x.nii.gz` -> `x.json`).
pub fn swap_extension(path: &Utf8Path, extension: &str) -> Utf8PathBuf {
    let name = path.file_name().unwrap_or_default();
    path.with_file_name(format!("{}{extension}", stem(name)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidsName {
    pub subject: SubjectId,
    pub entities: EntitySet,
    pub modality: Modality,
    pub extension: String,
}

impl BidsName {
    pub fn parse(name: &str) -> Option<Self> {
        let dot = name.find('.')?;
        let (stem, extension) = name.split_at(dot);
        let mut parts = stem.split('_');
        let subject = parts.next()?.strip_prefix("sub-")?.parse().ok()?;
        let parts: Vec<&str> = parts.collect();
        let (suffix, entity_parts) = parts.split_last()?;
        let modality = Modality::from_suffix(suffix);
        if modality == Modality::Unknown {
            return None;
        }
        let mut entities = EntitySet::new();
        for part in entity_parts {
            let (key, value) = part.split_once('-')?;
            let key = EntityKey::from_key(key)?;
            entities.insert(key, value).ok()?;
        }
        Some(Self {
            subject,
            entities,
            modality,
            extension: extension.to_string(),
        })
    }

    pub fn file_name(&self) -> String {
        file_name(&self.subject, self.modality, &self.entities, &self.extension)
    }

    pub fn with_run(mut self, run: Option<String>) -> Result<Self, crate::error::ConvertError> {
        match run {
            Some(run) => self.entities.insert(EntityKey::Run, run)?,
            None => {
                self.entities.remove(EntityKey::Run);
            }
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> SubjectId {
        "HCA000001".parse().unwrap()
    }

    #[test]
    fn encodes_in_canonical_order() {
        let entities = EntitySet::new()
            .with(EntityKey::Run, "2")
            .unwrap()
            .with(EntityKey::Direction, "AP")
            .unwrap()
            .with(EntityKey::Task, "carit")
            .unwrap();
        let name = file_name(&subject(), Modality::Bold, &entities, IMAGE_EXTENSION);
        assert_eq!(name, "sub-HCA000001_task-carit_dir-AP_run-2_bold.nii.gz");
    }

    #[test]
    fn bare_anatomical_name() {
        let path = output_path(
            Utf8Path::new("/bids"),
            &subject(),
            Modality::T1w,
            BidsFolder::Anat,
            &EntitySet::new(),
            IMAGE_EXTENSION,
        );
        assert_eq!(path, "/bids/sub-HCA000001/anat/sub-HCA000001_T1w.nii.gz");
    }

    #[test]
    fn extraction_recovers_encoded_entities() {
        let entities = EntitySet::new()
            .with(EntityKey::Task, "rest")
            .unwrap()
            .with(EntityKey::Direction, "PA")
            .unwrap()
            .with(EntityKey::Run, "05")
            .unwrap()
            .with(EntityKey::Recording, "eyetracking")
            .unwrap();
        let name = file_name(&subject(), Modality::Physio, &entities, ".mp4");
        assert_eq!(extract_entities(&name), entities);
        assert!(extract_entities("sub-HCA000001_T1w.nii.gz").is_empty());
    }

    #[test]
    fn recording_is_not_mistaken_for_rec() {
        let name = "sub-X_task-rest_recording-eyetracking_physio.mp4";
        assert_eq!(extract_entity(name, EntityKey::Reconstruction), None);
        assert_eq!(
            extract_entity(name, EntityKey::Recording).as_deref(),
            Some("eyetracking")
        );
    }

    #[test]
    fn swap_extension_handles_double_extension() {
        let path = Utf8Path::new("/raw/T1w/T1w_MPR.nii.gz");
        assert_eq!(swap_extension(path, ".json"), "/raw/T1w/T1w_MPR.json");
        assert_eq!(swap_extension(path, ".bval"), "/raw/T1w/T1w_MPR.bval");
    }

    #[test]
    fn parse_rejects_foreign_names() {
        assert!(BidsName::parse("T1w_MPR.nii.gz").is_none());
        assert!(BidsName::parse("sub-X_foo-1_epi.nii.gz").is_none());
    }
}
