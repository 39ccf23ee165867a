use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::ConvertError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Subject folders are named `<id>_<visit>...`; the id is everything before the first underscore.
    pub fn from_folder_name(name: &str) -> Result<Self, ConvertError> {
        let head = name.split('_').next().unwrap_or_default();
        head.parse()
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubjectId {
    type Err = ConvertError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !is_label(trimmed) {
            return Err(ConvertError::InvalidSubjectId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modality {
    T1w,
    T2w,
    #[serde(rename = "bold")]
    Bold,
    #[serde(rename = "dwi")]
    Dwi,
    #[serde(rename = "asl")]
    Asl,
    #[serde(rename = "epi")]
    Epi,
    #[serde(rename = "sbref")]
    Sbref,
    #[serde(rename = "events")]
    Events,
    #[serde(rename = "physio")]
    Physio,
    #[serde(rename = "unknown")]
    Unknown,
}

impl Modality {
    pub fn suffix(self) -> &'static str {
        match self {
            Modality::T1w => "T1w",
            Modality::T2w => "T2w",
            Modality::Bold => "bold",
            Modality::Dwi => "dwi",
            Modality::Asl => "asl",
            Modality::Epi => "epi",
            Modality::Sbref => "sbref",
            Modality::Events => "events",
            Modality::Physio => "physio",
            Modality::Unknown => "unknown",
        }
    }

    pub fn from_suffix(suffix: &str) -> Modality {
        match suffix {
            "T1w" => Modality::T1w,
            "T2w" => Modality::T2w,
            "bold" => Modality::Bold,
            "dwi" => Modality::Dwi,
            "asl" => Modality::Asl,
            "epi" => Modality::Epi,
            "sbref" => Modality::Sbref,
            "events" => Modality::Events,
            "physio" => Modality::Physio,
            _ => Modality::Unknown,
        }
    }

    /// `None` for modalities that never produce output on their own.
    pub fn folder(self) -> Option<BidsFolder> {
        match self {
            Modality::T1w | Modality::T2w => Some(BidsFolder::Anat),
            Modality::Bold | Modality::Sbref | Modality::Events | Modality::Physio => {
                Some(BidsFolder::Func)
            }
            Modality::Dwi => Some(BidsFolder::Dwi),
            Modality::Asl => Some(BidsFolder::Perf),
            Modality::Epi => Some(BidsFolder::Fmap),
            Modality::Unknown => None,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BidsFolder {
    Anat,
    Func,
    Dwi,
    Perf,
    Fmap,
}

impl BidsFolder {
    pub fn as_str(self) -> &'static str {
        match self {
            BidsFolder::Anat => "anat",
            BidsFolder::Func => "func",
            BidsFolder::Dwi => "dwi",
            BidsFolder::Perf => "perf",
            BidsFolder::Fmap => "fmap",
        }
    }
}

impl fmt::Display for BidsFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity keys in canonical BIDS order. The derived `Ord` is the emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKey {
    #[serde(rename = "ses")]
    Session,
    #[serde(rename = "task")]
    Task,
    #[serde(rename = "acq")]
    Acquisition,
    #[serde(rename = "ce")]
    ContrastEnhancement,
    #[serde(rename = "rec")]
    Reconstruction,
    #[serde(rename = "dir")]
    Direction,
    #[serde(rename = "run")]
    Run,
    #[serde(rename = "recording")]
    Recording,
    #[serde(rename = "echo")]
    Echo,
    #[serde(rename = "part")]
    Part,
}

impl EntityKey {
    pub const ALL: [EntityKey; 10] = [
        EntityKey::Session,
        EntityKey::Task,
        EntityKey::Acquisition,
        EntityKey::ContrastEnhancement,
        EntityKey::Reconstruction,
        EntityKey::Direction,
        EntityKey::Run,
        EntityKey::Recording,
        EntityKey::Echo,
        EntityKey::Part,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKey::Session => "ses",
            EntityKey::Task => "task",
            EntityKey::Acquisition => "acq",
            EntityKey::ContrastEnhancement => "ce",
            EntityKey::Reconstruction => "rec",
            EntityKey::Direction => "dir",
            EntityKey::Run => "run",
            EntityKey::Recording => "recording",
            EntityKey::Echo => "echo",
            EntityKey::Part => "part",
        }
    }

    pub fn from_key(key: &str) -> Option<EntityKey> {
        EntityKey::ALL.into_iter().find(|entity| entity.as_str() == key)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySet(BTreeMap<EntityKey, String>);

impl EntitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: EntityKey, value: impl Into<String>) -> Result<(), ConvertError> {
        let value = value.into();
        if !is_label(&value) {
            return Err(ConvertError::InvalidEntity {
                key: key.to_string(),
                value,
            });
        }
        self.0.insert(key, value);
        Ok(())
    }

    pub fn with(mut self, key: EntityKey, value: impl Into<String>) -> Result<Self, ConvertError> {
        self.insert(key, value)?;
        Ok(self)
    }

    pub fn remove(&mut self, key: EntityKey) -> Option<String> {
        self.0.remove(&key)
    }

    pub fn get(&self, key: EntityKey) -> Option<&str> {
        self.0.get(&key).map(String::as_str)
    }

    pub fn contains(&self, key: EntityKey) -> bool {
        self.0.contains_key(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityKey, &str)> {
        self.0.iter().map(|(key, value)| (*key, value.as_str()))
    }
}

/// Maps the legacy `1a/1b/2a/2b` run labels onto sequential integers.
pub fn normalize_run(value: &str) -> &str {
    match value {
        "1a" => "1",
        "1b" => "2",
        "2a" => "3",
        "2b" => "4",
        other => other,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhaseEncodingDirection(String);

impl PhaseEncodingDirection {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhaseEncodingDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PhaseEncodingDirection {
    type Err = ConvertError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !is_label(trimmed) {
            return Err(ConvertError::InvalidDirection(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for PhaseEncodingDirection {
    type Error = ConvertError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PhaseEncodingDirection> for String {
    fn from(value: PhaseEncodingDirection) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransferMethod {
    Hardlink,
    Symlink,
    Copy,
    Move,
}

impl fmt::Display for TransferMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMethod::Hardlink => write!(f, "hardlink"),
            TransferMethod::Symlink => write!(f, "symlink"),
            TransferMethod::Copy => write!(f, "copy"),
            TransferMethod::Move => write!(f, "move"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistsPolicy {
    Skip,
    Fail,
    Overwrite,
}

impl ExistsPolicy {
    pub fn from_flags(overwrite: bool, exists_ok: bool) -> Self {
        match (overwrite, exists_ok) {
            (true, _) => ExistsPolicy::Overwrite,
            (false, true) => ExistsPolicy::Skip,
            (false, false) => ExistsPolicy::Fail,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetFamily {
    Lifespan,
    YoungAdult,
}

impl DatasetFamily {
    pub fn default_directions(self) -> Vec<PhaseEncodingDirection> {
        let codes: &[&str] = match self {
            DatasetFamily::Lifespan => &["AP", "PA"],
            DatasetFamily::YoungAdult => &["LR", "RL"],
        };
        codes
            .iter()
            .map(|code| PhaseEncodingDirection(code.to_string()))
            .collect()
    }

    /// Young Adult exports carry no acquisition times, so field maps are ordered by name.
    pub fn sorts_runs_by_name(self) -> bool {
        matches!(self, DatasetFamily::YoungAdult)
    }

    pub fn default_name(self) -> &'static str {
        match self {
            DatasetFamily::Lifespan => "auto",
            DatasetFamily::YoungAdult => "HCPYoungAdult",
        }
    }

    pub fn subject_pattern(self, root: &str) -> String {
        let root = root.trim_end_matches('/');
        match self {
            DatasetFamily::Lifespan => format!("{root}/imagingcollection01/HC*"),
            DatasetFamily::YoungAdult => format!("{root}/*"),
        }
    }
}

/// BIDS labels are non-empty and ASCII alphanumeric.
pub fn is_label(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|ch| ch.is_ascii_alphanumeric())
}
