use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveTime;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::codec;
use crate::domain::{EntityKey, Modality};
use crate::error::ConvertError;
use crate::transfer::FileOps;

pub const INTENDED_FOR: &str = "IntendedFor";
pub const TASK_NAME: &str = "TaskName";
pub const ACQUISITION_TIME: &str = "AcquisitionTime";

/// Reads a sidecar as a JSON object; a missing file is an empty object.
pub fn read_object(path: &Utf8Path) -> Result<Map<String, Value>, ConvertError> {
    if !path.exists() {
        return Ok(Map::new());
    }
    let content = fs::read_to_string(path)
        .map_err(|err| ConvertError::Filesystem(format!("read {path}: {err}")))?;
    match serde_json::from_str(&content) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(_) => Err(ConvertError::SidecarParse {
            path: path.as_std_path().to_path_buf(),
            message: "top-level value is not an object".to_string(),
        }),
        Err(err) => Err(ConvertError::SidecarParse {
            path: path.as_std_path().to_path_buf(),
            message: err.to_string(),
        }),
    }
}

/// Sets `key` in the sidecar at `path`, keeping every other key.
pub fn patch(
    fs: &dyn FileOps,
    path: &Utf8Path,
    key: &str,
    value: Value,
) -> Result<(), ConvertError> {
    let mut object = read_object(path)?;
    object.insert(key.to_string(), value);
    if let Some(parent) = path.parent() {
        fs.create_dir_all(parent)?;
    }
    fs.write(path, &to_json_bytes(&object)?)
}

pub fn to_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, ConvertError> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    value
        .serialize(&mut serializer)
        .map_err(|err| ConvertError::Filesystem(err.to_string()))?;
    buffer.push(b'\n');
    Ok(buffer)
}

/// `AcquisitionTime` of the sidecar next to `image`, as a time of day.
pub fn acquisition_time(image: &Utf8Path) -> Result<NaiveTime, ConvertError> {
    let sidecar = codec::swap_extension(image, codec::SIDECAR_EXTENSION);
    let failure = |reason: String| ConvertError::AcquisitionTime {
        path: image.as_std_path().to_path_buf(),
        reason,
    };
    if !sidecar.exists() {
        return Err(failure(format!("no JSON sidecar found at {sidecar}")));
    }
    let object = read_object(&sidecar)?;
    let raw = object
        .get(ACQUISITION_TIME)
        .and_then(Value::as_str)
        .ok_or_else(|| failure(format!("{ACQUISITION_TIME} missing from {sidecar}")))?;
    NaiveTime::parse_from_str(raw, "%H:%M:%S%.f")
        .map_err(|err| failure(format!("unparseable {ACQUISITION_TIME} {raw:?}: {err}")))
}

/// Looks up a pre-authored sidecar for an output name in a template library.
///
/// Templates are named `[task-<t>_][dir-<d>_]<suffix>.json` using the task and
/// direction of the output file.
pub fn template_sidecar(library: &Utf8Path, output_name: &str) -> Option<Utf8PathBuf> {
    let stem = codec::stem(output_name);
    let suffix = stem.rsplit('_').next()?;
    let mut name = format!("{suffix}{}", codec::SIDECAR_EXTENSION);
    if let Some(direction) = codec::extract_entity(output_name, EntityKey::Direction) {
        name = format!("dir-{direction}_{name}");
    }
    if let Some(task) = codec::extract_entity(output_name, EntityKey::Task) {
        name = format!("task-{task}_{name}");
    }
    let candidate = library.join(name);
    candidate.exists().then_some(candidate)
}

/// `physio.json` in the template library, when there is one.
pub fn physio_template_path(library: Option<&Utf8Path>) -> Option<Utf8PathBuf> {
    let path = library?.join(format!(
        "{}{}",
        Modality::Physio.suffix(),
        codec::SIDECAR_EXTENSION
    ));
    path.exists().then_some(path)
}

pub fn physio_template(template: Option<&Utf8Path>) -> Result<Value, ConvertError> {
    if let Some(path) = template {
        return Ok(Value::Object(read_object(path)?));
    }
    Ok(serde_json::json!({
        "SamplingFrequency": 400,
        "StartTime": 0,
        "Columns": ["trigger", "respiratory", "cardiac"],
    }))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::transfer::LocalFs;

    fn temp_dir() -> (tempfile::TempDir, Utf8PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, root)
    }

    #[test]
    fn patch_keeps_existing_keys_and_sorts() {
        let (_temp, root) = temp_dir();
        let path = root.join("sub-X_T1w.json");
        fs::write(&path, r#"{"RepetitionTime": 2.5, "EchoTime": 0.002}"#).unwrap();

        patch(&LocalFs, &path, INTENDED_FOR, Value::from("anat/sub-X_T1w.nii.gz")).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let echo = content.find("EchoTime").unwrap();
        let intended = content.find(INTENDED_FOR).unwrap();
        let repetition = content.find("RepetitionTime").unwrap();
        assert!(echo < intended && intended < repetition);
        assert!(content.contains("\n    \"EchoTime\""));
    }

    #[test]
    fn patch_creates_missing_sidecar() {
        let (_temp, root) = temp_dir();
        let path = root.join("func").join("sub-X_task-rest_bold.json");
        patch(&LocalFs, &path, TASK_NAME, Value::from("rest")).unwrap();
        let object = read_object(&path).unwrap();
        assert_eq!(object[TASK_NAME], "rest");
    }

    #[test]
    fn non_object_sidecar_is_rejected() {
        let (_temp, root) = temp_dir();
        let path = root.join("broken.json");
        fs::write(&path, "[1, 2]").unwrap();
        let err = patch(&LocalFs, &path, TASK_NAME, Value::from("rest")).unwrap_err();
        assert_matches!(err, ConvertError::SidecarParse { .. });
    }

    #[test]
    fn acquisition_time_requires_field() {
        let (_temp, root) = temp_dir();
        let image = root.join("sub-X_dir-AP_run-a_epi.nii.gz");
        fs::write(root.join("sub-X_dir-AP_run-a_epi.json"), "{}").unwrap();
        let err = acquisition_time(&image).unwrap_err();
        assert_matches!(err, ConvertError::AcquisitionTime { .. });

        fs::write(
            root.join("sub-X_dir-AP_run-a_epi.json"),
            r#"{"AcquisitionTime": "14:03:22.537500"}"#,
        )
        .unwrap();
        let time = acquisition_time(&image).unwrap();
        assert_eq!(time, NaiveTime::from_hms_micro_opt(14, 3, 22, 537500).unwrap());
    }

    #[test]
    fn template_lookup_uses_task_and_direction() {
        let (_temp, root) = temp_dir();
        fs::write(root.join("task-rest_dir-LR_bold.json"), "{}").unwrap();
        fs::write(root.join("T1w.json"), "{}").unwrap();

        let found = template_sidecar(&root, "sub-1_task-rest_dir-LR_run-1_bold.nii.gz");
        assert_eq!(found, Some(root.join("task-rest_dir-LR_bold.json")));
        assert_eq!(
            template_sidecar(&root, "sub-1_T1w.nii.gz"),
            Some(root.join("T1w.json"))
        );
        assert_eq!(template_sidecar(&root, "sub-1_dir-RL_epi.nii.gz"), None);
    }
}
