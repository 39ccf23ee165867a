use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use hcp2bids::classify::{
    Classification, ClassificationResult, Classifier, ClassifierOptions, RawFile, SkipReason,
};
use hcp2bids::diagnostics::{DiagnosticKind, DiagnosticLog};
use hcp2bids::domain::{BidsFolder, EntityKey, Modality};
use hcp2bids::error::ConvertError;

const SUBJECT_DIR: &str = "/nda/imagingcollection01/HCA000001_V1_MR";

fn raw(relative: &str) -> RawFile {
    let subject_dir = Utf8PathBuf::from(SUBJECT_DIR);
    let path = subject_dir.join(relative);
    RawFile::new(&subject_dir, path).unwrap()
}

fn options() -> ClassifierOptions {
    ClassifierOptions {
        directions: vec!["AP".parse().unwrap(), "PA".parse().unwrap()],
        ..ClassifierOptions::default()
    }
}

fn classify(options: ClassifierOptions, relative: &str) -> Classification {
    let log = DiagnosticLog::new();
    Classifier::new(options).classify(&raw(relative), &log).unwrap()
}

fn accepted(relative: &str) -> ClassificationResult {
    match classify(options(), relative) {
        Classification::Accepted(result) => result,
        Classification::Skipped(reason) => panic!("{relative} skipped: {reason:?}"),
    }
}

#[test]
fn anatomical_scan() {
    let result = accepted("unprocessed/T1w_MPR_vNav_4e_RMS/HCA000001_V1_MR_T1w_MPR_vNav_4e_RMS.nii.gz");
    assert_eq!(result.modality, Modality::T1w);
    assert_eq!(result.folder, BidsFolder::Anat);
    assert!(result.entities.is_empty());
    assert_eq!(result.intended_for, None);
}

#[test]
fn resting_state_run_and_direction() {
    let result = accepted("unprocessed/rfMRI_REST1a_PA/HCA000001_V1_MR_rfMRI_REST1a_PA.nii.gz");
    assert_eq!(result.modality, Modality::Bold);
    assert_eq!(result.folder, BidsFolder::Func);
    assert_eq!(result.entities.get(EntityKey::Task), Some("rest"));
    assert_eq!(result.entities.get(EntityKey::Run), Some("1a"));
    assert_eq!(result.entities.get(EntityKey::Direction), Some("PA"));
}

#[test]
fn single_band_reference_points_at_its_bold() {
    let result = accepted("unprocessed/tfMRI_CARIT_PA/HCA000001_V1_MR_tfMRI_CARIT_PA_SBRef.nii.gz");
    assert_eq!(result.modality, Modality::Sbref);
    assert_eq!(result.folder, BidsFolder::Func);
    assert_eq!(
        result.intended_for.as_deref(),
        Some("func/sub-HCA000001_task-carit_dir-PA_bold.nii.gz")
    );
}

#[test]
fn bids_uris_prefix_intended_for() {
    let options = ClassifierOptions {
        use_bids_uris: true,
        ..options()
    };
    let result = match classify(
        options,
        "unprocessed/rfMRI_REST2b_AP/HCA000001_V1_MR_rfMRI_REST2b_AP_SBRef.nii.gz",
    ) {
        Classification::Accepted(result) => result,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(
        result.intended_for.as_deref(),
        Some("bids::sub-HCA000001/func/sub-HCA000001_task-rest_dir-AP_run-4_bold.nii.gz")
    );
}

#[test]
fn spin_echo_takes_precedence_over_later_markers() {
    let result = accepted("unprocessed/T1w_MPR_vNav_4e/HCA000001_V1_MR_SpinEchoFieldMap1_PA.nii.gz");
    assert_eq!(result.modality, Modality::Epi);
    assert_eq!(result.folder, BidsFolder::Fmap);
    assert_eq!(result.entities.get(EntityKey::Run), Some("mprvnav4e"));
    assert_eq!(
        result.intended_for.as_deref(),
        Some("anat/sub-HCA000001_T1w.nii.gz")
    );
}

#[test]
fn t1w_marker_wins_over_t2w() {
    let result = accepted("unprocessed/T1w_T2w_setter/HCA000001_V1_MR_T2w_SPC_vNav.nii.gz");
    assert_eq!(result.modality, Modality::T1w);
}

#[test]
fn spin_echo_with_unknown_parent_warns() {
    let log = DiagnosticLog::new();
    let classification = Classifier::new(options())
        .classify(
            &raw("unprocessed/Extra_Scan/HCA000001_V1_MR_SpinEchoFieldMap3_AP.nii.gz"),
            &log,
        )
        .unwrap();
    let result = match classification {
        Classification::Accepted(result) => result,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(result.intended_for, None);
    assert_eq!(log.count(DiagnosticKind::UnknownIntendedFor), 1);
}

#[test]
fn diffusion_schemes_become_runs() {
    let first = accepted("unprocessed/Diffusion/HCA000001_V1_MR_dMRI_dir98_AP.nii.gz");
    let second = accepted("unprocessed/Diffusion/HCA000001_V1_MR_dMRI_dir99_PA.nii.gz");
    assert_eq!(first.modality, Modality::Dwi);
    assert_eq!(first.entities.get(EntityKey::Run), Some("1"));
    assert_eq!(second.entities.get(EntityKey::Run), Some("2"));
    assert_eq!(second.entities.get(EntityKey::Direction), Some("PA"));
}

#[test]
fn arterial_spin_labeling() {
    let result = accepted("unprocessed/mbPCASLhr_PA/HCA000001_V1_MR_mbPCASLhr_PA.nii.gz");
    assert_eq!(result.modality, Modality::Asl);
    assert_eq!(result.folder, BidsFolder::Perf);
}

#[test]
fn exclusions() {
    assert_matches!(
        classify(
            options(),
            "unprocessed/T1w_MPR_vNav_4e/OTHER_FILES/HCA000001_V1_MR_T1w_MPR_vNav_4e_e1.nii.gz"
        ),
        Classification::Skipped(SkipReason::OtherFiles)
    );
    assert_matches!(
        classify(options(), "unprocessed/BIAS_BC/HCA000001_V1_MR_BIAS_BC.nii.gz"),
        Classification::Skipped(SkipReason::BiasField)
    );
    assert_matches!(
        classify(options(), "unprocessed/Localizer/HCA000001_V1_MR_Localizer.nii.gz"),
        Classification::Skipped(SkipReason::UnknownModality)
    );

    let skip = ClassifierOptions {
        skip: vec!["CARIT".to_string()],
        ..options()
    };
    assert_matches!(
        classify(skip, "unprocessed/tfMRI_CARIT_PA/HCA000001_V1_MR_tfMRI_CARIT_PA.nii.gz"),
        Classification::Skipped(SkipReason::SkipList(pattern)) if pattern == "CARIT"
    );
}

#[test]
fn bias_images_kept_on_request() {
    let keep = ClassifierOptions {
        skip_bias: false,
        ..options()
    };
    assert_matches!(
        classify(keep, "unprocessed/T1w_BIAS_32CH/HCA000001_V1_MR_T1w_BIAS_32CH.nii.gz"),
        Classification::Accepted(result) if result.modality == Modality::T1w
    );
}

#[test]
fn derived_anatomical_redirect() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let subject_dir = root.join("HCA000002_V1_MR");
    let image = subject_dir.join("unprocessed/T1w_MPR_vNav_4e/HCA000002_V1_MR_T1w_MPR_vNav_4e.nii.gz");
    fs::create_dir_all(image.parent().unwrap()).unwrap();
    fs::write(&image, b"raw").unwrap();
    let raw = RawFile::new(&subject_dir, image).unwrap();

    let options = ClassifierOptions {
        t1w_use_derived: true,
        ..options()
    };
    let classifier = Classifier::new(options);
    let log = DiagnosticLog::new();
    let err = classifier.classify(&raw, &log).unwrap_err();
    assert_matches!(err, ConvertError::MissingDerivedFile(_));

    let derived = subject_dir.join("T1w").join("T1w_acpc_dc.nii.gz");
    fs::create_dir_all(derived.parent().unwrap()).unwrap();
    fs::write(&derived, b"derived").unwrap();
    assert_matches!(
        classifier.classify(&raw, &log).unwrap(),
        Classification::Accepted(result) if result.source == derived
    );
}

#[test]
fn derived_t2w_redirect() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let subject_dir = root.join("HCA000002_V1_MR");
    let image = subject_dir.join("unprocessed/T2w_SPC_vNav/HCA000002_V1_MR_T2w_SPC_vNav.nii.gz");
    fs::create_dir_all(image.parent().unwrap()).unwrap();
    fs::write(&image, b"raw").unwrap();
    let raw = RawFile::new(&subject_dir, image.clone()).unwrap();
    let log = DiagnosticLog::new();

    // Only the T2w toggle is honoured for T2w scans.
    let t1w_only = Classifier::new(ClassifierOptions {
        t1w_use_derived: true,
        ..options()
    });
    assert_matches!(
        t1w_only.classify(&raw, &log).unwrap(),
        Classification::Accepted(result) if result.source == image
    );

    let classifier = Classifier::new(ClassifierOptions {
        t2w_use_derived: true,
        ..options()
    });
    let err = classifier.classify(&raw, &log).unwrap_err();
    assert_matches!(err, ConvertError::MissingDerivedFile(path) if path.ends_with("T1w/T2w_acpc_dc.nii.gz"));

    let derived = subject_dir.join("T1w").join("T2w_acpc_dc.nii.gz");
    fs::create_dir_all(derived.parent().unwrap()).unwrap();
    fs::write(&derived, b"derived").unwrap();
    assert_matches!(
        classifier.classify(&raw, &log).unwrap(),
        Classification::Accepted(result) if result.modality == Modality::T2w && result.source == derived
    );
}

#[test]
fn gradient_unwarp_redirect() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let subject_dir = root.join("100307");
    let image = subject_dir.join("unprocessed/3T/rfMRI_REST1_LR/100307_3T_rfMRI_REST1_LR.nii.gz");
    fs::create_dir_all(image.parent().unwrap()).unwrap();
    fs::write(&image, b"raw").unwrap();
    let raw = RawFile::new(&subject_dir, image).unwrap();

    let classifier = Classifier::new(ClassifierOptions {
        directions: vec!["LR".parse().unwrap(), "RL".parse().unwrap()],
        grad_unwarp: true,
        ..ClassifierOptions::default()
    });
    let log = DiagnosticLog::new();
    let err = classifier.classify(&raw, &log).unwrap_err();
    assert_matches!(err, ConvertError::MissingDerivedFile(_));

    let unwarped = subject_dir.join("gradunwarp/rfMRI_REST1_LR/100307_3T_rfMRI_REST1_LR.nii.gz");
    fs::create_dir_all(unwarped.parent().unwrap()).unwrap();
    fs::write(&unwarped, b"unwarped").unwrap();
    let result = match classifier.classify(&raw, &log).unwrap() {
        Classification::Accepted(result) => result,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(result.source, unwarped);
    assert_eq!(result.modality, Modality::Bold);
    assert_eq!(result.entities.get(EntityKey::Task), Some("rest"));
    assert_eq!(result.entities.get(EntityKey::Direction), Some("LR"));
}
