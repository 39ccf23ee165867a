use std::fs;

use assert_cmd::Command;
use camino::Utf8PathBuf;
use predicates::prelude::*;

fn hcp2bids() -> Command {
    Command::cargo_bin("hcp2bids").unwrap()
}

fn young_adult_tree() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let scan = root.join("hcp/100307/unprocessed/3T/rfMRI_REST1_LR");
    fs::create_dir_all(&scan).unwrap();
    fs::write(scan.join("100307_3T_rfMRI_REST1_LR.nii.gz"), "bold").unwrap();
    fs::write(scan.join("100307_3T_rfMRI_REST1_LR.json"), "{}").unwrap();
    fs::write(
        scan.join("100307_3T_rfMRI_REST1_LR_Physio_log.txt"),
        "0 1850 1420\n1 1851 1422\n",
    )
    .unwrap();
    (temp, root)
}

#[test]
fn no_args_shows_usage() {
    hcp2bids()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn version_flag() {
    hcp2bids()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("hcp2bids"));
}

#[test]
fn missing_output_dir_is_a_usage_error() {
    let temp = tempfile::tempdir().unwrap();
    hcp2bids()
        .current_dir(temp.path())
        .args(["convert", "--subjects", "/nonexistent/*"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("output_dir"));
}

#[test]
fn young_adult_json_report() {
    let (_temp, root) = young_adult_tree();
    let output = hcp2bids()
        .current_dir(&root)
        .args(["--json", "young-adult", "--method", "copy"])
        .args(["--hcp-dir", root.join("hcp").as_str()])
        .args(["--output-dir", root.join("bids").as_str()])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(report["dataset_name"], "HCPYoungAdult");
    assert_eq!(report["subjects"][0], "100307");

    let func = root.join("bids/sub-100307/func");
    assert!(func.join("sub-100307_task-rest_dir-LR_run-1_bold.nii.gz").exists());
    assert!(func.join("sub-100307_task-rest_dir-LR_run-1_physio.tsv.gz").exists());
    assert!(func.join("sub-100307_task-rest_dir-LR_run-1_physio.json").exists());
}

#[test]
fn dry_run_leaves_output_absent() {
    let (_temp, root) = young_adult_tree();
    hcp2bids()
        .current_dir(&root)
        .args(["young-adult", "--dry-run"])
        .args(["--hcp-dir", root.join("hcp").as_str()])
        .args(["--output-dir", root.join("bids").as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("dry run"));
    assert!(!root.join("bids").exists());
}

#[test]
fn invalid_direction_is_rejected() {
    let (_temp, root) = young_adult_tree();
    hcp2bids()
        .current_dir(&root)
        .args(["young-adult", "--pe-dirs", "L-R"])
        .args(["--hcp-dir", root.join("hcp").as_str()])
        .args(["--output-dir", root.join("bids").as_str()])
        .assert()
        .code(2);
}
