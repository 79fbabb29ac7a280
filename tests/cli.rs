use std::fs;
use std::process::Command;

use crowdprobit::data::AnnotationData;
use crowdprobit::model::FitReport;
use tempfile::tempdir;

#[test]
fn simulate_then_one_step_writes_a_report() {
    let tmp = tempdir().expect("temporary directory");
    let data_dir = tmp.path().join("data");
    let exe = env!("CARGO_BIN_EXE_crowdprobit");

    let status = Command::new(exe)
        .args([
            "simulate",
            data_dir.to_str().expect("path str"),
            "--examples",
            "6000",
            "--features",
            "2",
            "--annotators",
            "4",
            "--rate",
            "0.5",
            "--seed",
            "3",
        ])
        .status()
        .expect("run crowdprobit simulate");
    assert!(status.success(), "simulate exited with status {status:?}");

    let data = AnnotationData::load_dir(&data_dir).expect("load simulated data");
    assert_eq!(data.num_examples(), 6000);
    assert_eq!(data.num_annotators(), 4);
    let truth = FitReport::load(&data_dir.join("truth.toml")).expect("truth report");
    assert_eq!(truth.sigma, vec![1.0, 0.1, 10.0, 10.0]);

    let config_path = tmp.path().join("estimator.toml");
    fs::write(&config_path, "[probit]\nmax_iterations = 200\n").expect("write config");
    let report_path = tmp.path().join("report.toml");
    let output = Command::new(exe)
        .args([
            "os",
            data_dir.to_str().expect("path str"),
            "--config",
            config_path.to_str().expect("path str"),
            "--report",
            report_path.to_str().expect("path str"),
            "--truth",
            data_dir.join("truth.toml").to_str().expect("path str"),
        ])
        .output()
        .expect("run crowdprobit os");
    assert!(
        output.status.success(),
        "os failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("update_beta: beta mse("));
    assert!(stdout.contains("final MSE"));

    let report = FitReport::load(&report_path).expect("fit report");
    assert_eq!(report.estimator, "one-step");
    assert_eq!(report.beta.len(), 1);
    assert_eq!(report.sigma[0], 1.0);
    assert!(report.diagnostics.beta_mse.is_some());
}

#[test]
fn missing_input_directory_is_reported() {
    let tmp = tempdir().expect("temporary directory");
    let output = Command::new(env!("CARGO_BIN_EXE_crowdprobit"))
        .args([
            "mle",
            tmp.path().join("absent").to_str().expect("path str"),
            "--classes",
            "2",
        ])
        .output()
        .expect("run crowdprobit mle");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).starts_with("Error:"));
}
