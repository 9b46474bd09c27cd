use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn ocrdrop(dir: &Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_ocrdrop"));
    command.current_dir(dir).env("RUST_LOG", "warn");
    command
}

fn write_config(dir: &Path) -> std::path::PathBuf {
    for sub in ["in", "out", "err"] {
        std::fs::create_dir_all(dir.join(sub)).unwrap();
    }
    let config = dir.join("custom.toml");
    std::fs::write(
        &config,
        format!(
            r#"
[paths]
watch_root = "{root}/in"
output_root = "{root}/out"
error_dir = "{root}/err"
queue_dir = "{root}/queue"

[watch]
stabilize_step_ms = 20
"#,
            root = dir.display()
        ),
    )
    .unwrap();
    config
}

#[test]
fn test_init_command() {
    let temp_dir = TempDir::new().unwrap();

    let output = ocrdrop(temp_dir.path())
        .arg("init")
        .output()
        .expect("Failed to run init command");
    assert!(output.status.success());

    let config_path = temp_dir.path().join(".ocrdrop/settings.toml");
    let content = std::fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("[paths]"));
    assert!(content.contains("[recognition]"));
    assert!(content.contains("watch_root"));

    // A second init without --force refuses to overwrite
    let output = ocrdrop(temp_dir.path()).arg("init").output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_config_command_reads_custom_file() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path());

    let output = ocrdrop(temp_dir.path())
        .arg("--config")
        .arg(&config)
        .arg("config")
        .output()
        .expect("Failed to run config command");
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("stabilize_step_ms = 20"));
}

#[test]
fn test_scan_enqueues_into_spool() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path());
    std::fs::create_dir_all(temp_dir.path().join("in/dept")).unwrap();
    std::fs::write(temp_dir.path().join("in/dept/a.pdf"), b"%PDF-1.7").unwrap();

    let output = ocrdrop(temp_dir.path())
        .arg("--config")
        .arg(&config)
        .arg("scan")
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("1 enqueued"));

    let pending: Vec<_> = std::fs::read_dir(temp_dir.path().join("queue/pending"))
        .unwrap()
        .collect();
    assert_eq!(pending.len(), 1);
}

#[test]
fn test_missing_watch_root_is_startup_error() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path());
    std::fs::remove_dir(temp_dir.path().join("in")).unwrap();

    let output = ocrdrop(temp_dir.path())
        .arg("--config")
        .arg(&config)
        .arg("scan")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid configuration"));
}

#[test]
fn test_failures_with_empty_error_dir() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path());

    let output = ocrdrop(temp_dir.path())
        .arg("--config")
        .arg(&config)
        .args(["failures", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "[]");
}
