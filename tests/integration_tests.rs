//! End-to-end tests of the webvids binary
//!
//! ffprobe and ffmpeg are replaced by `sh -c` scripts through the config
//! file, so these run without a media toolchain.

#![cfg(unix)]

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const PROBE_JSON: &str =
    r#"{"streams":[{"width":1920,"height":1080}],"format":{"duration":"10.000000"}}"#;

/// Test utilities for driving the binary
mod test_utils {
    use super::*;

    pub struct Workspace {
        pub dir: TempDir,
        pub input: PathBuf,
        pub config: PathBuf,
    }

    impl Workspace {
        /// Temp dir with an input file and a config using fake tools
        pub fn new(probe_script: &str, encode_script: &str) -> Self {
            let dir = TempDir::new().unwrap();
            let input = dir.path().join("holiday.mov");
            std::fs::write(&input, b"not really a video").unwrap();

            let config = dir.path().join("webvids-test.toml");
            std::fs::write(&config, config_toml(probe_script, encode_script)).unwrap();

            Self { dir, input, config }
        }

        pub fn output_dir(&self) -> PathBuf {
            self.dir.path().join("out")
        }

        pub fn command(&self) -> Command {
            let mut cmd = Command::cargo_bin("webvids").unwrap();
            cmd.current_dir(self.dir.path())
                .env_remove("RUST_LOG")
                .env_remove("WEBVIDS_FFMPEG")
                .env_remove("WEBVIDS_FFPROBE")
                .env_remove("WEBVIDS_OUTPUT_DIR")
                .env_remove("WEBVIDS_ON_FAILURE")
                .env_remove("WEBVIDS_CONFIG")
                .arg("--log-level")
                .arg("warn")
                .arg("--config")
                .arg(&self.config);
            cmd
        }
    }

    fn config_toml(probe_script: &str, encode_script: &str) -> String {
        format!(
            r#"
[tools]
ffmpeg = "sh"
ffmpeg_args = ["-c", '''{} ''', "ffmpeg"]
ffprobe = "sh"
ffprobe_args = ["-c", '''{} ''', "ffprobe"]

[progress]
settle_delay_ms = 0
channel_grace_ms = 50
"#,
            encode_script, probe_script
        )
    }

    pub fn echo_probe() -> String {
        format!("echo '{}'", PROBE_JSON)
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }
}

use test_utils::*;

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("webvids")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("convert"))
        .stdout(predicate::str::contains("probe"));
}

#[test]
fn test_convert_missing_input_fails() {
    let ws = Workspace::new(&echo_probe(), "exit 0");
    ws.command()
        .arg("convert")
        .arg(ws.dir.path().join("missing.mov"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_convert_rejects_out_of_range_crf() {
    let ws = Workspace::new(&echo_probe(), "exit 0");
    ws.command()
        .arg("convert")
        .arg(&ws.input)
        .args(["--crf", "52"])
        .assert()
        .failure();
}

#[test]
fn test_probe_prints_metadata() {
    let ws = Workspace::new(&echo_probe(), "exit 0");
    ws.command()
        .arg("probe")
        .arg(&ws.input)
        .assert()
        .success()
        .stdout(predicate::str::contains("Duration: 10.00s"))
        .stdout(predicate::str::contains("Frame size: 1920x1080"))
        .stdout(predicate::str::contains("Downscale: none"));
}

#[test]
fn test_probe_json() {
    let ws = Workspace::new(&echo_probe(), "exit 0");
    let output = ws
        .command()
        .arg("probe")
        .arg(&ws.input)
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["duration_seconds"], 10.0);
    assert_eq!(report["width"], 1920);
    assert!(report["scale"].is_null());
}

#[test]
fn test_convert_json_progress_until_done() {
    let ws = Workspace::new(&echo_probe(), "exit 0");
    let output = ws
        .command()
        .arg("convert")
        .arg(&ws.input)
        .args(["--format", "json", "--skip-av1", "--preview"])
        .arg("--output-dir")
        .arg(ws.output_dir())
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8(output.stdout).unwrap();
    let frames: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let last = frames.last().unwrap();
    assert_eq!(last["phase"], "done");
    assert_eq!(last["slots"][0]["slot"], "hevc");
    assert_eq!(last["slots"][0]["status"], "succeeded");
    assert_eq!(last["slots"][1]["status"], "skipped");
    assert!(exists(&ws.output_dir()));
}

#[test]
fn test_convert_failed_encode_still_exits_zero() {
    let ws = Workspace::new(&echo_probe(), "echo 'encoder exploded' >&2; exit 1");
    ws.command()
        .arg("convert")
        .arg(&ws.input)
        .arg("--output-dir")
        .arg(ws.output_dir())
        .assert()
        .success()
        .stdout(predicate::str::contains("failed"))
        .stdout(predicate::str::contains("encoder exploded"))
        .stdout(predicate::str::contains("done"));
}

#[test]
fn test_convert_probe_failure_exits_nonzero() {
    let ws = Workspace::new("echo 'moov atom not found' >&2; exit 1", "exit 0");
    ws.command()
        .arg("convert")
        .arg(&ws.input)
        .args(["--format", "quiet"])
        .arg("--output-dir")
        .arg(ws.output_dir())
        .assert()
        .failure()
        .stderr(predicate::str::contains("aborted"));
}

#[test]
fn test_invalid_config_fails() {
    let ws = Workspace::new(&echo_probe(), "exit 0");
    std::fs::write(&ws.config, "[output]\nmax_dimension = 0\n").unwrap();
    ws.command()
        .arg("probe")
        .arg(&ws.input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration"));
}
