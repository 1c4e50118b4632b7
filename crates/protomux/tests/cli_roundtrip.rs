#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/protomux-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let start = Instant::now();
    while !path.exists() {
        if start.elapsed() >= timeout {
            panic!("socket {} never appeared", path.display());
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn protomux() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_protomux"));
    command.arg("--log-level").arg("error");
    command
}

#[test]
fn send_and_wait_gets_echo() {
    let dir = unique_temp_dir("echo");
    let sock_path = dir.join("chat.sock");

    let listener = protomux()
        .arg("--format")
        .arg("json")
        .arg("listen")
        .arg(&sock_path)
        .arg("--protocol")
        .arg("chat")
        .arg("--count")
        .arg("1")
        .arg("--echo")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("listen command should start");

    wait_for_socket(&sock_path, Duration::from_secs(3));

    let output = protomux()
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg(&sock_path)
        .arg("--protocol")
        .arg("chat")
        .arg("--json")
        .arg(r#"{"hello":"world"}"#)
        .arg("--wait")
        .arg("--wait-timeout")
        .arg("3s")
        .output()
        .expect("send command should run");
    assert!(
        output.status.success(),
        "send failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let reply: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("reply should be json");
    assert_eq!(reply["protocol"], "chat");
    assert_eq!(reply["payload"], r#"{"hello":"world"}"#);

    let listened = listener
        .wait_with_output()
        .expect("listen command should exit after one message");
    assert!(listened.status.success());
    let received: serde_json::Value =
        serde_json::from_slice(&listened.stdout).expect("listen output should be json");
    assert_eq!(received["payload"], r#"{"hello":"world"}"#);
    assert_eq!(received["payload_size"], 17);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn unmatched_protocol_is_rejected() {
    let dir = unique_temp_dir("reject");
    let sock_path = dir.join("chat.sock");

    let mut listener = protomux()
        .arg("listen")
        .arg(&sock_path)
        .arg("--protocol")
        .arg("chat")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("listen command should start");

    wait_for_socket(&sock_path, Duration::from_secs(3));

    let output = protomux()
        .arg("send")
        .arg(&sock_path)
        .arg("--protocol")
        .arg("other")
        .arg("--data")
        .arg("hello")
        .arg("--wait-timeout")
        .arg("3s")
        .output()
        .expect("send command should run");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("rejected"));

    let _ = listener.kill();
    let _ = listener.wait();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_to_missing_socket_fails() {
    let dir = unique_temp_dir("missing");
    let output = protomux()
        .arg("send")
        .arg(dir.join("absent.sock"))
        .arg("--protocol")
        .arg("chat")
        .arg("--data")
        .arg("hello")
        .output()
        .expect("send command should run");

    assert_eq!(output.status.code(), Some(1));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn version_prints_package_version() {
    let output = protomux()
        .arg("version")
        .output()
        .expect("version command should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("protomux {}", env!("CARGO_PKG_VERSION")));
}
