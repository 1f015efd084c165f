//! The binary must never leave a scratch directory behind.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Output};

const STATS: &str = r#"#!/bin/sh
if [ "$1" = "fail" ]; then echo "!! bad input"; exit 4; fi
cat > "$ADAM_USER/stats.sdf" <<'EOF'
STATS  <STRUC>
   MEAN           <_DOUBLE>       2.5
   NUMGOOD        <_INTEGER>      40
End of Trace.
EOF
"#;

fn install(root: &Path) {
    for (rel, body) in [
        ("bin/hdstrace", "#!/bin/sh\ncat \"$1.sdf\"\n"),
        ("bin/kappa/stats", STATS),
    ] {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
}

fn command(cwd: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_starwrap"));
    cmd.args(args)
        .current_dir(cwd)
        .env_remove("STARLINK_DIR")
        .env_remove("STARWRAP_SCRATCH_DIR")
        .env_remove("RUST_LOG");
    cmd
}

fn starwrap(cwd: &Path, args: &[&str]) -> Output {
    command(cwd, args).output().unwrap()
}

fn leftovers(cwd: &Path) -> Vec<String> {
    fs::read_dir(cwd)
        .unwrap()
        .filter_map(|e| e.unwrap().file_name().into_string().ok())
        .filter(|n| n.starts_with("tmpADAM"))
        .collect()
}

#[test]
fn success_prints_record_and_cleans_up() {
    let toolkit = tempfile::tempdir().unwrap();
    install(toolkit.path());
    let cwd = tempfile::tempdir().unwrap();
    let root = toolkit.path().to_str().unwrap();

    let out = starwrap(
        cwd.path(),
        &["--starlink", root, "--json", "$KAPPA_DIR/stats", "stats", "m31"],
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["mean"], 2.5);
    assert_eq!(json["numgood"], 40);
    assert!(leftovers(cwd.path()).is_empty());
}

#[test]
fn failure_exits_with_command_status_and_cleans_up() {
    let toolkit = tempfile::tempdir().unwrap();
    install(toolkit.path());
    let cwd = tempfile::tempdir().unwrap();
    let root = toolkit.path().to_str().unwrap();

    let out = starwrap(
        cwd.path(),
        &["--starlink", root, "$KAPPA_DIR/stats", "stats", "fail"],
    );
    assert_eq!(out.status.code(), Some(4));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Command 'stats' failed"));
    assert!(!stderr.contains("bad input"));
    assert!(leftovers(cwd.path()).is_empty());
}

#[test]
fn captured_output_shown_only_at_debug_level() {
    let toolkit = tempfile::tempdir().unwrap();
    install(toolkit.path());
    let cwd = tempfile::tempdir().unwrap();
    let root = toolkit.path().to_str().unwrap();

    let out = command(
        cwd.path(),
        &["--starlink", root, "$KAPPA_DIR/stats", "stats", "fail"],
    )
    .env("RUST_LOG", "starwrap=debug")
    .output()
    .unwrap();
    assert_eq!(out.status.code(), Some(4));
    assert!(String::from_utf8_lossy(&out.stderr).contains("bad input"));
}

#[test]
fn missing_toolkit_fails_without_scratch() {
    let cwd = tempfile::tempdir().unwrap();
    let out = starwrap(
        cwd.path(),
        &["--starlink", "/no/such/toolkit", "$KAPPA_DIR/stats", "stats"],
    );
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("configuration"));
    assert!(leftovers(cwd.path()).is_empty());
}

#[test]
fn usage_error_exits_two() {
    let cwd = tempfile::tempdir().unwrap();
    let out = starwrap(cwd.path(), &["--json"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("usage"));
}
