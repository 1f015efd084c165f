//! End-to-end runs against shell-script stand-ins installed in a temporary
//! toolkit tree.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

use starwrap::{CommandInvocation, Session, StarError, ToolkitLocation, Value};

static TEST_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn serial() -> std::sync::MutexGuard<'static, ()> {
    TEST_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|p| p.into_inner())
}

const HDSTRACE: &str = r#"#!/bin/sh
cat "$1.sdf"
"#;

// First positional selects a behaviour; anything else writes a full
// parameter file like the real application would.
const STATS: &str = r#"#!/bin/sh
case "$1" in
  fail) echo "!! NDF 'nosuch' not found"; exit 3 ;;
  silent) echo "nothing to do"; exit 0 ;;
  slow) exec sleep 5 ;;
  hold) echo start >> "$2"; sleep 0.3; echo end >> "$2" ;;
esac
cat > "$ADAM_USER/stats.sdf" <<'EOF'
STATS  <STRUC>

   NDF            <ADAM_PARNAME>  {structure}
      NAMEPTR     <_CHAR*132>     'm31'

   MEAN           <_DOUBLE>       2.5D0
   NUMGOOD        <_INTEGER>      40
   MAXPOS(2)      <_INTEGER>      12,34
   SIGMA          <_DOUBLE>       *

End of Trace.
EOF
"#;

struct FakeToolkit {
    root: tempfile::TempDir,
    work: tempfile::TempDir,
}

impl FakeToolkit {
    fn install() -> Self {
        let root = tempfile::tempdir().unwrap();
        write_script(&root.path().join("bin/hdstrace"), HDSTRACE);
        write_script(&root.path().join("bin/kappa/stats"), STATS);
        Self {
            root,
            work: tempfile::tempdir().unwrap(),
        }
    }

    fn session(&self) -> Session {
        Session::builder()
            .toolkit(ToolkitLocation::new(self.root.path()).unwrap())
            .scratch_parent(self.work.path())
            .build()
    }

    fn scratch_dirs(&self) -> Vec<PathBuf> {
        fs::read_dir(self.work.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("tmpADAM"))
            })
            .collect()
    }
}

fn write_script(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn stats() -> CommandInvocation {
    CommandInvocation::new("$KAPPA_DIR/stats", "stats")
}

#[test]
fn call_returns_the_applications_parameters() {
    let _guard = serial();
    let kit = FakeToolkit::install();
    let session = kit.session();

    let record = session.call(stats().arg("m31")).unwrap();
    assert_eq!(
        record.field_names(),
        vec!["ndf", "mean", "numgood", "maxpos", "sigma"]
    );
    assert_eq!(record.get("ndf").and_then(Value::as_str), Some("m31"));
    assert_eq!(record.get("MEAN").and_then(Value::as_f64), Some(2.5));
    assert_eq!(record.get("numgood").and_then(Value::as_i64), Some(40));
    assert_eq!(
        record.get("maxpos").and_then(Value::as_array),
        Some(&[Value::Integer(12), Value::Integer(34)][..])
    );
    assert!(record.get("sigma").unwrap().is_bad());
}

#[test]
fn fresh_sessions_give_identical_records() {
    let _guard = serial();
    let kit = FakeToolkit::install();

    let first = kit.session().call(stats().arg("m31")).unwrap();
    let second = kit.session().call(stats().arg("m31")).unwrap();
    assert_eq!(first, second);
}

#[test]
fn nonzero_exit_reports_exact_code_and_output() {
    let _guard = serial();
    let kit = FakeToolkit::install();
    let session = kit.session();

    let err = session.call(stats().arg("fail")).unwrap_err();
    assert!(err.is_invocation_failure());
    assert_eq!(err.exit_code(), Some(3));
    let (stdout, _) = err.captured_output().unwrap();
    assert!(stdout.contains("not found"));
}

#[test]
fn clean_exit_without_output_is_silent_failure() {
    let _guard = serial();
    let kit = FakeToolkit::install();

    let err = kit.session().run(stats().arg("silent")).unwrap_err();
    assert!(matches!(err, StarError::SilentFailure { .. }));
}

#[test]
fn earlier_output_does_not_mask_a_later_failure() {
    let _guard = serial();
    let kit = FakeToolkit::install();
    let session = kit.session();

    session.run(stats().arg("m31")).unwrap();
    let err = session.run(stats().arg("silent")).unwrap_err();
    assert!(matches!(err, StarError::SilentFailure { .. }));
    assert!(matches!(
        session.collect("stats").unwrap_err(),
        StarError::MissingOutput { .. }
    ));
}

#[test]
fn missing_program_is_not_found() {
    let _guard = serial();
    let kit = FakeToolkit::install();

    let err = kit
        .session()
        .run(CommandInvocation::new("$KAPPA_DIR/nosuch", "nosuch"))
        .unwrap_err();
    assert!(matches!(err, StarError::CommandNotFound { .. }));
}

#[test]
fn slow_command_is_killed_at_timeout() {
    let _guard = serial();
    let kit = FakeToolkit::install();

    let started = std::time::Instant::now();
    let err = kit
        .session()
        .run(stats().arg("slow").timeout(Duration::from_millis(200)))
        .unwrap_err();
    assert!(matches!(err, StarError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[test]
fn same_command_invocations_do_not_overlap() {
    let _guard = serial();
    let kit = FakeToolkit::install();
    let session = Arc::new(kit.session());
    let log = kit.work.path().join("overlap.log");

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let session = Arc::clone(&session);
            let log = log.clone();
            thread::spawn(move || session.call(stats().arg("hold").arg(log.display())))
        })
        .collect();
    for handle in handles {
        let record = handle.join().unwrap().unwrap();
        assert_eq!(record.get("numgood").and_then(Value::as_i64), Some(40));
    }

    let lines: Vec<String> = fs::read_to_string(&log)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(lines.len(), 6);
    for pair in lines.chunks(2) {
        assert_eq!(pair, ["start", "end"]);
    }
}

#[test]
fn dropping_the_session_removes_scratch() {
    let _guard = serial();
    let kit = FakeToolkit::install();
    {
        let session = kit.session();
        session.call(stats().arg("m31")).unwrap();
        assert_eq!(kit.scratch_dirs().len(), 1);
    }
    assert!(kit.scratch_dirs().is_empty());
}

#[test]
fn toolkit_can_be_switched_between_installations() {
    let _guard = serial();
    let kit = FakeToolkit::install();
    let empty = tempfile::tempdir().unwrap();
    fs::create_dir_all(empty.path().join("bin")).unwrap();

    let session = Session::builder()
        .toolkit(ToolkitLocation::new(empty.path()).unwrap())
        .scratch_parent(kit.work.path())
        .build();
    assert!(matches!(
        session.call(stats().arg("m31")).unwrap_err(),
        StarError::CommandNotFound { .. }
    ));

    session.change_toolkit_path(kit.root.path()).unwrap();
    assert!(session.call(stats().arg("m31")).is_ok());
}
