//! End-to-end tests driving the installed binary in a scratch directory.

use std::fs;
use std::process::Command;

fn buildfox() -> Command {
    Command::new(env!("CARGO_BIN_EXE_buildfox"))
}

#[test]
fn generates_ninja_from_manifest() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("build.fox"),
        "rule cc\n  command = cc $in -o $out\nbuild a.o: cc a.c\n",
    )
    .unwrap();

    let status = buildfox()
        .current_dir(dir.path())
        .args(["--no-core"])
        .status()
        .unwrap();
    assert!(status.success());

    let ninja = fs::read_to_string(dir.path().join("build.ninja")).unwrap();
    assert!(ninja.contains("rule cc"));
    assert!(ninja.contains("build a.o: cc a.c"));
}

#[test]
fn writes_to_stdout_with_dash() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("build.fox"), "x = foo\ny = $x-bar\n").unwrap();

    let output = buildfox()
        .current_dir(dir.path())
        .args(["--no-core", "-o", "-"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("y = foo-bar"));
    assert!(!dir.path().join("build.ninja").exists());
}

#[test]
fn core_manifest_provides_auto_rules() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("main.c"), "int main(void) { return 0; }\n").unwrap();
    fs::write(
        dir.path().join("build.fox"),
        "build objects(*): auto *.c\nbuild binaries(app): auto objects(*)\n",
    )
    .unwrap();

    let output = buildfox()
        .current_dir(dir.path())
        .args(["-o", "-"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("build main.o: compile_c main.c"));
    assert!(stdout.contains("build app: link main.o"));
}

#[test]
fn defines_preset_variables() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("build.fox"), "y = $x-bar\n").unwrap();

    let output = buildfox()
        .current_dir(dir.path())
        .args(["--no-core", "-D", "x=foo", "-o", "-"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("y = foo-bar"));
}

#[test]
fn errors_are_positional_and_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("build.fox"),
        "build x.o: phony a\nbuild x.o: phony b\n",
    )
    .unwrap();

    let output = buildfox()
        .current_dir(dir.path())
        .args(["--no-core", "-o", "-"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("build.fox:2"), "stderr: {stderr}");
}
