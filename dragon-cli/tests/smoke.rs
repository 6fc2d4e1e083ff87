//! Compiles a real `.drgn` source all the way to a native executable and
//! runs it. Skipped when no C compiler is reachable, since this is the one
//! test in the workspace that shells out to an external toolchain.

use std::fs;
use std::process::Command;

fn have_compiler(cc: &str) -> bool {
    Command::new(cc).arg("--version").output().map(|o| o.status.success()).unwrap_or(false)
}

#[test]
fn hello_world_compiles_and_runs() {
    let cc = if have_compiler("cc") {
        "cc"
    } else if have_compiler("clang") {
        "clang"
    } else if have_compiler("gcc") {
        "gcc"
    } else {
        eprintln!("skipping: no C compiler on PATH");
        return;
    };

    let dir = tempfile::tempdir().expect("tempdir");
    let src_path = dir.path().join("hello.drgn");
    fs::write(&src_path, "def main() -> int { print(\"hi\"); return 0; }\n").expect("write source");

    let exe = env!("CARGO_BIN_EXE_dragon");
    let status = Command::new(exe).arg(&src_path).arg("--run").arg("--compiler").arg(cc).status().expect("invoke dragon");

    assert!(status.success(), "dragon exited with {status}");
}
