// Note to developers extending/debugging this file: When this file throws
// errors or warnings, `cargo -vv build` does not show the output of the
// `println!`s of this file. Resolve all warnings first, trigger a re-build
// (e.g. `touch build.rs`), and run `cargo -vv build` again.

use std::path::PathBuf;
use std::process::{Command, Output};

fn strip_newline(s: String) -> String {
    s.strip_suffix('\n').unwrap_or(&s).into()
}

fn run_cmd(cmd: &str, args: &[&str]) -> Output {
    Command::new(cmd).args(args).output().unwrap()
}

fn run_cmd_strip(cmd: &str, args: &[&str]) -> String {
    let out = run_cmd(cmd, args);
    strip_newline(String::from_utf8(out.stdout).unwrap())
}

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");

    let is_in_git_worktree = run_cmd("git", &["rev-parse", "--is-inside-work-tree"])
        .status
        .success();

    if !is_in_git_worktree {
        print_version(concat!(env!("CARGO_PKG_VERSION"), " at no-git"));
        return;
    }

    let git_root = run_cmd_strip("git", &["rev-parse", "--show-toplevel"]);
    for path in ["Cargo.lock", "Cargo.toml", "build.rs", "src/"] {
        let p = PathBuf::from(&git_root).join(path);
        if p.exists() {
            println!("cargo::rerun-if-changed={}", p.display());
        }
    }

    let mut git_hash = run_cmd_strip("git", &["rev-parse", "--short", "HEAD"]);
    let is_dirty = !run_cmd("git", &["diff-index", "--quiet", "HEAD"])
        .status
        .success();
    if is_dirty {
        git_hash.push_str("-dirty");
    }

    print_version(&format!("{} at {}", env!("CARGO_PKG_VERSION"), git_hash));
}

fn print_version(s: &str) {
    println!("cargo::rustc-env=EXPORTER_BUILD_VERSION={s}");
}
