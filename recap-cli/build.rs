use std::path::Path;
use std::process::Command;

const VERSION_ENV: &str = "RECAP_BUILD_SHA";

/// Trimmed stdout of a successful git command run at `root`.
fn git(root: &Path, args: &[&str]) -> Option<String> {
    let out = Command::new("git").arg("-C").arg(root).args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&out.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn main() {
    println!("cargo:rerun-if-env-changed={}", VERSION_ENV);

    // Source tarballs have no .git; packagers pass the revision in.
    let revision = std::env::var(VERSION_ENV).ok().filter(|v| !v.trim().is_empty());

    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());
    let workspace = Path::new(&manifest_dir).join("..");
    let revision = revision
        .or_else(|| git(&workspace, &["describe", "--always", "--dirty", "--abbrev=10"]))
        .unwrap_or_else(|| "unknown".to_string());

    if let Some(git_dir) = git(&workspace, &["rev-parse", "--absolute-git-dir"]) {
        println!("cargo:rerun-if-changed={}/HEAD", git_dir);
        println!("cargo:rerun-if-changed={}/index", git_dir);
    }
    println!("cargo:rustc-env={}={}", VERSION_ENV, revision);
}
