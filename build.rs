//! Stamps the binary with its version: the crate version on a release tag,
//! `dev@<hash>` (plus `-dirty` for uncommitted changes) anywhere else.

use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");
    println!("cargo:rerun-if-changed=.git/index");

    let on_release_tag = git(&["describe", "--exact-match", "--tags", "HEAD"]).is_some();
    let version = if on_release_tag {
        std::env::var("CARGO_PKG_VERSION").unwrap_or_default()
    } else {
        match git(&["rev-parse", "--short", "HEAD"]) {
            Some(hash) if !hash.is_empty() => {
                let dirty = git(&["status", "--porcelain", "--untracked-files=no"])
                    .is_some_and(|s| !s.is_empty());
                format!("dev@{hash}{}", if dirty { "-dirty" } else { "" })
            }
            _ => "dev@unknown".to_string(),
        }
    };

    println!("cargo:rustc-env=IMAGENET_CACHE_VERSION={version}");
}
