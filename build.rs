// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

fn main() {
    // Re-run build script if git HEAD changes
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");
    println!("cargo::rerun-if-env-changed=XR_DEPTH_VERSION");

    // Packagers may pin the version explicitly
    let version = std::env::var("XR_DEPTH_VERSION").unwrap_or_else(|_| git_version());

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

/// "0.1.0-abcdef1" on a tag, "0.1.0-dirty-abcdef1" after it, the package
/// version outside a git checkout
fn git_version() -> String {
    let described = git(&["describe", "--tags", "--always", "--match", "v*"]);
    let hash = git(&["rev-parse", "--short", "HEAD"]);

    match (described, hash) {
        (Some(described), Some(hash)) => {
            let described = described.strip_prefix('v').unwrap_or(&described);
            let parts: Vec<&str> = described.rsplitn(3, '-').collect();
            if parts.len() >= 3 {
                format!("{}-dirty-{}", parts[2], hash)
            } else if described == hash {
                // No tag yet
                format!("{}-{}", env!("CARGO_PKG_VERSION"), hash)
            } else {
                format!("{}-{}", described, hash)
            }
        }
        _ => env!("CARGO_PKG_VERSION").to_string(),
    }
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}
