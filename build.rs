use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn main() {
    // Prefer an exact release tag, then a short commit, then the crate version
    let version = git(&["describe", "--tags", "--exact-match"])
        .or_else(|| git(&["rev-parse", "--short", "HEAD"]).map(|c| format!("dev-{c}")))
        .unwrap_or_else(|| format!("{}-dev", env!("CARGO_PKG_VERSION")));
    println!("cargo:rustc-env=HULUD_VERSION={version}");

    let commit = git(&["rev-parse", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=HULUD_COMMIT={commit}");

    let build_date = chrono::Utc::now()
        .format("%Y-%m-%d %H:%M:%S UTC")
        .to_string();
    println!("cargo:rustc-env=HULUD_BUILD_DATE={build_date}");

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");
}
