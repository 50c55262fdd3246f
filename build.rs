use std::process::Command;

fn main() {
    // git version, empty outside a checkout
    let git_hash = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .unwrap_or_default();

    println!("cargo:rustc-env=GIT_HASH={}", git_hash.trim());

    // media tools are invoked at runtime; warn early when they are missing
    for tool in ["ffmpeg", "ffprobe", "sox"] {
        if Command::new(tool).arg("--version").output().is_err() {
            println!("cargo:warning={} not found in PATH, some operations will fail", tool);
        }
    }
}
