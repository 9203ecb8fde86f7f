use std::process::Command;

fn main() {
    // Resolve the Git commit hash for the health endpoint.
    let git_hash = {
        let output = Command::new("git").args(["rev-parse", "HEAD"]).output();
        match output {
            Ok(output) => {
                if output.status.success() {
                    String::from_utf8_lossy(&output.stdout).trim().to_string()
                } else {
                    "unknown".to_string()
                }
            }
            Err(_) => "unknown".to_string(),
        }
    };

    println!("cargo:rustc-env=GIT_COMMIT_HASH={}", git_hash);

    // Rebuild if the Git commit changes (only works when .git directory is available)
    if std::path::Path::new(".git/HEAD").exists() {
        println!("cargo:rerun-if-changed=.git/HEAD");
        println!("cargo:rerun-if-changed=.git/refs/heads");
    }
}
