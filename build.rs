fn main() {
    // Embed UTC build timestamp so the startup banner can report it.
    let now = time_now_utc();
    println!("cargo:rustc-env=S3GW_BUILD_TIME={now}");
}

/// UTC timestamp from the system `date` binary; "unknown" when unavailable.
fn time_now_utc() -> String {
    use std::process::Command;
    Command::new("date")
        .args(["-u", "+%Y-%m-%dT%H:%M:%SZ"])
        .output()
        .ok()
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
