//! Local host identity used for port checks and reachability probes

/// Resolve the host name the harness binds and connects to.
///
/// `HOSTNAME` from the environment wins; otherwise the OS-reported
/// hostname; `localhost` if neither is available.
pub fn local_hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        let name = name.trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }

    os_hostname().unwrap_or_else(|| "localhost".to_string())
}

#[cfg(unix)]
fn os_hostname() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
}

#[cfg(not(unix))]
fn os_hostname() -> Option<String> {
    None
}

/// Format a `host:port` address the way handles report it
pub fn address(host: &str, port: u16) -> String {
    format!("{}:{}", host, port)
}
