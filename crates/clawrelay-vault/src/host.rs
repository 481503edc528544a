//! Allowed-host pattern matching

fn normalize(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Whether `host` matches any of `patterns`
///
/// Patterns are exact hostnames or `*.suffix`. A wildcard matches the bare
/// suffix and any subdomain of it, always on a `.` boundary. Comparison is
/// case-insensitive and ignores trailing dots. An empty list matches nothing.
pub fn host_matches<S: AsRef<str>>(host: &str, patterns: &[S]) -> bool {
    let host = normalize(host);
    if host.is_empty() {
        return false;
    }

    patterns.iter().any(|pattern| {
        let pattern = normalize(pattern.as_ref());
        match pattern.strip_prefix("*.") {
            Some(suffix) if !suffix.is_empty() => {
                host == suffix
                    || (host.len() > suffix.len()
                        && host.ends_with(suffix)
                        && host.as_bytes()[host.len() - suffix.len() - 1] == b'.')
            }
            Some(_) => false,
            None => !pattern.is_empty() && host == pattern,
        }
    })
}
