//! `$PATH` lookup for external commands.

use std::path::PathBuf;

fn is_executable(path: &std::path::Path) -> bool {
    nix::unistd::access(path, nix::unistd::AccessFlags::X_OK).is_ok()
}

/// Searches the current `$PATH` for an executable named `filename`,
/// returning the first hit.
pub fn find_executable(filename: &str) -> Option<PathBuf> {
    let path_var = std::env::var("PATH").unwrap_or_default();

    for dir in path_var.split(':').filter(|d| !d.is_empty()) {
        let candidate = PathBuf::from(dir).join(filename);
        if candidate.is_file() && is_executable(&candidate) {
            return Some(candidate);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_sh_on_default_paths() {
        // /bin/sh exists on any Unix this shell targets.
        assert!(find_executable("sh").is_some());
    }

    #[test]
    fn misses_nonexistent_commands() {
        assert!(find_executable("definitely-not-a-command-zzz").is_none());
    }
}
