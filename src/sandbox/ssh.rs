//! SSH key discovery and known-hosts maintenance.
//!
//! Container addresses are reused across rebuilds, so a stale known-hosts
//! entry for the address would make the next `ssh` refuse to connect.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::cmd::Cmd;

/// First `*.pub` file in `dir`, in lexicographic order.
pub fn find_public_key(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "ssh:key dir missing");
        return Ok(None);
    }

    let pattern = format!(
        "{}/*.pub",
        glob::Pattern::escape(&dir.to_string_lossy())
    );
    let mut keys: Vec<PathBuf> = glob::glob(&pattern)?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .collect();
    keys.sort();

    let first = keys.into_iter().next();
    debug!(key = ?first, "ssh:public key lookup");
    Ok(first)
}

/// Contents of a public key file, without the trailing newline.
pub fn read_public_key(path: &Path) -> Result<String> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read public key {}", path.display()))?;
    Ok(contents.trim().to_string())
}

/// How a stale host key was dealt with.
#[derive(Debug, PartialEq, Eq)]
pub enum Eviction {
    /// There is no known-hosts file, so nothing can be stale.
    NoKnownHosts,
    /// `ssh-keygen -R` handled it (covers hashed entries).
    SshKeygen,
    /// Plain-text entries were filtered out directly.
    Filtered(usize),
}

/// Remove every known-hosts entry for `host`.
pub fn evict_host_key(known_hosts: &Path, host: &str) -> Result<Eviction> {
    let keygen = which::which("ssh-keygen").ok();
    evict_with(known_hosts, host, keygen.as_deref())
}

fn evict_with(known_hosts: &Path, host: &str, keygen: Option<&Path>) -> Result<Eviction> {
    if !known_hosts.exists() {
        return Ok(Eviction::NoKnownHosts);
    }

    if let Some(keygen) = keygen {
        Cmd::new(keygen.to_string_lossy())
            .args(["-R", host, "-f"])
            .arg(known_hosts.to_string_lossy())
            .run()
            .with_context(|| format!("Failed to remove {} from known hosts", host))?;
        info!(host, "ssh:evicted host key via ssh-keygen");
        return Ok(Eviction::SshKeygen);
    }

    let contents = fs::read_to_string(known_hosts)
        .with_context(|| format!("Failed to read {}", known_hosts.display()))?;
    let (kept, removed) = remove_host_entries(&contents, host);
    if removed > 0 {
        fs::write(known_hosts, kept)
            .with_context(|| format!("Failed to rewrite {}", known_hosts.display()))?;
    }
    info!(host, removed, "ssh:evicted host key");
    Ok(Eviction::Filtered(removed))
}

/// Drop plain-text known-hosts lines naming `host` (bare or `[host]:port`).
/// Returns the remaining contents and the number of lines removed.
pub fn remove_host_entries(contents: &str, host: &str) -> (String, usize) {
    let mut kept = String::with_capacity(contents.len());
    let mut removed = 0;

    for line in contents.split_inclusive('\n') {
        if line_names_host(line, host) {
            removed += 1;
        } else {
            kept.push_str(line);
        }
    }

    (kept, removed)
}

fn line_names_host(line: &str, host: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return false;
    }

    let mut fields = trimmed.split_whitespace();
    let mut hosts = fields.next().unwrap_or_default();
    // Markers such as @cert-authority and @revoked precede the host list
    if hosts.starts_with('@') {
        hosts = fields.next().unwrap_or_default();
    }

    let bracketed = format!("[{}]:", host);
    hosts
        .split(',')
        .any(|h| h == host || h.starts_with(&bracketed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const KNOWN_HOSTS: &str = "\
github.com ssh-ed25519 AAAAgithub
172.17.0.2 ssh-ed25519 AAAAstale
# a comment mentioning 172.17.0.2
172.17.0.20 ssh-ed25519 AAAAother
box,172.17.0.2 ecdsa-sha2-nistp256 AAAAalias
[172.17.0.2]:2222 ssh-ed25519 AAAAported
@revoked 172.17.0.2 ssh-rsa AAAArevoked
|1|c2FsdA==|aGFzaA== ssh-ed25519 AAAAhashed
";

    #[test]
    fn finds_first_public_key_in_order() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("id_rsa.pub"), "ssh-rsa B").unwrap();
        fs::write(temp.path().join("id_ed25519.pub"), "ssh-ed25519 A").unwrap();
        fs::write(temp.path().join("id_ed25519"), "private").unwrap();

        let key = find_public_key(temp.path()).unwrap().unwrap();
        assert_eq!(key.file_name().unwrap(), "id_ed25519.pub");
    }

    #[test]
    fn no_public_key_is_not_an_error() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("config"), "Host *").unwrap();
        assert_eq!(find_public_key(temp.path()).unwrap(), None);
        assert_eq!(find_public_key(&temp.path().join("missing")).unwrap(), None);
    }

    #[test]
    fn key_dir_with_glob_characters_is_escaped() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("keys[1]");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("id.pub"), "ssh-ed25519 A").unwrap();

        assert!(find_public_key(&dir).unwrap().is_some());
    }

    #[test]
    fn read_public_key_trims() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("id.pub");
        fs::write(&path, "ssh-ed25519 AAAA me@host\n").unwrap();
        assert_eq!(read_public_key(&path).unwrap(), "ssh-ed25519 AAAA me@host");
    }

    #[test]
    fn removes_every_plain_entry_for_the_host() {
        let (kept, removed) = remove_host_entries(KNOWN_HOSTS, "172.17.0.2");
        assert_eq!(removed, 4);
        assert!(kept.contains("github.com"));
        assert!(kept.contains("172.17.0.20"));
        assert!(kept.contains("# a comment"));
        assert!(kept.contains("|1|"));
        assert!(!kept.contains("AAAAstale"));
        assert!(!kept.contains("AAAAalias"));
        assert!(!kept.contains("AAAAported"));
        assert!(!kept.contains("AAAArevoked"));
    }

    #[test]
    fn unknown_host_leaves_contents_untouched() {
        let (kept, removed) = remove_host_entries(KNOWN_HOSTS, "10.0.0.1");
        assert_eq!(removed, 0);
        assert_eq!(kept, KNOWN_HOSTS);
    }

    #[test]
    fn fallback_eviction_rewrites_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("known_hosts");
        fs::write(&path, KNOWN_HOSTS).unwrap();

        let outcome = evict_with(&path, "172.17.0.2", None).unwrap();
        assert_eq!(outcome, Eviction::Filtered(4));
        let after = fs::read_to_string(&path).unwrap();
        assert!(!after.contains("AAAAstale"));
        assert!(after.contains("github.com"));
    }

    #[test]
    fn missing_known_hosts_is_a_no_op() {
        let temp = TempDir::new().unwrap();
        let outcome = evict_host_key(&temp.path().join("known_hosts"), "172.17.0.2").unwrap();
        assert_eq!(outcome, Eviction::NoKnownHosts);
    }
}
