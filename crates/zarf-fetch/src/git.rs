//! Git repository fetching
//!
//! All git commands shell out to the `git` binary with explicit args and
//! prompts disabled; nothing here reads system git configuration.

use std::path::Path;
use tokio::process::Command;

use crate::error::{FetchError, Result};

/// Split a repo source into the clone URL and an optional ref. Refs ride
/// either a trailing `#<ref>` or a trailing `@<tag>` on the final path
/// segment (so `git@host:` remotes survive).
pub fn split_ref(source: &str) -> (String, Option<String>) {
    if let Some((url, fragment)) = source.rsplit_once('#') {
        return (url.to_string(), Some(fragment.to_string()));
    }
    if let Some(at) = source.rfind('@') {
        let last_slash = source.rfind('/').unwrap_or(0);
        if at > last_slash {
            return (
                source[..at].to_string(),
                Some(source[at + 1..].to_string()),
            );
        }
    }
    (source.to_string(), None)
}

/// Shallow-clone a repository at an optional ref
pub async fn shallow_clone(source: &str, dest: &Path) -> Result<()> {
    let (url, reference) = split_ref(source);
    tracing::info!(url = %url, reference = ?reference, "cloning repository");

    let mut args = vec!["clone", "--depth", "1"];
    if let Some(r) = reference.as_deref() {
        args.extend(["--branch", r]);
    }
    let dest_str = dest.to_string_lossy().to_string();
    args.push(&url);
    args.push(&dest_str);

    if run_git(&args, None).await.is_ok() {
        return Ok(());
    }

    // Branch/tag clone failed; the ref may be a commit sha, which needs a
    // full clone followed by a checkout.
    let _ = tokio::fs::remove_dir_all(dest).await;
    run_git(&["clone", &url, &dest_str], None)
        .await
        .map_err(|message| FetchError::Git {
            url: url.clone(),
            message,
        })?;
    if let Some(r) = reference.as_deref() {
        run_git(&["checkout", r], Some(dest))
            .await
            .map_err(|message| FetchError::Git { url, message })?;
    }
    Ok(())
}

async fn run_git(args: &[&str], cwd: Option<&Path>) -> std::result::Result<(), String> {
    let mut command = Command::new("git");
    command
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GIT_CONFIG_NOSYSTEM", "1");
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    let output = command.output().await.map_err(|e| e.to_string())?;
    if output.status.success() {
        Ok(())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_hash_ref() {
        let (url, reference) = split_ref("https://github.com/acme/app.git#feature/x");
        assert_eq!(url, "https://github.com/acme/app.git");
        assert_eq!(reference.as_deref(), Some("feature/x"));
    }

    #[test]
    fn test_split_at_tag() {
        let (url, reference) = split_ref("https://github.com/acme/app.git@v1.2.3");
        assert_eq!(url, "https://github.com/acme/app.git");
        assert_eq!(reference.as_deref(), Some("v1.2.3"));
    }

    #[test]
    fn test_scp_remote_at_is_not_a_tag() {
        let (url, reference) = split_ref("git@github.com:acme/app.git");
        assert_eq!(url, "git@github.com:acme/app.git");
        assert_eq!(reference, None);
    }

    #[test]
    fn test_plain_url_has_no_ref() {
        let (url, reference) = split_ref("https://github.com/acme/app.git");
        assert_eq!(url, "https://github.com/acme/app.git");
        assert_eq!(reference, None);
    }
}
