//! Data injection into running containers
//!
//! Injection streams a tar of the source directory through `kubectl exec`
//! into the target container, strictly after the target pod reports Ready.

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{KubeError, Result};
use zarf_core::ZarfDataInjection;

const POD_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Copies package data into pods selected by label
pub struct DataInjector {
    client: Client,
}

impl DataInjector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Inject one dataset, waiting for the target pod to become Ready first
    pub async fn inject(
        &self,
        injection: &ZarfDataInjection,
        source: &Path,
        timeout: Duration,
    ) -> Result<()> {
        let target = &injection.target;
        let pod = self
            .wait_for_ready_pod(&target.namespace, &target.selector, timeout)
            .await?;
        info!(
            pod = %pod,
            container = %target.container,
            path = %target.path,
            "injecting data"
        );

        let archive = build_tar(source, injection.compress)?;
        self.stream_tar(&pod, injection, &archive).await
    }

    /// The first pod matching the selector with a Ready=True condition
    async fn wait_for_ready_pod(
        &self,
        namespace: &str,
        selector: &str,
        timeout: Duration,
    ) -> Result<String> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(selector);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let pods = api.list(&params).await?;
            if let Some(pod) = pods.items.iter().find(|p| is_ready(p)) {
                if let Some(name) = &pod.metadata.name {
                    return Ok(name.clone());
                }
            }
            debug!(selector, "no ready pod yet");
            if tokio::time::Instant::now() + POD_POLL_INTERVAL > deadline {
                return Err(KubeError::WaitTimeout {
                    what: format!("ready pod matching {selector}"),
                    seconds: timeout.as_secs(),
                });
            }
            tokio::time::sleep(POD_POLL_INTERVAL).await;
        }
    }

    async fn stream_tar(
        &self,
        pod: &str,
        injection: &ZarfDataInjection,
        archive: &[u8],
    ) -> Result<()> {
        let target = &injection.target;
        let unpack = if injection.compress { "-xzf" } else { "-xf" };
        let mut child = tokio::process::Command::new("kubectl")
            .args([
                "exec",
                "-i",
                "-n",
                &target.namespace,
                pod,
                "-c",
                &target.container,
                "--",
                "tar",
                unpack,
                "-",
                "-C",
                &target.path,
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| KubeError::DataInjection {
                selector: target.selector.clone(),
                message: format!("failed to run kubectl: {e}"),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(archive)
                .await
                .map_err(|e| KubeError::DataInjection {
                    selector: target.selector.clone(),
                    message: format!("failed to stream archive: {e}"),
                })?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| KubeError::DataInjection {
                selector: target.selector.clone(),
                message: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(KubeError::DataInjection {
                selector: target.selector.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Pod readiness from its status conditions
fn is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

/// Tar the source (a directory or single file), optionally gzipped
fn build_tar(source: &Path, compress: bool) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    if source.is_dir() {
        builder.append_dir_all(".", source)?;
    } else {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "data".into());
        let mut file = std::fs::File::open(source)?;
        builder.append_file(name, &mut file)?;
    }
    let raw = builder.into_inner()?;

    if !compress {
        return Ok(raw);
    }
    let mut encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    std::io::Write::write_all(&mut encoder, &raw)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_pod_readiness() {
        let ready: Pod = serde_json::from_value(json!({
            "metadata": { "name": "p" },
            "status": { "conditions": [{ "type": "Ready", "status": "True" }] },
        }))
        .unwrap();
        assert!(is_ready(&ready));

        let pending: Pod = serde_json::from_value(json!({
            "metadata": { "name": "p" },
            "status": { "conditions": [{ "type": "Ready", "status": "False" }] },
        }))
        .unwrap();
        assert!(!is_ready(&pending));

        let no_status: Pod = serde_json::from_value(json!({
            "metadata": { "name": "p" },
        }))
        .unwrap();
        assert!(!is_ready(&no_status));
    }

    #[test]
    fn test_build_tar_roundtrip() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("data.csv"), "a,b\n1,2\n").unwrap();

        let raw = build_tar(temp.path(), false).unwrap();
        let mut archive = tar::Archive::new(raw.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert!(names.iter().any(|n| n.contains("data.csv")));
    }

    #[test]
    fn test_build_tar_gzip_magic() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("data.csv"), "a,b\n").unwrap();
        let gz = build_tar(temp.path(), true).unwrap();
        assert_eq!(&gz[..2], &[0x1f, 0x8b]);
    }
}
