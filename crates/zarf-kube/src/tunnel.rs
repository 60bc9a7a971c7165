//! Port-forward tunnels to in-cluster services
//!
//! The connect surface forwards a local port to a named service or pod.
//! Packages label services with `zarf.dev/connect-name` to publish named
//! targets; the registry and git server are always available under their
//! built-in names.

use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, ListParams};
use kube::Client;
use rand::Rng;
use std::process::Stdio;
use tracing::{debug, info};

use crate::error::{KubeError, Result};
use crate::state::ZARF_NAMESPACE;
use zarf_core::{TunnelDescriptor, TunnelResource};

/// Label publishing a service as a named connect target
pub const CONNECT_NAME_LABEL: &str = "zarf.dev/connect-name";

/// Annotation describing a connect target
pub const CONNECT_DESCRIPTION_ANNOTATION: &str = "zarf.dev/connect-description";

/// Annotation overriding the URL path opened for a connect target
pub const CONNECT_URL_ANNOTATION: &str = "zarf.dev/connect-url";

/// Built-in connect target for the in-cluster registry
pub const REGISTRY_TARGET: &str = "REGISTRY";

/// Built-in connect target for the in-cluster git server
pub const GIT_TARGET: &str = "GIT";

/// Where a tunnel attaches
#[derive(Debug, Clone)]
pub struct TunnelInfo {
    pub resource_type: TunnelResource,
    pub name: String,
    pub namespace: String,
    pub local_port: u16,
    pub remote_port: u16,
    pub url_suffix: String,
}

impl TunnelInfo {
    pub fn from_descriptor(descriptor: &TunnelDescriptor) -> Self {
        Self {
            resource_type: descriptor.resource_type,
            name: descriptor.name.clone(),
            namespace: descriptor
                .namespace
                .clone()
                .unwrap_or_else(|| ZARF_NAMESPACE.to_string()),
            local_port: descriptor.local_port,
            remote_port: descriptor.remote_port,
            url_suffix: String::new(),
        }
    }

    /// Overlay non-default flag values onto a discovered target
    pub fn merge_overrides(&mut self, overrides: &TunnelInfo) {
        if !matches!(overrides.resource_type, TunnelResource::Service) {
            self.resource_type = overrides.resource_type;
        }
        if !overrides.name.is_empty() {
            self.name = overrides.name.clone();
        }
        if overrides.namespace != ZARF_NAMESPACE {
            self.namespace = overrides.namespace.clone();
        }
        if overrides.local_port != 0 {
            self.local_port = overrides.local_port;
        }
        if overrides.remote_port != 0 {
            self.remote_port = overrides.remote_port;
        }
    }
}

/// A listing of one named connect target
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    pub name: String,
    pub service: String,
    pub namespace: String,
    pub description: Option<String>,
}

/// Resolve a named target to tunnel info by its connect label. The built-in
/// REGISTRY and GIT names resolve against the zarf namespace services.
pub async fn target_tunnel_info(client: &Client, target: &str) -> Result<TunnelInfo> {
    let (label_value, default_port) = match target {
        REGISTRY_TARGET => ("registry".to_string(), 5000),
        GIT_TARGET => ("git".to_string(), 3000),
        other => (other.to_string(), 0),
    };

    let api: Api<Service> = Api::all(client.clone());
    let params = ListParams::default().labels(&format!("{CONNECT_NAME_LABEL}={label_value}"));
    let services = api.list(&params).await?;
    let service = services.items.first().ok_or_else(|| KubeError::Tunnel {
        message: format!("no service found for connect target {target}"),
    })?;

    let remote_port = service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .and_then(|p| p.first())
        .map(|p| p.port as u16)
        .filter(|p| *p != 0)
        .unwrap_or(default_port);

    let url_suffix = service
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(CONNECT_URL_ANNOTATION))
        .cloned()
        .unwrap_or_default();

    Ok(TunnelInfo {
        resource_type: TunnelResource::Service,
        name: service.metadata.name.clone().unwrap_or_default(),
        namespace: service
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| ZARF_NAMESPACE.to_string()),
        local_port: 0,
        remote_port,
        url_suffix,
    })
}

/// List every published connect target in the cluster
pub async fn list_connect_targets(client: &Client) -> Result<Vec<ConnectTarget>> {
    let api: Api<Service> = Api::all(client.clone());
    let params = ListParams::default().labels(CONNECT_NAME_LABEL);
    let services = api.list(&params).await?;

    Ok(services
        .items
        .into_iter()
        .filter_map(|service| {
            let name = service
                .metadata
                .labels
                .as_ref()?
                .get(CONNECT_NAME_LABEL)?
                .clone();
            Some(ConnectTarget {
                name,
                service: service.metadata.name.clone().unwrap_or_default(),
                namespace: service.metadata.namespace.clone().unwrap_or_default(),
                description: service
                    .metadata
                    .annotations
                    .as_ref()
                    .and_then(|a| a.get(CONNECT_DESCRIPTION_ANNOTATION))
                    .cloned(),
            })
        })
        .collect())
}

/// An open port-forward held by a kubectl child process
pub struct Tunnel {
    child: tokio::process::Child,
    pub local_port: u16,
    pub url_suffix: String,
}

impl Tunnel {
    /// Open the tunnel. A zero local port picks an ephemeral high port.
    pub async fn connect(info: &TunnelInfo) -> Result<Self> {
        let local_port = if info.local_port == 0 {
            rand::thread_rng().gen_range(30000..50000)
        } else {
            info.local_port
        };

        let resource = match info.resource_type {
            TunnelResource::Service => format!("svc/{}", info.name),
            TunnelResource::Pod => format!("pod/{}", info.name),
        };
        info!(
            resource = %resource,
            namespace = %info.namespace,
            local_port,
            remote_port = info.remote_port,
            "opening tunnel"
        );

        let child = tokio::process::Command::new("kubectl")
            .args([
                "port-forward",
                "-n",
                &info.namespace,
                &resource,
                &format!("{local_port}:{}", info.remote_port),
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| KubeError::Tunnel {
                message: format!("failed to run kubectl port-forward: {e}"),
            })?;

        // Give the forwarder a moment to bind before handing out the URL.
        let mut tunnel = Self {
            child,
            local_port,
            url_suffix: info.url_suffix.clone(),
        };
        for _ in 0..50 {
            if tokio::net::TcpStream::connect(("127.0.0.1", local_port))
                .await
                .is_ok()
            {
                return Ok(tunnel);
            }
            if let Ok(Some(status)) = tunnel.child.try_wait() {
                return Err(KubeError::Tunnel {
                    message: format!("port-forward exited early with {status}"),
                });
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        Err(KubeError::Tunnel {
            message: "port-forward never became reachable".into(),
        })
    }

    /// The local URL of the forwarded endpoint
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.local_port, self.url_suffix)
    }

    /// Block until the forwarder exits (connection loss)
    pub async fn wait(&mut self) -> Result<()> {
        let status = self.child.wait().await?;
        debug!(%status, "tunnel closed");
        Ok(())
    }

    pub async fn close(mut self) {
        let _ = self.child.kill().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> TunnelInfo {
        TunnelInfo {
            resource_type: TunnelResource::Service,
            name: "zarf-docker-registry".into(),
            namespace: ZARF_NAMESPACE.into(),
            local_port: 0,
            remote_port: 5000,
            url_suffix: String::new(),
        }
    }

    fn overrides() -> TunnelInfo {
        TunnelInfo {
            resource_type: TunnelResource::Service,
            name: String::new(),
            namespace: ZARF_NAMESPACE.into(),
            local_port: 0,
            remote_port: 0,
            url_suffix: String::new(),
        }
    }

    #[test]
    fn test_merge_keeps_discovered_values_for_defaults() {
        let mut info = base();
        info.merge_overrides(&overrides());
        assert_eq!(info.name, "zarf-docker-registry");
        assert_eq!(info.remote_port, 5000);
        assert_eq!(info.namespace, ZARF_NAMESPACE);
    }

    #[test]
    fn test_merge_applies_explicit_overrides() {
        let mut info = base();
        let mut o = overrides();
        o.resource_type = TunnelResource::Pod;
        o.name = "registry-0".into();
        o.namespace = "custom".into();
        o.local_port = 5001;
        o.remote_port = 5443;
        info.merge_overrides(&o);

        assert!(matches!(info.resource_type, TunnelResource::Pod));
        assert_eq!(info.name, "registry-0");
        assert_eq!(info.namespace, "custom");
        assert_eq!(info.local_port, 5001);
        assert_eq!(info.remote_port, 5443);
    }

    #[test]
    fn test_from_descriptor_defaults_namespace() {
        let descriptor = TunnelDescriptor {
            name: "dashboard".into(),
            remote_port: 8080,
            ..Default::default()
        };
        let info = TunnelInfo::from_descriptor(&descriptor);
        assert_eq!(info.namespace, ZARF_NAMESPACE);
        assert_eq!(info.remote_port, 8080);
    }
}
