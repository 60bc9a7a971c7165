//! `zarf connect`

use console::style;

use zarf_core::TunnelResource;
use zarf_kube::{list_connect_targets, target_tunnel_info, Cluster, Tunnel, TunnelInfo};

use crate::error::{CliError, Result};
use crate::exit_codes;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    target: Option<String>,
    name: &str,
    namespace: &str,
    resource_type: &str,
    local_port: u16,
    remote_port: u16,
    cli_only: bool,
    list: bool,
) -> Result<()> {
    let cluster = Cluster::connect()
        .await
        .map_err(|e| CliError::new(e.to_string(), exit_codes::CONNECT_FAILED))?;

    if list {
        let targets = list_connect_targets(cluster.client())
            .await
            .map_err(|e| CliError::new(e.to_string(), exit_codes::CONNECT_FAILED))?;
        if targets.is_empty() {
            println!("No connect targets published in this cluster");
            return Ok(());
        }
        for target in targets {
            println!(
                "{:<20} {:<30} {}",
                style(&target.name).cyan(),
                format!("{}/{}", target.namespace, target.service),
                target.description.unwrap_or_default(),
            );
        }
        return Ok(());
    }

    let overrides = TunnelInfo {
        resource_type: parse_resource_type(resource_type)?,
        name: name.to_string(),
        namespace: namespace.to_string(),
        local_port,
        remote_port,
        url_suffix: String::new(),
    };

    let info = match &target {
        Some(target) => {
            let mut info = target_tunnel_info(cluster.client(), target)
                .await
                .map_err(|e| CliError::new(e.to_string(), exit_codes::CONNECT_FAILED))?;
            info.merge_overrides(&overrides);
            info
        }
        None if !name.is_empty() && remote_port != 0 => overrides,
        None => {
            return Err(CliError::new(
                "pass a connect target, or --name and --remote-port",
                exit_codes::CONNECT_FAILED,
            ))
        }
    };

    let mut tunnel = Tunnel::connect(&info)
        .await
        .map_err(|e| CliError::new(e.to_string(), exit_codes::CONNECT_FAILED))?;
    let url = tunnel.url();

    // The bare URL goes to stdout for other tools to consume.
    println!("{url}");
    if cli_only {
        eprintln!(
            "{} tunnel established at {url}, Ctrl-C to close",
            style("ok:").green()
        );
    } else {
        eprintln!(
            "{} tunnel established, opening {url} (Ctrl-C to close)",
            style("ok:").green()
        );
        let _ = open_browser(&url).await;
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            eprintln!("tunnel closed");
            tunnel.close().await;
            Ok(())
        }
        result = tunnel.wait() => match result {
            Ok(()) => Err(CliError::new(
                "lost connection to the service",
                exit_codes::CONNECT_FAILED,
            )),
            Err(e) => Err(CliError::new(e.to_string(), exit_codes::CONNECT_FAILED)),
        },
    }
}

fn parse_resource_type(value: &str) -> Result<TunnelResource> {
    match value {
        "svc" | "service" => Ok(TunnelResource::Service),
        "pod" => Ok(TunnelResource::Pod),
        other => Err(CliError::new(
            format!("unknown resource type {other}; expected svc or pod"),
            exit_codes::CONNECT_FAILED,
        )),
    }
}

async fn open_browser(url: &str) -> std::io::Result<()> {
    let opener = if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(target_os = "windows") {
        "explorer"
    } else {
        "xdg-open"
    };
    tokio::process::Command::new(opener)
        .arg(url)
        .spawn()
        .map(|_| ())
}
