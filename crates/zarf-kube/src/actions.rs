//! Action engine: ordered shell commands and wait conditions
//!
//! Each action runs inside its set's default context merged with per-action
//! overrides. Commands run through the OS shell with a wall-clock timeout and
//! fixed-delay retries; wait actions poll cluster or network conditions.
//! Within a set, `before` runs ahead of the component's primary work and
//! `after` follows it; `onSuccess` fires only when everything succeeded, and
//! `onFailure` fires when anything failed.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{KubeError, Result};
use crate::release::ResourceManager;
use crate::wait::{wait_cluster, wait_network, DEFAULT_WAIT_TIMEOUT};
use zarf_core::{Action, ActionDefaults, ShellPreference, VariableConfig};

/// Fixed delay between command retries
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Everything an action needs from its surroundings
pub struct ActionContext<'a> {
    pub variables: &'a VariableConfig,
    /// Present only when a cluster connection exists; cluster waits fail
    /// without one
    pub resources: Option<&'a ResourceManager>,
}

impl<'a> ActionContext<'a> {
    pub fn new(variables: &'a VariableConfig) -> Self {
        Self {
            variables,
            resources: None,
        }
    }

    pub fn with_cluster(mut self, resources: &'a ResourceManager) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Run an ordered action list, stopping at the first failure
    pub async fn run_list(&self, defaults: &ActionDefaults, actions: &[Action]) -> Result<()> {
        for action in actions {
            self.run_action(defaults, action).await?;
        }
        Ok(())
    }

    /// Run one action with merged defaults
    pub async fn run_action(&self, defaults: &ActionDefaults, action: &Action) -> Result<()> {
        if let Some(cmd) = &action.cmd {
            return self.run_command(defaults, action, cmd).await;
        }
        if let Some(wait) = &action.wait {
            return self.run_wait(defaults, action, wait).await;
        }
        Err(KubeError::ActionFailed {
            description: describe(action),
            message: "action has neither cmd nor wait".into(),
        })
    }

    async fn run_command(
        &self,
        defaults: &ActionDefaults,
        action: &Action,
        cmd: &str,
    ) -> Result<()> {
        let cmd = self.variables.substitute(cmd)?;
        let mute = action.mute.unwrap_or(defaults.mute)
            || action.set_variables.iter().any(|v| v.sensitive);
        let retries = action.retries.unwrap_or(defaults.retries);
        let timeout_secs = action
            .max_total_seconds
            .unwrap_or(defaults.max_total_seconds);
        let timeout = (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs));

        let dir = match action.dir.as_ref().or(defaults.dir.as_ref()) {
            Some(dir) => Some(self.variables.substitute(dir)?),
            None => None,
        };
        let mut env = Vec::new();
        for pair in defaults.env.iter().chain(action.env.iter()) {
            env.push(self.variables.substitute(pair)?);
        }
        let shell = action.shell.as_ref().unwrap_or(&defaults.shell);

        let description = describe(action);
        info!(action = %description, "running action");

        let mut attempt = 0;
        loop {
            attempt += 1;
            match run_shell(&cmd, shell, dir.as_deref(), &env, timeout, mute).await {
                Ok(stdout) => {
                    for variable in &action.set_variables {
                        self.variables
                            .set_captured(variable, stdout.trim().to_string())?;
                    }
                    return Ok(());
                }
                Err(message) if attempt <= retries => {
                    warn!(
                        action = %description,
                        attempt,
                        error = %message,
                        "action failed, retrying"
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(message) => {
                    return Err(KubeError::ActionFailed {
                        description,
                        message,
                    });
                }
            }
        }
    }

    async fn run_wait(
        &self,
        defaults: &ActionDefaults,
        action: &Action,
        wait: &zarf_core::ActionWait,
    ) -> Result<()> {
        let timeout_secs = action
            .max_total_seconds
            .unwrap_or(defaults.max_total_seconds);
        let timeout = if timeout_secs > 0 {
            Duration::from_secs(timeout_secs)
        } else {
            DEFAULT_WAIT_TIMEOUT
        };

        if let Some(cluster) = &wait.cluster {
            let resources = self.resources.ok_or_else(|| KubeError::ActionFailed {
                description: describe(action),
                message: "cluster wait requires a cluster connection".into(),
            })?;
            return wait_cluster(resources, cluster, timeout).await;
        }
        if let Some(network) = &wait.network {
            return wait_network(network, timeout).await;
        }
        Err(KubeError::ActionFailed {
            description: describe(action),
            message: "wait has neither cluster nor network".into(),
        })
    }
}

fn describe(action: &Action) -> String {
    if let Some(description) = &action.description {
        return description.clone();
    }
    if let Some(cmd) = &action.cmd {
        return cmd.clone();
    }
    "wait".to_string()
}

/// Pick the shell for this OS: the per-OS preference when set, otherwise
/// `sh -e -c` (powershell on Windows)
fn shell_command(pref: &ShellPreference, cmd: &str) -> (String, Vec<String>) {
    let chosen = if cfg!(target_os = "windows") {
        pref.windows.clone().unwrap_or_else(|| "powershell".into())
    } else if cfg!(target_os = "macos") {
        pref.darwin.clone().unwrap_or_else(|| "sh".into())
    } else {
        pref.linux.clone().unwrap_or_else(|| "sh".into())
    };

    if chosen.contains("powershell") || chosen.contains("pwsh") {
        (chosen, vec!["-Command".into(), cmd.into()])
    } else {
        (chosen, vec!["-e".into(), "-c".into(), cmd.into()])
    }
}

async fn run_shell(
    cmd: &str,
    shell: &ShellPreference,
    dir: Option<&str>,
    env: &[String],
    timeout: Option<Duration>,
    mute: bool,
) -> std::result::Result<String, String> {
    let (program, args) = shell_command(shell, cmd);
    let mut command = tokio::process::Command::new(&program);
    command.args(&args).kill_on_drop(true);
    if let Some(dir) = dir {
        command.current_dir(dir);
    }
    for pair in env {
        if let Some((key, value)) = pair.split_once('=') {
            command.env(key, value);
        }
    }

    let output = match timeout {
        // kill_on_drop reaps the child when the timeout drops the future
        Some(limit) => tokio::time::timeout(limit, command.output())
            .await
            .map_err(|_| format!("timed out after {}s", limit.as_secs()))?,
        None => command.output().await,
    }
    .map_err(|e| format!("failed to start {program}: {e}"))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !mute {
        for line in stdout.lines().chain(stderr.lines()) {
            println!("  {line}");
        }
    } else {
        debug!(bytes = output.stdout.len(), "action output muted");
    }

    if output.status.success() {
        Ok(stdout)
    } else {
        Err(format!(
            "exit {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zarf_core::VariableDef;

    fn variables() -> VariableConfig {
        VariableConfig::new(&[], &[]).unwrap()
    }

    #[tokio::test]
    async fn test_command_runs_and_captures_variable() {
        let vars = variables();
        let ctx = ActionContext::new(&vars);
        let action = Action {
            cmd: Some("echo hello-zarf".into()),
            mute: Some(true),
            set_variables: vec![VariableDef {
                name: "GREETING".into(),
                ..Default::default()
            }],
            ..Default::default()
        };

        ctx.run_action(&ActionDefaults::default(), &action)
            .await
            .unwrap();
        assert_eq!(vars.resolve("GREETING").unwrap(), "hello-zarf");
    }

    #[tokio::test]
    async fn test_captured_variable_usable_by_next_action() {
        let vars = variables();
        let ctx = ActionContext::new(&vars);
        let defaults = ActionDefaults::default();

        let first = Action {
            cmd: Some("echo v1.2.3".into()),
            mute: Some(true),
            set_variables: vec![VariableDef {
                name: "APP_VERSION".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let second = Action {
            cmd: Some("test \"###ZARF_VAR_APP_VERSION###\" = v1.2.3".into()),
            mute: Some(true),
            ..Default::default()
        };
        ctx.run_list(&defaults, &[first, second]).await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_command_surfaces_exit() {
        let vars = variables();
        let ctx = ActionContext::new(&vars);
        let action = Action {
            cmd: Some("exit 3".into()),
            mute: Some(true),
            ..Default::default()
        };
        let err = ctx
            .run_action(&ActionDefaults::default(), &action)
            .await
            .unwrap_err();
        match err {
            KubeError::ActionFailed { message, .. } => assert!(message.contains("exit 3")),
            other => panic!("expected ActionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let vars = variables();
        let ctx = ActionContext::new(&vars);
        let action = Action {
            cmd: Some("sleep 30".into()),
            mute: Some(true),
            max_total_seconds: Some(1),
            ..Default::default()
        };
        let start = std::time::Instant::now();
        let err = ctx
            .run_action(&ActionDefaults::default(), &action)
            .await
            .unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(10));
        match err {
            KubeError::ActionFailed { message, .. } => {
                assert!(message.contains("timed out"))
            }
            other => panic!("expected ActionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pattern_mismatch_aborts_capture() {
        let declared = vec![VariableDef {
            name: "PORT".into(),
            pattern: Some("^[0-9]+$".into()),
            ..Default::default()
        }];
        let vars = VariableConfig::new(&[], &declared).unwrap();
        let ctx = ActionContext::new(&vars);
        let action = Action {
            cmd: Some("echo not-a-port".into()),
            mute: Some(true),
            set_variables: vec![VariableDef {
                name: "PORT".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let err = ctx
            .run_action(&ActionDefaults::default(), &action)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KubeError::Core(zarf_core::CoreError::VariableValidation { .. })
        ));
    }

    #[tokio::test]
    async fn test_env_and_dir_apply() {
        let dir = tempfile::tempdir().unwrap();
        let vars = variables();
        let ctx = ActionContext::new(&vars);
        let action = Action {
            cmd: Some("test \"$MODE\" = airgap && pwd".into()),
            mute: Some(true),
            env: vec!["MODE=airgap".into()],
            dir: Some(dir.path().display().to_string()),
            set_variables: vec![VariableDef {
                name: "WORKDIR".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        ctx.run_action(&ActionDefaults::default(), &action)
            .await
            .unwrap();
        let captured = vars.resolve("WORKDIR").unwrap();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(
            std::path::Path::new(&captured).canonicalize().unwrap(),
            expected
        );
    }

    #[test]
    fn test_shell_selection_defaults() {
        let (program, args) = shell_command(&ShellPreference::default(), "echo hi");
        if cfg!(target_os = "windows") {
            assert_eq!(program, "powershell");
            assert_eq!(args[0], "-Command");
        } else {
            assert_eq!(program, "sh");
            assert_eq!(args, vec!["-e", "-c", "echo hi"]);
        }
    }

    #[test]
    fn test_shell_preference_override() {
        let pref = ShellPreference {
            linux: Some("bash".into()),
            darwin: Some("bash".into()),
            windows: Some("pwsh".into()),
        };
        let (program, args) = shell_command(&pref, "echo hi");
        if cfg!(target_os = "windows") {
            assert_eq!(program, "pwsh");
            assert_eq!(args[0], "-Command");
        } else {
            assert_eq!(program, "bash");
            assert_eq!(args[0], "-e");
        }
    }
}
