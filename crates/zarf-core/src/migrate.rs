//! Schema-version migration pipeline
//!
//! Packages written against the v1alpha1 schema are migrated to v1 at load
//! time by a fixed, named chain of value rewrites. Migration is a pure
//! function of the input document: the same manifest always produces the
//! same migrated package and the same applied-migration list.

use serde_yaml::{Mapping, Value};

use crate::error::{CoreError, Result};
use crate::types::{ZarfPackage, API_VERSION_V0, API_VERSION_V1};

/// Outcome of loading a manifest through the migration chain
#[derive(Debug)]
pub struct Migrated {
    pub package: ZarfPackage,
    /// Names of the migrations that changed the document, in chain order
    pub applied: Vec<String>,
}

struct Migration {
    name: &'static str,
    apply: fn(&mut Value) -> bool,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "scripts-to-actions",
        apply: migrate_scripts,
    },
    Migration {
        name: "set-variable-to-set-variables",
        apply: migrate_set_variable,
    },
    Migration {
        name: "required-tri-state",
        apply: migrate_optional,
    },
    Migration {
        name: "no-wait-to-wait",
        apply: migrate_no_wait,
    },
    Migration {
        name: "yolo-to-airgap",
        apply: migrate_yolo,
    },
    Migration {
        name: "max-retries-to-retries",
        apply: migrate_max_retries,
    },
    Migration {
        name: "aggregate-checksum-to-build",
        apply: migrate_aggregate_checksum,
    },
    Migration {
        name: "metadata-to-annotations",
        apply: migrate_metadata_annotations,
    },
    Migration {
        name: "wait-actions-to-waits",
        apply: migrate_wait_actions,
    },
    Migration {
        name: "chart-url-to-sources",
        apply: migrate_chart_sources,
    },
];

/// Load a manifest document, migrating v1alpha1 to the current schema
pub fn migrate(mut doc: Value) -> Result<Migrated> {
    let api_version = get(&doc, "apiVersion")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    check_deprecations(&doc)?;

    let mut applied = Vec::new();
    match api_version.as_str() {
        API_VERSION_V1 => {}
        API_VERSION_V0 => {
            for migration in MIGRATIONS {
                if (migration.apply)(&mut doc) {
                    applied.push(migration.name.to_string());
                }
            }
            set(&mut doc, "apiVersion", Value::from(API_VERSION_V1));
        }
        other => {
            return Err(CoreError::UnknownApiVersion {
                api_version: other.to_string(),
            })
        }
    }

    let package: ZarfPackage = serde_yaml::from_value(doc)?;
    Ok(Migrated { package, applied })
}

/// Render the legacy v1alpha1 view of a package for the `zarf.yaml` layout
/// file. This is the inverse of the value migrations above, so packages built
/// at v1 stay loadable by older tooling.
pub fn downgrade_to_v0(package: &ZarfPackage) -> Result<Value> {
    let mut doc = serde_yaml::to_value(package)?;
    set(&mut doc, "apiVersion", Value::from(API_VERSION_V0));

    if let Some(metadata) = get_mut(&mut doc, "metadata") {
        if let Some(airgap) = remove(metadata, "airgap") {
            if airgap.as_bool() == Some(false) {
                set(metadata, "yolo", Value::from(true));
            }
        }
    }
    let aggregate = get(&doc, "build")
        .and_then(|b| get(b, "aggregateChecksum"))
        .cloned();
    if let Some(aggregate) = aggregate {
        if let Some(metadata) = get_mut(&mut doc, "metadata") {
            set(metadata, "aggregateChecksum", aggregate);
        }
    }

    for component in components_mut(&mut doc) {
        if let Some(charts) = get_mut(component, "charts").and_then(Value::as_sequence_mut) {
            for chart in charts {
                if let Some(helm) = remove(chart, "helm") {
                    if let Some(url) = get(&helm, "url") {
                        set(chart, "url", url.clone());
                    }
                    if let Some(repo_name) = get(&helm, "repoName") {
                        set(chart, "repoName", repo_name.clone());
                    }
                } else if let Some(git) = remove(chart, "git") {
                    if let Some(url) = get(&git, "url") {
                        set(chart, "url", url.clone());
                    }
                    if let Some(path) = get(&git, "path") {
                        set(chart, "gitPath", path.clone());
                    }
                } else if let Some(oci) = remove(chart, "oci") {
                    if let Some(url) = get(&oci, "url") {
                        set(chart, "url", url.clone());
                    }
                } else if let Some(local) = remove(chart, "local") {
                    if let Some(path) = get(&local, "path") {
                        set(chart, "localPath", path.clone());
                    }
                }
                downgrade_wait_flag(chart);
            }
        }
        if let Some(manifests) = get_mut(component, "manifests").and_then(Value::as_sequence_mut)
        {
            for manifest in manifests {
                downgrade_wait_flag(manifest);
            }
        }
        if let Some(waits) = remove(component, "waits").and_then(|w| match w {
            Value::Sequence(seq) => Some(seq),
            _ => None,
        }) {
            let actions: Vec<Value> = waits
                .into_iter()
                .map(|cluster| {
                    let mut wait = Mapping::new();
                    wait.insert(Value::from("cluster"), cluster);
                    let mut action = Mapping::new();
                    action.insert(Value::from("wait"), Value::Mapping(wait));
                    Value::Mapping(action)
                })
                .collect();
            let on_deploy = ensure_map(ensure_map(component, "actions"), "onDeploy");
            extend_list(on_deploy, "after", actions);
        }
    }

    let mut rename = |value: &mut Value| {
        if let Some(retries) = remove(value, "retries") {
            set(value, "maxRetries", retries);
        }
    };
    for_each_action(&mut doc, &mut rename);
    for_each_action_defaults(&mut doc, &mut rename);

    Ok(doc)
}

fn downgrade_wait_flag(item: &mut Value) {
    if let Some(wait) = remove(item, "wait") {
        if wait.as_bool() == Some(false) {
            set(item, "noWait", Value::from(true));
        }
    }
}

/// Deprecated fields with no migration path
fn check_deprecations(doc: &Value) -> Result<()> {
    for component in components(doc) {
        if get(component, "cosignKeyPath").is_some() {
            return Err(CoreError::UnsupportedDeprecation {
                field: "cosignKeyPath".into(),
                message: "per-component signing keys were removed; sign the package instead"
                    .into(),
            });
        }
        if get(component, "group").is_some() {
            return Err(CoreError::UnsupportedDeprecation {
                field: "group".into(),
                message: "component groups were removed; use only.flavor".into(),
            });
        }
    }
    Ok(())
}

// ---------- individual migrations ----------

/// `scripts` blocks become onCreate/onDeploy action lists
fn migrate_scripts(doc: &mut Value) -> bool {
    let mut changed = false;
    for component in components_mut(doc) {
        let Some(scripts) = remove(component, "scripts") else {
            continue;
        };
        changed = true;

        let mute = !get(&scripts, "showOutput")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let timeout = get(&scripts, "timeoutSeconds")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let retries: u32 = if get(&scripts, "retry")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            u32::MAX
        } else {
            0
        };

        let to_actions = |cmds: Option<&Value>| -> Vec<Value> {
            cmds.and_then(Value::as_sequence)
                .map(|seq| {
                    seq.iter()
                        .map(|cmd| {
                            let mut action = Mapping::new();
                            action.insert(Value::from("cmd"), cmd.clone());
                            if mute {
                                action.insert(Value::from("mute"), Value::from(true));
                            }
                            if timeout > 0 {
                                action.insert(
                                    Value::from("maxTotalSeconds"),
                                    Value::from(timeout),
                                );
                            }
                            if retries > 0 {
                                action.insert(Value::from("retries"), Value::from(retries));
                            }
                            Value::Mapping(action)
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        let prepare = to_actions(get(&scripts, "prepare"));
        let before = to_actions(get(&scripts, "before"));
        let after = to_actions(get(&scripts, "after"));

        let actions = ensure_map(component, "actions");
        if !prepare.is_empty() {
            let on_create = ensure_map(actions, "onCreate");
            extend_list(on_create, "before", prepare);
        }
        if !before.is_empty() || !after.is_empty() {
            let on_deploy = ensure_map(actions, "onDeploy");
            extend_list(on_deploy, "before", before);
            extend_list(on_deploy, "after", after);
        }
    }
    changed
}

/// `setVariable: NAME` becomes `setVariables: [{name: NAME}]`
fn migrate_set_variable(doc: &mut Value) -> bool {
    let mut changed = false;
    for_each_action(doc, &mut |action| {
        if let Some(name) = remove(action, "setVariable") {
            let mut variable = Mapping::new();
            variable.insert(Value::from("name"), name);
            set(
                action,
                "setVariables",
                Value::Sequence(vec![Value::Mapping(variable)]),
            );
            changed = true;
        }
    });
    changed
}

/// Deprecated `optional` inverts into the tri-state `required`
fn migrate_optional(doc: &mut Value) -> bool {
    let mut changed = false;
    for component in components_mut(doc) {
        if let Some(optional) = remove(component, "optional") {
            let optional = optional.as_bool().unwrap_or(false);
            if get(component, "required").is_none() {
                set(component, "required", Value::from(!optional));
            }
            changed = true;
        }
    }
    changed
}

/// `noWait: true` becomes `wait: false` on charts and manifests
fn migrate_no_wait(doc: &mut Value) -> bool {
    let mut changed = false;
    for component in components_mut(doc) {
        for list in ["charts", "manifests"] {
            let Some(items) = get_mut(component, list).and_then(Value::as_sequence_mut) else {
                continue;
            };
            for item in items {
                if let Some(no_wait) = remove(item, "noWait") {
                    let no_wait = no_wait.as_bool().unwrap_or(false);
                    set(item, "wait", Value::from(!no_wait));
                    changed = true;
                }
            }
        }
    }
    changed
}

/// `metadata.yolo` inverts into `metadata.airgap`
fn migrate_yolo(doc: &mut Value) -> bool {
    let Some(metadata) = get_mut(doc, "metadata") else {
        return false;
    };
    let Some(yolo) = remove(metadata, "yolo") else {
        return false;
    };
    let yolo = yolo.as_bool().unwrap_or(false);
    set(metadata, "airgap", Value::from(!yolo));
    true
}

/// `maxRetries` renames to `retries` on action defaults and actions
fn migrate_max_retries(doc: &mut Value) -> bool {
    let mut changed = false;
    let mut rename = |value: &mut Value| {
        if let Some(retries) = remove(value, "maxRetries") {
            set(value, "retries", retries);
            changed = true;
        }
    };
    for_each_action(doc, &mut rename);
    for_each_action_defaults(doc, &mut rename);
    changed
}

/// `metadata.aggregateChecksum` moves under `build`
fn migrate_aggregate_checksum(doc: &mut Value) -> bool {
    let Some(metadata) = get_mut(doc, "metadata") else {
        return false;
    };
    let Some(checksum) = remove(metadata, "aggregateChecksum") else {
        return false;
    };
    let build = ensure_map(doc, "build");
    set(build, "aggregateChecksum", checksum);
    true
}

const ANNOTATION_FIELDS: &[&str] = &["image", "source", "url", "authors", "vendor", "documentation"];

/// Loose metadata fields collapse into `metadata.annotations`
fn migrate_metadata_annotations(doc: &mut Value) -> bool {
    let Some(metadata) = get_mut(doc, "metadata") else {
        return false;
    };
    let mut moved = Vec::new();
    for field in ANNOTATION_FIELDS {
        if let Some(value) = remove(metadata, field) {
            moved.push((*field, value));
        }
    }
    if moved.is_empty() {
        return false;
    }
    let annotations = ensure_map(metadata, "annotations");
    for (field, value) in moved {
        set(annotations, field, value);
    }
    true
}

/// Qualifying onDeploy.after cluster waits move to `component.waits[]`:
/// Ready/Available/exists conditions on non-CR kinds only.
fn migrate_wait_actions(doc: &mut Value) -> bool {
    let mut changed = false;
    for component in components_mut(doc) {
        let mut promoted = Vec::new();
        if let Some(after) = get_mut(component, "actions")
            .and_then(|a| get_mut(a, "onDeploy"))
            .and_then(|d| get_mut(d, "after"))
            .and_then(Value::as_sequence_mut)
        {
            after.retain(|action| {
                let Some(cluster) = get(action, "wait").and_then(|w| get(w, "cluster")) else {
                    return true;
                };
                let kind = get(cluster, "kind").and_then(Value::as_str).unwrap_or("");
                let condition = get(cluster, "condition")
                    .and_then(Value::as_str)
                    .unwrap_or("exists")
                    .to_ascii_lowercase();
                let qualifies = !kind.contains('.')
                    && matches!(condition.as_str(), "ready" | "available" | "exists");
                if qualifies {
                    promoted.push(cluster.clone());
                    return false;
                }
                true
            });
        }
        if !promoted.is_empty() {
            extend_list(component, "waits", promoted);
            changed = true;
        }
    }
    changed
}

/// The v0 `url`/`gitPath`/`localPath`/`repoName` chart fields become the
/// one-of helm|git|oci|local source
fn migrate_chart_sources(doc: &mut Value) -> bool {
    let mut changed = false;
    for component in components_mut(doc) {
        let Some(charts) = get_mut(component, "charts").and_then(Value::as_sequence_mut) else {
            continue;
        };
        for chart in charts {
            let url = remove(chart, "url").and_then(|v| v.as_str().map(String::from));
            let git_path = remove(chart, "gitPath").and_then(|v| v.as_str().map(String::from));
            let local_path = remove(chart, "localPath").and_then(|v| v.as_str().map(String::from));
            let repo_name = remove(chart, "repoName").and_then(|v| v.as_str().map(String::from));

            if url.is_none() && local_path.is_none() {
                continue;
            }
            changed = true;

            if let Some(path) = local_path {
                let mut source = Mapping::new();
                source.insert(Value::from("path"), Value::from(path));
                set(chart, "local", Value::Mapping(source));
                continue;
            }
            let url = url.unwrap_or_default();
            if url.starts_with("oci://") {
                let mut source = Mapping::new();
                source.insert(Value::from("url"), Value::from(url));
                set(chart, "oci", Value::Mapping(source));
            } else if git_path.is_some() || url.ends_with(".git") {
                let mut source = Mapping::new();
                source.insert(Value::from("url"), Value::from(url));
                if let Some(path) = git_path {
                    source.insert(Value::from("path"), Value::from(path));
                }
                set(chart, "git", Value::Mapping(source));
            } else {
                let mut source = Mapping::new();
                source.insert(Value::from("url"), Value::from(url));
                if let Some(repo_name) = repo_name {
                    source.insert(Value::from("repoName"), Value::from(repo_name));
                }
                set(chart, "helm", Value::Mapping(source));
            }
        }
    }
    changed
}

// ---------- value helpers ----------

fn get<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.as_mapping()?.get(key)
}

fn get_mut<'a>(value: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    value.as_mapping_mut()?.get_mut(key)
}

fn set(value: &mut Value, key: &str, new: Value) {
    if let Some(map) = value.as_mapping_mut() {
        map.insert(Value::from(key), new);
    }
}

fn remove(value: &mut Value, key: &str) -> Option<Value> {
    value.as_mapping_mut()?.remove(key)
}

fn ensure_map<'a>(value: &'a mut Value, key: &str) -> &'a mut Value {
    let map = value
        .as_mapping_mut()
        .expect("parent must be a mapping");
    if !map.contains_key(key) {
        map.insert(Value::from(key), Value::Mapping(Mapping::new()));
    }
    map.get_mut(key).expect("just inserted")
}

fn extend_list(value: &mut Value, key: &str, items: Vec<Value>) {
    if items.is_empty() {
        return;
    }
    let map = value
        .as_mapping_mut()
        .expect("parent must be a mapping");
    match map.get_mut(key) {
        Some(Value::Sequence(seq)) => seq.extend(items),
        _ => {
            map.insert(Value::from(key), Value::Sequence(items));
        }
    }
}

fn components(doc: &Value) -> impl Iterator<Item = &Value> {
    get(doc, "components")
        .and_then(Value::as_sequence)
        .into_iter()
        .flatten()
}

fn components_mut(doc: &mut Value) -> impl Iterator<Item = &mut Value> {
    get_mut(doc, "components")
        .and_then(Value::as_sequence_mut)
        .into_iter()
        .flatten()
}

const ACTION_SETS: &[&str] = &["onCreate", "onDeploy", "onRemove"];
const ACTION_LISTS: &[&str] = &["before", "after", "onSuccess", "onFailure"];

fn for_each_action(doc: &mut Value, f: &mut dyn FnMut(&mut Value)) {
    for component in components_mut(doc) {
        let Some(actions) = get_mut(component, "actions") else {
            continue;
        };
        for set_name in ACTION_SETS {
            let Some(action_set) = get_mut(actions, set_name) else {
                continue;
            };
            for list_name in ACTION_LISTS {
                if let Some(list) =
                    get_mut(action_set, list_name).and_then(Value::as_sequence_mut)
                {
                    for action in list {
                        f(action);
                    }
                }
            }
        }
    }
}

fn for_each_action_defaults(doc: &mut Value, f: &mut dyn FnMut(&mut Value)) {
    for component in components_mut(doc) {
        let Some(actions) = get_mut(component, "actions") else {
            continue;
        };
        for set_name in ACTION_SETS {
            if let Some(defaults) =
                get_mut(actions, set_name).and_then(|s| get_mut(s, "defaults"))
            {
                f(defaults);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_v1_passes_through() {
        let migrated = migrate(doc(
            "apiVersion: zarf.dev/v1\nkind: ZarfPackageConfig\nmetadata:\n  name: app\n",
        ))
        .unwrap();
        assert!(migrated.applied.is_empty());
        assert_eq!(migrated.package.api_version, API_VERSION_V1);
    }

    #[test]
    fn test_cosign_key_path_is_unmigratable() {
        let err = migrate(doc(
            "apiVersion: zarf.dev/v1alpha1\nkind: ZarfPackageConfig\nmetadata:\n  name: app\ncomponents:\n  - name: web\n    cosignKeyPath: cosign.pub\n",
        ))
        .unwrap_err();
        match err {
            CoreError::UnsupportedDeprecation { field, .. } => {
                assert_eq!(field, "cosignKeyPath")
            }
            other => panic!("expected UnsupportedDeprecation, got {other:?}"),
        }
    }

    #[test]
    fn test_group_is_unmigratable() {
        let err = migrate(doc(
            "apiVersion: zarf.dev/v1alpha1\nkind: ZarfPackageConfig\nmetadata:\n  name: app\ncomponents:\n  - name: web\n    group: databases\n",
        ))
        .unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedDeprecation { .. }));
    }

    const LEGACY: &str = r#"
apiVersion: zarf.dev/v1alpha1
kind: ZarfPackageConfig
metadata:
  name: legacy
  yolo: true
  aggregateChecksum: abc123
  authors: Example Team
components:
  - name: web
    optional: false
    charts:
      - name: podinfo
        version: 6.4.0
        url: https://stefanprodan.github.io/podinfo
        noWait: true
    actions:
      onDeploy:
        defaults:
          maxRetries: 3
        before:
          - cmd: ./warmup.sh
            setVariable: TOKEN
            maxRetries: 1
        after:
          - wait:
              cluster:
                kind: Deployment
                name: podinfo
                condition: Available
"#;

    #[test]
    fn test_legacy_chain() {
        let migrated = migrate(doc(LEGACY)).unwrap();
        assert_eq!(
            migrated.applied,
            vec![
                "set-variable-to-set-variables",
                "required-tri-state",
                "no-wait-to-wait",
                "yolo-to-airgap",
                "max-retries-to-retries",
                "aggregate-checksum-to-build",
                "metadata-to-annotations",
                "wait-actions-to-waits",
                "chart-url-to-sources",
            ]
        );

        let package = &migrated.package;
        assert_eq!(package.api_version, API_VERSION_V1);
        assert_eq!(package.metadata.airgap, Some(false));
        assert_eq!(
            package.metadata.annotations.get("authors").map(String::as_str),
            Some("Example Team")
        );
        assert_eq!(
            package.build.as_ref().unwrap().aggregate_checksum,
            "abc123"
        );

        let web = &package.components[0];
        assert_eq!(web.required, Some(true));
        let chart = &web.charts[0];
        assert!(!chart.wait);
        assert!(chart.helm.is_some());

        // The qualifying wait action was promoted out of onDeploy.after.
        assert!(web.actions.on_deploy.after.is_empty());
        assert_eq!(web.waits.len(), 1);
        assert_eq!(web.waits[0].kind, "Deployment");

        let before = &web.actions.on_deploy.before[0];
        assert_eq!(before.retries, Some(1));
        assert_eq!(before.set_variables[0].name, "TOKEN");
        assert_eq!(web.actions.on_deploy.defaults.retries, 3);
    }

    #[test]
    fn test_migration_is_deterministic() {
        let a = migrate(doc(LEGACY)).unwrap();
        let b = migrate(doc(LEGACY)).unwrap();
        assert_eq!(a.applied, b.applied);
        assert_eq!(
            serde_yaml::to_string(&a.package).unwrap(),
            serde_yaml::to_string(&b.package).unwrap()
        );
    }

    #[test]
    fn test_chart_source_split() {
        let migrated = migrate(doc(
            r#"
apiVersion: zarf.dev/v1alpha1
kind: ZarfPackageConfig
metadata:
  name: charts
components:
  - name: all
    charts:
      - name: from-oci
        version: 1.0.0
        url: oci://ghcr.io/acme/charts/app
      - name: from-git
        version: 1.0.0
        url: https://github.com/acme/app.git
        gitPath: charts/app
      - name: from-local
        localPath: ./chart
"#,
        ))
        .unwrap();
        let charts = &migrated.package.components[0].charts;
        assert!(charts[0].oci.is_some());
        let git = charts[1].git.as_ref().unwrap();
        assert_eq!(git.path.as_deref(), Some("charts/app"));
        assert!(charts[2].local.is_some());
    }
}
