//! Component planner: import composition and filter pipeline
//!
//! Filtering narrows the declared component list in fixed stages: flavor,
//! host OS / cluster architecture, the user's `--components` selection, and
//! finally required-component enforcement. Imports are resolved before any
//! filtering so that composed components are filtered like local ones.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::types::{
    ActionSet, Architecture, ComponentActions, LocalOs, OnlyFilter, ZarfComponent, ZarfPackage,
};

/// Inputs that shape a plan
#[derive(Debug, Clone)]
pub struct PlanOptions {
    /// Active `--flavor` at create
    pub flavor: Option<String>,
    /// Host OS for create-time resources
    pub local_os: LocalOs,
    /// Package target architecture
    pub architecture: Architecture,
    /// The user's `--components` selection; empty means no selector
    pub requested: Vec<String>,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            flavor: None,
            local_os: LocalOs::current(),
            architecture: Architecture::Amd64,
            requested: Vec::new(),
        }
    }
}

impl PlanOptions {
    /// Parse a comma-separated `--components` selection
    pub fn with_requested(mut self, selection: &str) -> Self {
        self.requested = selection
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        self
    }
}

enum SelectState {
    Included,
    Excluded,
    Unknown,
}

fn included_or_excluded(name: &str, requested: &[String]) -> SelectState {
    for selector in requested {
        if let Some(excluded) = selector.strip_prefix('-') {
            if excluded == name {
                return SelectState::Excluded;
            }
        } else if selector == name {
            return SelectState::Included;
        }
    }
    SelectState::Unknown
}

fn matches_only(only: &OnlyFilter, options: &PlanOptions) -> bool {
    if let Some(flavor) = &only.flavor {
        if options.flavor.as_deref() != Some(flavor.as_str()) {
            return false;
        }
    }
    if let Some(local_os) = only.local_os {
        if local_os != options.local_os {
            return false;
        }
    }
    if let Some(arch) = only.cluster.architecture {
        if arch != options.architecture {
            return false;
        }
    }
    true
}

/// Narrow components for create: flavor and OS/arch only. Every surviving
/// component lands in the archive regardless of selection defaults.
pub fn plan_create(
    components: &[ZarfComponent],
    options: &PlanOptions,
) -> Vec<ZarfComponent> {
    components
        .iter()
        .filter(|c| matches_only(&c.only, options))
        .cloned()
        .collect()
}

/// Produce the ordered execution plan for a package
pub fn plan(components: &[ZarfComponent], options: &PlanOptions) -> Result<Vec<ZarfComponent>> {
    // Flavor and OS/arch filtering runs first; `only` is the one filter
    // allowed to remove required components.
    let eligible: Vec<&ZarfComponent> = components
        .iter()
        .filter(|c| matches_only(&c.only, options))
        .collect();

    let has_selector = !options.requested.is_empty();
    let mut selected = Vec::new();
    for component in &eligible {
        let keep = if has_selector {
            match included_or_excluded(&component.name, &options.requested) {
                SelectState::Excluded => false,
                SelectState::Included => true,
                SelectState::Unknown => component.is_required(),
            }
        } else {
            component.is_required() || component.default
        };
        if keep {
            selected.push((*component).clone());
        }
    }

    let selected_names: BTreeSet<&str> = selected.iter().map(|c| c.name.as_str()).collect();
    for component in &eligible {
        if component.is_required() && !selected_names.contains(component.name.as_str()) {
            return Err(CoreError::RequiredMissing {
                name: component.name.clone(),
            });
        }
    }

    Ok(selected)
}

/// Resolves `import.url` skeleton references to local package directories
pub trait SkeletonResolver {
    fn resolve(&self, url: &str) -> Result<PathBuf>;
}

/// Resolver for workflows where OCI imports are not available
pub struct LocalOnlyResolver;

impl SkeletonResolver for LocalOnlyResolver {
    fn resolve(&self, url: &str) -> Result<PathBuf> {
        Err(CoreError::ImportNotFound {
            path: url.to_string(),
            name: "<oci import requires a fetched skeleton>".to_string(),
        })
    }
}

/// Recursively resolve every component import in the package
pub fn resolve_imports(
    package: &mut ZarfPackage,
    package_dir: &Path,
    resolver: &dyn SkeletonResolver,
) -> Result<()> {
    let mut resolved = Vec::with_capacity(package.components.len());
    for component in &package.components {
        let mut visited = vec![identity(package_dir, &component.name)];
        resolved.push(resolve_component(
            component.clone(),
            package_dir,
            resolver,
            &mut visited,
        )?);
    }
    package.components = resolved;
    Ok(())
}

fn identity(dir: &Path, name: &str) -> String {
    let canonical = dir
        .canonicalize()
        .unwrap_or_else(|_| dir.to_path_buf());
    format!("{}:{name}", canonical.display())
}

fn resolve_component(
    mut component: ZarfComponent,
    dir: &Path,
    resolver: &dyn SkeletonResolver,
    visited: &mut Vec<String>,
) -> Result<ZarfComponent> {
    let Some(import) = component.import.take() else {
        return Ok(component);
    };

    let source_dir = match (&import.path, &import.url) {
        (Some(path), None) => dir.join(path),
        (None, Some(url)) => resolver.resolve(url)?,
        _ => unreachable!("validated at load"),
    };
    let source_name = import.name.as_deref().unwrap_or(&component.name);

    let key = identity(&source_dir, source_name);
    if visited.contains(&key) {
        let mut chain = visited.clone();
        chain.push(key);
        return Err(CoreError::ImportCycle { chain });
    }
    visited.push(key);

    let source_package =
        ZarfPackage::load(&source_dir).map_err(|_| CoreError::ImportNotFound {
            path: source_dir.display().to_string(),
            name: source_name.to_string(),
        })?;
    let source = source_package
        .components
        .iter()
        .find(|c| c.name == source_name)
        .cloned()
        .ok_or_else(|| CoreError::ImportNotFound {
            path: source_dir.display().to_string(),
            name: source_name.to_string(),
        })?;

    let source = resolve_component(source, &source_dir, resolver, visited)?;
    visited.pop();

    Ok(merge_component(source, component))
}

/// Merge an imported component under the importing one. Lists append
/// (imported first), maps shallow-merge, scalars from the importer replace.
/// The result is a new value; the imported parent is never aliased.
fn merge_component(imported: ZarfComponent, importer: ZarfComponent) -> ZarfComponent {
    let mut out = imported;

    out.name = importer.name;
    out.import = None;
    if importer.description.is_some() {
        out.description = importer.description;
    }
    out.default = importer.default || out.default;
    if importer.required.is_some() {
        out.required = importer.required;
    }
    if importer.only.local_os.is_some() {
        out.only.local_os = importer.only.local_os;
    }
    if importer.only.cluster.architecture.is_some() {
        out.only.cluster.architecture = importer.only.cluster.architecture;
    }
    if !importer.only.cluster.distros.is_empty() {
        out.only.cluster.distros = importer.only.cluster.distros;
    }
    if importer.only.flavor.is_some() {
        out.only.flavor = importer.only.flavor;
    }

    out.manifests.extend(importer.manifests);
    out.charts.extend(importer.charts);
    out.data_injections.extend(importer.data_injections);
    out.files.extend(importer.files);
    out.images.extend(importer.images);
    out.repos.extend(importer.repos);
    out.waits.extend(importer.waits);
    for (key, value) in importer.extensions {
        out.extensions.insert(key, value);
    }
    out.actions = merge_actions(out.actions, importer.actions);

    out
}

fn merge_actions(imported: ComponentActions, importer: ComponentActions) -> ComponentActions {
    ComponentActions {
        on_create: merge_action_set(imported.on_create, importer.on_create),
        on_deploy: merge_action_set(imported.on_deploy, importer.on_deploy),
        on_remove: merge_action_set(imported.on_remove, importer.on_remove),
    }
}

fn merge_action_set(imported: ActionSet, importer: ActionSet) -> ActionSet {
    let mut out = imported;
    if !importer.defaults.is_empty() {
        out.defaults = importer.defaults;
    }
    out.before.extend(importer.before);
    out.after.extend(importer.after);
    out.on_success.extend(importer.on_success);
    out.on_failure.extend(importer.on_failure);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(name: &str, required: Option<bool>, default: bool) -> ZarfComponent {
        ZarfComponent {
            name: name.into(),
            required,
            default,
            ..Default::default()
        }
    }

    fn names(plan: &[ZarfComponent]) -> Vec<&str> {
        plan.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_selector_pulls_in_required() {
        let components = vec![
            component("a", None, false),
            component("b", Some(true), false),
            component("c", None, false),
        ];
        let options = PlanOptions::default().with_requested("a");
        let plan = plan(&components, &options).unwrap();
        assert_eq!(names(&plan), vec!["a", "b"]);
    }

    #[test]
    fn test_no_selector_keeps_defaults_and_required() {
        let components = vec![
            component("a", None, true),
            component("b", Some(true), false),
            component("c", None, false),
            component("d", Some(false), false),
        ];
        let plan = plan(&components, &PlanOptions::default()).unwrap();
        assert_eq!(names(&plan), vec!["a", "b"]);
    }

    #[test]
    fn test_excluding_required_fails() {
        let components = vec![component("a", None, true), component("b", Some(true), false)];
        let options = PlanOptions::default().with_requested("a,-b");
        assert!(matches!(
            plan(&components, &options),
            Err(CoreError::RequiredMissing { .. })
        ));
    }

    #[test]
    fn test_flavor_filter() {
        let mut vanilla = component("app", Some(true), false);
        vanilla.only.flavor = Some("vanilla".into());
        let mut chocolate = component("app-choco", Some(true), false);
        chocolate.only.flavor = Some("chocolate".into());

        let options = PlanOptions {
            flavor: Some("vanilla".into()),
            ..Default::default()
        };
        let plan = plan(&[vanilla, chocolate], &options).unwrap();
        assert_eq!(names(&plan), vec!["app"]);
    }

    #[test]
    fn test_arch_filter_may_remove_required() {
        let mut arm_only = component("edge", Some(true), false);
        arm_only.only.cluster.architecture = Some(Architecture::Arm64);

        let options = PlanOptions {
            architecture: Architecture::Amd64,
            ..Default::default()
        };
        let plan = plan(&[arm_only], &options).unwrap();
        assert!(plan.is_empty(), "only-filtered required components drop cleanly");
    }

    #[test]
    fn test_declaration_order_preserved() {
        let components = vec![
            component("z", Some(true), false),
            component("a", Some(true), false),
            component("m", Some(true), false),
        ];
        let plan = plan(&components, &PlanOptions::default()).unwrap();
        assert_eq!(names(&plan), vec!["z", "a", "m"]);
    }

    mod imports {
        use super::*;
        use tempfile::TempDir;

        fn write_package(dir: &Path, name: &str, components_yaml: &str) {
            std::fs::create_dir_all(dir).unwrap();
            std::fs::write(
                dir.join("zarf.yaml"),
                format!(
                    "apiVersion: zarf.dev/v1\nkind: ZarfPackageConfig\nmetadata:\n  name: {name}\ncomponents:\n{components_yaml}"
                ),
            )
            .unwrap();
        }

        #[test]
        fn test_import_merges_lists_and_scalars() {
            let temp = TempDir::new().unwrap();
            let base = temp.path().join("base");
            write_package(
                &base,
                "base",
                "  - name: common\n    description: from base\n    images:\n      - busybox\n",
            );
            let app = temp.path().join("app");
            write_package(
                &app,
                "app",
                "  - name: common\n    required: true\n    import:\n      path: ../base\n    images:\n      - nginx\n",
            );

            let mut package = ZarfPackage::load(&app).unwrap();
            resolve_imports(&mut package, &app, &LocalOnlyResolver).unwrap();

            let merged = &package.components[0];
            assert_eq!(merged.name, "common");
            assert_eq!(merged.description.as_deref(), Some("from base"));
            assert_eq!(merged.required, Some(true));
            assert_eq!(merged.images, vec!["busybox", "nginx"]);
            assert!(merged.import.is_none());
        }

        #[test]
        fn test_import_cycle_detected() {
            let temp = TempDir::new().unwrap();
            let a = temp.path().join("a");
            let b = temp.path().join("b");
            write_package(
                &a,
                "a",
                "  - name: shared\n    import:\n      path: ../b\n",
            );
            write_package(
                &b,
                "b",
                "  - name: shared\n    import:\n      path: ../a\n",
            );

            let mut package = ZarfPackage::load(&a).unwrap();
            let err = resolve_imports(&mut package, &a, &LocalOnlyResolver).unwrap_err();
            assert!(matches!(err, CoreError::ImportCycle { .. }));
        }

        #[test]
        fn test_import_missing_component() {
            let temp = TempDir::new().unwrap();
            let base = temp.path().join("base");
            write_package(&base, "base", "  - name: other\n");
            let app = temp.path().join("app");
            write_package(
                &app,
                "app",
                "  - name: common\n    import:\n      path: ../base\n",
            );

            let mut package = ZarfPackage::load(&app).unwrap();
            assert!(matches!(
                resolve_imports(&mut package, &app, &LocalOnlyResolver),
                Err(CoreError::ImportNotFound { .. })
            ));
        }
    }
}
