//! The create verb: compile a manifest into a signed archive
//!
//! Pipeline: load manifest -> migrate -> resolve imports -> init variables ->
//! plan (flavor + host filters) -> per component: onCreate.before, stage
//! artifacts, onCreate.after -> pull images -> checksums -> provenance ->
//! sign -> tar.zst.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use zarf_core::{
    migrate, plan_create, resolve_imports, Architecture, BuildData, LocalOnlyResolver,
    PackageLayout, PlanOptions, SkeletonResolver, VariableConfig, ZarfComponent, ZarfPackage,
};
use zarf_fetch::{FetchRequest, Fetcher, HttpFetcher, ImageTransport, OciFetcher};
use zarf_kube::{render_kustomization, ActionContext};

use crate::error::{PackagerError, Result};
use crate::layout::Scratch;
use crate::{charts, VERB_CREATE};

/// Artifact fetches per component run through a pool of this width
const FETCH_POOL: usize = zarf_fetch::DEFAULT_CONCURRENCY;

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Directory containing the package manifest
    pub package_dir: PathBuf,
    /// Where the archive lands
    pub output_dir: PathBuf,
    pub flavor: Option<String>,
    /// Variable overrides from --set and ZARF_VAR_* env
    pub set: BTreeMap<String, String>,
    /// Target cluster architecture (defaults to the build host's)
    pub architecture: Option<String>,
    pub signing_key: Option<PathBuf>,
    pub signing_key_password: Option<String>,
    /// Emit a skeleton (manifest-only) package for reuse as an import source
    pub skeleton: bool,
}

/// Build the package archive, returning its path
pub async fn create(options: &CreateOptions) -> Result<PathBuf> {
    let doc: serde_yaml::Value = serde_yaml::from_slice(&std::fs::read(manifest_path(
        &options.package_dir,
    ))?)
    .map_err(zarf_core::CoreError::from)?;
    let migrated = migrate(doc)?;
    let mut package = migrated.package;
    package.validate()?;

    let scratch = Scratch::new()?;
    let resolver = fetch_skeletons(&package, &scratch).await?;
    resolve_imports(&mut package, &options.package_dir, resolver.as_ref())?;

    let architecture = options
        .architecture
        .clone()
        .or(package.metadata.architecture.clone())
        .unwrap_or_else(host_architecture);
    package.metadata.architecture = Some(architecture.clone());

    let plan_options = PlanOptions {
        flavor: options.flavor.clone(),
        architecture: parse_architecture(&architecture),
        ..Default::default()
    };
    let components = plan_create(&package.components, &plan_options);
    if components.is_empty() {
        warn!("no components remain after flavor/host filtering");
    }
    package.components = components.clone();

    let variables = VariableConfig::new(&package.constants, &package.variables)?;
    variables.set_overrides(&options.set)?;

    let layout = PackageLayout::new(scratch.subdir("build")?);

    if options.skeleton {
        let mut skeleton = package.clone();
        skeleton.build = Some(build_data(&migrated.applied, options));
        layout.write_skeleton(&skeleton)?;
        let archive = layout.archive(&options.output_dir, &skeleton)?;
        info!(archive = %archive.display(), "skeleton package created");
        return Ok(archive);
    }

    let fetcher = Fetcher::default();
    let http = HttpFetcher::default();
    let oci = OciFetcher::default();

    for component in &components {
        stage_component(
            component,
            &layout,
            options,
            &scratch,
            &variables,
            &fetcher,
            &http,
            &oci,
        )
        .await
        .map_err(|e| e.in_component(VERB_CREATE, &component.name, "stage"))?;
    }

    // Images are shared across components and deduplicated by layer.
    let images: Vec<String> = components
        .iter()
        .flat_map(|c| c.images.iter().cloned())
        .collect();
    if !images.is_empty() {
        let transport = ImageTransport::default();
        transport
            .pull_images(&images, &layout.images_dir(), &architecture)
            .await?;
    }

    // Provenance and integrity: checksum the tree, then write the manifest
    // views carrying the aggregate (the views themselves stay outside the
    // checksum set).
    let mut build = build_data(&migrated.applied, options);
    build.aggregate_checksum = layout.finalize_checksums()?;
    package.build = Some(build);
    layout.write_manifests(&package)?;

    if let Some(key) = &options.signing_key {
        zarf_core::signing::sign_tree(
            &layout.root,
            key,
            options.signing_key_password.clone(),
        )?;
        info!("package signed");
    }

    let archive = layout.archive(&options.output_dir, &package)?;
    info!(archive = %archive.display(), "package created");
    Ok(archive)
}

#[allow(clippy::too_many_arguments)]
async fn stage_component(
    component: &ZarfComponent,
    layout: &PackageLayout,
    options: &CreateOptions,
    scratch: &Scratch,
    variables: &VariableConfig,
    fetcher: &Fetcher,
    http: &HttpFetcher,
    oci: &OciFetcher,
) -> Result<()> {
    info!(component = %component.name, "staging component");
    let component_dir = layout.components_dir().join(&component.name);
    std::fs::create_dir_all(&component_dir)?;
    let work = scratch.subdir(&format!("work-{}", component.name))?;

    let actions = ActionContext::new(variables);
    let set = &component.actions.on_create;
    let result = async {
        actions.run_list(&set.defaults, &set.before).await?;

        stage_files(component, &component_dir, options, &work, fetcher).await?;

        for chart in &component.charts {
            charts::stage_chart(
                chart,
                &component_dir,
                &options.package_dir,
                &work,
                fetcher,
                http,
                oci,
            )
            .await?;
        }

        stage_manifests(component, &component_dir, options, &work, fetcher).await?;
        stage_repos(component, &component_dir, &work).await?;
        stage_data(component, &component_dir, options, &work, fetcher).await?;

        actions.run_list(&set.defaults, &set.after).await?;
        Ok::<(), PackagerError>(())
    }
    .await;

    match result {
        Ok(()) => {
            if let Err(e) = actions.run_list(&set.defaults, &set.on_success).await {
                warn!(component = %component.name, error = %e, "onSuccess action failed");
            }
            layout.seal_component(&component.name)?;
            Ok(())
        }
        Err(e) => {
            if let Err(failure) = actions.run_list(&set.defaults, &set.on_failure).await {
                warn!(component = %component.name, error = %failure, "onFailure action failed");
            }
            Err(e)
        }
    }
}

/// Fetch `files` entries through the bounded pool
async fn stage_files(
    component: &ZarfComponent,
    component_dir: &Path,
    options: &CreateOptions,
    work: &Path,
    fetcher: &Fetcher,
) -> Result<()> {
    let results: Vec<Result<()>> = stream::iter(component.files.iter().enumerate())
        .map(|(index, file)| async move {
            let request = FetchRequest {
                source: file.source.clone(),
                shasum: file.shasum.clone(),
                extract_path: file.extract_path.clone(),
            };
            let fetched = fetcher.fetch(&request, work, &options.package_dir).await?;
            let dest_dir = component_dir.join("files").join(index.to_string());
            std::fs::create_dir_all(&dest_dir)?;
            let name = fetched
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".into());
            if fetched.path.is_dir() {
                zarf_fetch::copy_dir(&fetched.path, &dest_dir.join(&name))?;
            } else {
                std::fs::copy(&fetched.path, dest_dir.join(&name))?;
            }
            Ok(())
        })
        .buffer_unordered(FETCH_POOL)
        .collect()
        .await;
    results.into_iter().collect()
}

/// Copy manifest files and render kustomizations into the staged component
async fn stage_manifests(
    component: &ZarfComponent,
    component_dir: &Path,
    options: &CreateOptions,
    work: &Path,
    fetcher: &Fetcher,
) -> Result<()> {
    for manifest in &component.manifests {
        let dest = component_dir.join("manifests").join(&manifest.name);
        std::fs::create_dir_all(&dest)?;

        for (index, kustomization) in manifest.kustomizations.iter().enumerate() {
            let path = if zarf_fetch::classify(kustomization) == zarf_fetch::SourceKind::Local {
                options.package_dir.join(kustomization).display().to_string()
            } else {
                kustomization.clone()
            };
            let rendered = render_kustomization(&path).await?;
            std::fs::write(dest.join(format!("kustomization-{index}.yaml")), rendered)?;
        }

        for (index, file) in manifest.files.iter().enumerate() {
            let request = FetchRequest {
                source: file.clone(),
                ..Default::default()
            };
            let fetched = fetcher.fetch(&request, work, &options.package_dir).await?;
            let name = fetched
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "manifest.yaml".into());
            std::fs::copy(&fetched.path, dest.join(format!("{index:04}-{name}")))?;
        }
    }
    Ok(())
}

/// Shallow-clone each repo into the staged component
async fn stage_repos(
    component: &ZarfComponent,
    component_dir: &Path,
    _work: &Path,
) -> Result<()> {
    for repo in &component.repos {
        let dest = component_dir.join("repos").join(repo_dir_name(repo));
        zarf_fetch::git::shallow_clone(repo, &dest).await?;
    }
    Ok(())
}

async fn stage_data(
    component: &ZarfComponent,
    component_dir: &Path,
    options: &CreateOptions,
    work: &Path,
    fetcher: &Fetcher,
) -> Result<()> {
    for (index, injection) in component.data_injections.iter().enumerate() {
        let request = FetchRequest {
            source: injection.source.clone(),
            ..Default::default()
        };
        let fetched = fetcher.fetch(&request, work, &options.package_dir).await?;
        let dest = component_dir.join("data").join(index.to_string());
        std::fs::create_dir_all(&dest)?;
        if fetched.path.is_dir() {
            zarf_fetch::copy_dir(&fetched.path, &dest)?;
        } else {
            let name = fetched
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "data".into());
            std::fs::copy(&fetched.path, dest.join(name))?;
        }
    }
    Ok(())
}

/// A stable directory name for a repo URL
pub fn repo_dir_name(repo: &str) -> String {
    let (url, _) = zarf_fetch::git::split_ref(repo);
    let base = url
        .trim_end_matches('/')
        .trim_end_matches(".git")
        .rsplit('/')
        .next()
        .unwrap_or("repo")
        .to_string();
    format!("{base}-{}", zarf_core::hash_bytes(repo.as_bytes())[..10].to_owned())
}

/// Pre-fetch OCI skeleton imports so import resolution stays synchronous
async fn fetch_skeletons(
    package: &ZarfPackage,
    scratch: &Scratch,
) -> Result<Box<dyn SkeletonResolver>> {
    let mut urls = Vec::new();
    for component in &package.components {
        if let Some(url) = component.import.as_ref().and_then(|i| i.url.clone()) {
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
    }
    if urls.is_empty() {
        return Ok(Box::new(LocalOnlyResolver));
    }

    let oci = OciFetcher::default();
    let mut map = BTreeMap::new();
    for (index, url) in urls.iter().enumerate() {
        let blob = scratch.subdir("skeletons")?.join(format!("{index}.tar.zst"));
        oci.pull_blob_to(url, &blob).await?;
        let dest = scratch.subdir(&format!("skeleton-{index}"))?;
        zarf_core::extract_package(&blob, &dest)?;
        map.insert(url.clone(), dest);
    }
    Ok(Box::new(MapResolver { map }))
}

struct MapResolver {
    map: BTreeMap<String, PathBuf>,
}

impl SkeletonResolver for MapResolver {
    fn resolve(&self, url: &str) -> zarf_core::Result<PathBuf> {
        self.map
            .get(url)
            .cloned()
            .ok_or_else(|| zarf_core::CoreError::ImportNotFound {
                path: url.to_string(),
                name: "<skeleton not prefetched>".into(),
            })
    }
}

fn manifest_path(dir: &Path) -> PathBuf {
    let v1 = dir.join("zarfv1.yaml");
    if v1.is_file() {
        v1
    } else {
        dir.join("zarf.yaml")
    }
}

fn build_data(migrations: &[String], options: &CreateOptions) -> BuildData {
    BuildData {
        terminal: hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".into()),
        user: whoami::username(),
        timestamp: Some(Utc::now()),
        version: env!("CARGO_PKG_VERSION").to_string(),
        migrations: migrations.to_vec(),
        flavor: options.flavor.clone(),
        aggregate_checksum: String::new(),
        differential_package_version: None,
        differential_missing: Vec::new(),
    }
}

fn host_architecture() -> String {
    if cfg!(target_arch = "aarch64") {
        "arm64".to_string()
    } else {
        "amd64".to_string()
    }
}

pub(crate) fn parse_architecture(architecture: &str) -> Architecture {
    match architecture {
        "arm64" => Architecture::Arm64,
        _ => Architecture::Amd64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_package(dir: &Path, yaml: &str) {
        std::fs::write(dir.join("zarf.yaml"), yaml).unwrap();
    }

    #[tokio::test]
    async fn test_create_local_files_package() {
        let package_dir = TempDir::new().unwrap();
        std::fs::write(package_dir.path().join("motd.txt"), "welcome\n").unwrap();
        write_package(
            package_dir.path(),
            r#"
apiVersion: zarf.dev/v1
kind: ZarfPackageConfig
metadata:
  name: files-only
  version: 0.1.0
components:
  - name: motd
    required: true
    files:
      - source: motd.txt
        target: /etc/motd
"#,
        );

        let output = TempDir::new().unwrap();
        let options = CreateOptions {
            package_dir: package_dir.path().to_path_buf(),
            output_dir: output.path().to_path_buf(),
            ..Default::default()
        };
        let archive = create(&options).await.unwrap();
        assert!(archive.is_file());

        // Round-trip: extract and verify integrity + content.
        let extracted = TempDir::new().unwrap();
        let layout = zarf_core::extract_package(&archive, extracted.path()).unwrap();
        let migrated = layout.read_package().unwrap();
        let build = migrated.package.build.as_ref().unwrap();
        layout.verify_checksums(&build.aggregate_checksum).unwrap();

        let staged = layout.open_component("motd").unwrap();
        assert_eq!(
            std::fs::read_to_string(staged.join("files/0/motd.txt")).unwrap(),
            "welcome\n"
        );
    }

    #[tokio::test]
    async fn test_create_runs_on_create_actions_and_flavor_filter() {
        let package_dir = TempDir::new().unwrap();
        write_package(
            package_dir.path(),
            r####"
apiVersion: zarf.dev/v1
kind: ZarfPackageConfig
metadata:
  name: flavored
  version: 0.1.0
components:
  - name: app
    required: true
    only:
      flavor: vanilla
    actions:
      onCreate:
        before:
          - cmd: echo staged > marker.txt
            dir: "###ZARF_VAR_OUT_DIR###"
            mute: true
  - name: app-choco
    required: true
    only:
      flavor: chocolate
"####,
        );

        let marker_dir = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let options = CreateOptions {
            package_dir: package_dir.path().to_path_buf(),
            output_dir: output.path().to_path_buf(),
            flavor: Some("vanilla".into()),
            set: [(
                "OUT_DIR".to_string(),
                marker_dir.path().display().to_string(),
            )]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        let archive = create(&options).await.unwrap();

        assert!(marker_dir.path().join("marker.txt").is_file());

        let extracted = TempDir::new().unwrap();
        let layout = zarf_core::extract_package(&archive, extracted.path()).unwrap();
        let package = layout.read_package().unwrap().package;
        let names: Vec<_> = package.components.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["app"], "non-matching flavor dropped");
        assert_eq!(package.build.unwrap().flavor.as_deref(), Some("vanilla"));
    }

    #[tokio::test]
    async fn test_create_rejects_unmigratable_manifest() {
        let package_dir = TempDir::new().unwrap();
        write_package(
            package_dir.path(),
            r#"
apiVersion: zarf.dev/v1alpha1
kind: ZarfPackageConfig
metadata:
  name: legacy
components:
  - name: web
    cosignKeyPath: cosign.pub
"#,
        );

        let output = TempDir::new().unwrap();
        let options = CreateOptions {
            package_dir: package_dir.path().to_path_buf(),
            output_dir: output.path().to_path_buf(),
            ..Default::default()
        };
        let err = create(&options).await.unwrap_err();
        assert!(matches!(
            err,
            PackagerError::Core(zarf_core::CoreError::UnsupportedDeprecation { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_skeleton() {
        let package_dir = TempDir::new().unwrap();
        write_package(
            package_dir.path(),
            r#"
apiVersion: zarf.dev/v1
kind: ZarfPackageConfig
metadata:
  name: skel
  version: 0.1.0
components:
  - name: base
    images:
      - nginx:1.27
"#,
        );

        let output = TempDir::new().unwrap();
        let options = CreateOptions {
            package_dir: package_dir.path().to_path_buf(),
            output_dir: output.path().to_path_buf(),
            skeleton: true,
            ..Default::default()
        };
        let archive = create(&options).await.unwrap();

        let extracted = TempDir::new().unwrap();
        let layout = zarf_core::extract_package(&archive, extracted.path()).unwrap();
        assert!(!layout.images_dir().exists(), "skeletons carry no images");
        assert!(!layout.components_dir().exists());
        let package = layout.read_package().unwrap().package;
        assert_eq!(package.components[0].images, vec!["nginx:1.27"]);
    }

    #[test]
    fn test_repo_dir_name_stable_and_distinct() {
        let a = repo_dir_name("https://github.com/acme/app.git");
        let b = repo_dir_name("https://github.com/acme/app.git");
        let c = repo_dir_name("https://github.com/other/app.git");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("app-"));
    }
}
