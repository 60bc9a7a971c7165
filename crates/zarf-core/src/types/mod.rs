//! Data model for zarf packages

pub mod component;
pub mod package;
pub mod variable;

pub use component::{
    Action, ActionDefaults, ActionSet, ActionWait, Architecture, ChartVariable, ClusterWait,
    ComponentActions, ComponentImport, ContainerTarget, GitChartSource, HelmSource, LocalChartSource,
    LocalOs, NetworkProtocol, NetworkWait, OciChartSource, OnlyCluster, OnlyFilter, ShellPreference,
    ZarfChart, ZarfComponent, ZarfDataInjection, ZarfFile, ZarfManifest, TEMPLATE_MARKER,
};
pub use package::{
    is_valid_package_name, BuildData, PackageKind, PackageMetadata, TunnelDescriptor,
    TunnelResource, ZarfPackage, API_VERSION_V0, API_VERSION_V1, LAYOUT_ZARF_V1_YAML,
    LAYOUT_ZARF_YAML,
};
pub use variable::{is_valid_variable_name, VariableDef, VariableType, ZarfConstant};
