//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid package manifest at {path}: {message}")]
    ManifestInvalid { path: String, message: String },

    #[error("unknown apiVersion: {api_version}")]
    UnknownApiVersion { api_version: String },

    #[error("variable {name} failed validation: value does not match pattern {pattern}")]
    VariableValidation { name: String, pattern: String },

    #[error("variable {name} is not defined in the package and has no value")]
    VariableMissing { name: String },

    #[error("import cycle detected: {}", chain.join(" -> "))]
    ImportCycle { chain: Vec<String> },

    #[error("imported package {path} does not contain component {name}")]
    ImportNotFound { path: String, name: String },

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("package signature is invalid: {message}")]
    SignatureInvalid { message: String },

    #[error("package is signed but no verification key was provided")]
    SignatureKeyMissing,

    #[error("required component {name} was removed by filtering")]
    RequiredMissing { name: String },

    #[error("field {field} is deprecated and cannot be migrated: {message}")]
    UnsupportedDeprecation { field: String, message: String },

    #[error("archive error: {message}")]
    Archive { message: String },

    #[error("signing error: {0}")]
    Signing(String),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
