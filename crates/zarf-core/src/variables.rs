//! Variable engine: package constants, user variables, and token substitution
//!
//! Substitution replaces `###ZARF_VAR_<NAME>###` and `###ZARF_CONST_<NAME>###`
//! tokens in text artifacts. Values are always substituted into in-memory
//! copies; on-disk sources are never mutated.

use base64::Engine;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use crate::error::{CoreError, Result};
use crate::types::{VariableDef, VariableType, ZarfConstant};

/// Suffix requesting base64 encoding of a file-typed variable
const BASE64_SUFFIX: &str = "_BASE64";

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"###ZARF_(VAR|CONST)_([A-Z0-9_]+)###").unwrap())
}

/// A resolved runtime value with the metadata that governs its substitution
#[derive(Debug, Clone, Default)]
pub struct SetVariable {
    pub value: String,
    pub sensitive: bool,
    pub auto_indent: bool,
    pub pattern: Option<String>,
    pub kind: VariableType,
}

/// Holds constants, declared variables, and runtime values for one package run
#[derive(Debug, Default)]
pub struct VariableConfig {
    constants: BTreeMap<String, String>,
    declared: BTreeMap<String, VariableDef>,
    // Actions may capture variables while image metadata hooks read them;
    // substitution takes a snapshot under this lock.
    runtime: Mutex<BTreeMap<String, SetVariable>>,
}

impl VariableConfig {
    /// Build the engine from a package's constants and variable declarations
    pub fn new(constants: &[ZarfConstant], variables: &[VariableDef]) -> Result<Self> {
        let mut consts = BTreeMap::new();
        for constant in constants {
            if let Some(pattern) = &constant.pattern {
                let re = compile_pattern(&constant.name, pattern)?;
                if !re.is_match(&constant.value) {
                    return Err(CoreError::VariableValidation {
                        name: constant.name.clone(),
                        pattern: pattern.clone(),
                    });
                }
            }
            consts.insert(constant.name.clone(), constant.value.clone());
        }
        let declared = variables
            .iter()
            .map(|v| (v.name.clone(), v.clone()))
            .collect();
        Ok(Self {
            constants: consts,
            declared,
            runtime: Mutex::new(BTreeMap::new()),
        })
    }

    /// Apply user-supplied overrides (flags, env, prompt answers)
    pub fn set_overrides(&self, overrides: &BTreeMap<String, String>) -> Result<()> {
        for (name, value) in overrides {
            self.set_variable(name, value.clone())?;
        }
        Ok(())
    }

    /// Set a runtime value, inheriting declared metadata and enforcing the
    /// declared pattern. Constants shadow runtime variables of the same name,
    /// so a colliding set is rejected.
    pub fn set_variable(&self, name: &str, value: String) -> Result<()> {
        if self.constants.contains_key(name) {
            return Err(CoreError::VariableValidation {
                name: name.to_string(),
                pattern: "<constant>".into(),
            });
        }
        let declared = self.declared.get(name);
        let set = SetVariable {
            value,
            sensitive: declared.map(|d| d.sensitive).unwrap_or(false),
            auto_indent: declared.map(|d| d.auto_indent).unwrap_or(false),
            pattern: declared.and_then(|d| d.pattern.clone()),
            kind: declared.map(|d| d.kind).unwrap_or_default(),
        };
        self.check_pattern(name, &set)?;
        tracing::debug!(
            variable = name,
            fingerprint = %fingerprint(&set.value),
            "variable set"
        );
        self.runtime
            .lock()
            .expect("variable lock poisoned")
            .insert(name.to_string(), set);
        Ok(())
    }

    /// Set a value captured from an action, carrying the action's metadata
    pub fn set_captured(&self, def: &VariableDef, value: String) -> Result<()> {
        if !self.declared.contains_key(&def.name) {
            // Actions may introduce variables the manifest never declared.
            let set = SetVariable {
                value,
                sensitive: def.sensitive,
                auto_indent: def.auto_indent,
                pattern: def.pattern.clone(),
                kind: def.kind,
            };
            self.check_pattern(&def.name, &set)?;
            self.runtime
                .lock()
                .expect("variable lock poisoned")
                .insert(def.name.clone(), set);
            return Ok(());
        }
        self.set_variable(&def.name, value)
    }

    /// Resolve a name: constants shadow runtime values, runtime values shadow
    /// declared defaults.
    pub fn resolve(&self, name: &str) -> Option<String> {
        if let Some(value) = self.constants.get(name) {
            return Some(value.clone());
        }
        if let Some(set) = self
            .runtime
            .lock()
            .expect("variable lock poisoned")
            .get(name)
        {
            return Some(set.value.clone());
        }
        self.declared.get(name).and_then(|d| d.default.clone())
    }

    /// Whether the given variable is declared sensitive
    pub fn is_sensitive(&self, name: &str) -> bool {
        self.declared.get(name).map(|d| d.sensitive).unwrap_or(false)
    }

    /// Names of declared variables with no resolvable value
    pub fn unset_names(&self) -> Vec<String> {
        self.declared
            .keys()
            .filter(|name| self.resolve(name).is_none())
            .cloned()
            .collect()
    }

    /// Replace every variable and constant token in the text
    pub fn substitute(&self, text: &str) -> Result<String> {
        let runtime = self
            .runtime
            .lock()
            .expect("variable lock poisoned")
            .clone();

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in token_regex().captures_iter(text) {
            let token = caps.get(0).expect("regex match");
            let scope = &caps[1];
            let name = &caps[2];

            out.push_str(&text[last..token.start()]);

            let resolved = match scope {
                "CONST" => Resolved {
                    value: self
                        .constants
                        .get(name)
                        .cloned()
                        .ok_or_else(|| CoreError::VariableMissing {
                            name: name.to_string(),
                        })?,
                    auto_indent: false,
                },
                _ => self.resolve_var_token(name, &runtime)?,
            };

            let rendered = if resolved.auto_indent {
                let line_start = text[..token.start()]
                    .rfind('\n')
                    .map(|i| i + 1)
                    .unwrap_or(0);
                let indent = " ".repeat(token.start() - line_start);
                resolved.value.replace('\n', &format!("\n{indent}"))
            } else {
                resolved.value
            };
            out.push_str(&rendered);
            last = token.end();
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    fn resolve_var_token(
        &self,
        token_name: &str,
        runtime: &BTreeMap<String, SetVariable>,
    ) -> Result<Resolved> {
        // Exact name wins; otherwise a _BASE64 suffix requests encoding of
        // the underlying file-typed variable.
        let (name, base64_requested) = if self.lookup(token_name, runtime).is_some() {
            (token_name, false)
        } else if let Some(base) = token_name.strip_suffix(BASE64_SUFFIX) {
            (base, true)
        } else {
            (token_name, false)
        };

        let (value, declared) = self
            .lookup(name, runtime)
            .ok_or_else(|| CoreError::VariableMissing {
                name: token_name.to_string(),
            })?;

        if let Some(pattern) = &declared.pattern {
            let re = compile_pattern(name, pattern)?;
            if !re.is_match(&value) {
                return Err(CoreError::VariableValidation {
                    name: name.to_string(),
                    pattern: pattern.clone(),
                });
            }
        }

        let value = match declared.kind {
            VariableType::Raw => value,
            VariableType::File => {
                let data = std::fs::read(Path::new(&value))?;
                if base64_requested {
                    base64::engine::general_purpose::STANDARD.encode(&data)
                } else {
                    String::from_utf8_lossy(&data).into_owned()
                }
            }
        };

        Ok(Resolved {
            value,
            auto_indent: declared.auto_indent,
        })
    }

    /// Find a value plus its governing metadata
    fn lookup(
        &self,
        name: &str,
        runtime: &BTreeMap<String, SetVariable>,
    ) -> Option<(String, SetVariable)> {
        if let Some(set) = runtime.get(name) {
            return Some((set.value.clone(), set.clone()));
        }
        let declared = self.declared.get(name)?;
        let value = declared.default.clone()?;
        Some((
            value,
            SetVariable {
                value: String::new(),
                sensitive: declared.sensitive,
                auto_indent: declared.auto_indent,
                pattern: declared.pattern.clone(),
                kind: declared.kind,
            },
        ))
    }

    fn check_pattern(&self, name: &str, set: &SetVariable) -> Result<()> {
        if let Some(pattern) = &set.pattern {
            let re = compile_pattern(name, pattern)?;
            if !re.is_match(&set.value) {
                return Err(CoreError::VariableValidation {
                    name: name.to_string(),
                    pattern: pattern.clone(),
                });
            }
        }
        Ok(())
    }
}

struct Resolved {
    value: String,
    auto_indent: bool,
}

fn compile_pattern(name: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|_| CoreError::VariableValidation {
        name: name.to_string(),
        pattern: pattern.to_string(),
    })
}

/// Short SHA-256 fingerprint used to reference sensitive values in logs
pub fn fingerprint(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    let mut out = String::with_capacity(12);
    for byte in digest.iter().take(6) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> VariableConfig {
        let constants = vec![ZarfConstant {
            name: "REGISTRY".into(),
            value: "127.0.0.1:31999".into(),
            ..Default::default()
        }];
        let variables = vec![
            VariableDef {
                name: "DOMAIN".into(),
                default: Some("example.com".into()),
                ..Default::default()
            },
            VariableDef {
                name: "REPLICAS".into(),
                pattern: Some("^[0-9]+$".into()),
                ..Default::default()
            },
            VariableDef {
                name: "CONFIG_BLOCK".into(),
                auto_indent: true,
                ..Default::default()
            },
        ];
        VariableConfig::new(&constants, &variables).unwrap()
    }

    #[test]
    fn test_substitute_var_and_const() {
        let vars = engine();
        let out = vars
            .substitute("host: ###ZARF_VAR_DOMAIN###\nregistry: ###ZARF_CONST_REGISTRY###\n")
            .unwrap();
        assert_eq!(out, "host: example.com\nregistry: 127.0.0.1:31999\n");
    }

    #[test]
    fn test_runtime_overrides_default() {
        let vars = engine();
        vars.set_variable("DOMAIN", "prod.internal".into()).unwrap();
        assert_eq!(vars.resolve("DOMAIN").unwrap(), "prod.internal");
        let out = vars.substitute("###ZARF_VAR_DOMAIN###").unwrap();
        assert_eq!(out, "prod.internal");
    }

    #[test]
    fn test_pattern_enforced_on_set() {
        let vars = engine();
        assert!(matches!(
            vars.set_variable("REPLICAS", "three".into()),
            Err(CoreError::VariableValidation { .. })
        ));
        vars.set_variable("REPLICAS", "3".into()).unwrap();
    }

    #[test]
    fn test_missing_variable_fails() {
        let vars = engine();
        assert!(matches!(
            vars.substitute("###ZARF_VAR_NOPE###"),
            Err(CoreError::VariableMissing { .. })
        ));
    }

    #[test]
    fn test_auto_indent_preserves_column() {
        let vars = engine();
        vars.set_variable("CONFIG_BLOCK", "a: 1\nb: 2".into())
            .unwrap();
        let out = vars
            .substitute("data:\n  config: |\n    ###ZARF_VAR_CONFIG_BLOCK###\n")
            .unwrap();
        assert_eq!(out, "data:\n  config: |\n    a: 1\n    b: 2\n");
    }

    #[test]
    fn test_file_variable_base64_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("token.txt");
        std::fs::write(&file, b"secret-data").unwrap();

        let variables = vec![VariableDef {
            name: "TOKEN".into(),
            kind: VariableType::File,
            ..Default::default()
        }];
        let vars = VariableConfig::new(&[], &variables).unwrap();
        vars.set_variable("TOKEN", file.display().to_string())
            .unwrap();

        let plain = vars.substitute("###ZARF_VAR_TOKEN###").unwrap();
        assert_eq!(plain, "secret-data");

        let encoded = vars.substitute("###ZARF_VAR_TOKEN_BASE64###").unwrap();
        assert_eq!(
            encoded,
            base64::engine::general_purpose::STANDARD.encode(b"secret-data")
        );
    }

    #[test]
    fn test_constant_shadows_runtime() {
        let vars = engine();
        assert!(vars.set_variable("REGISTRY", "evil:5000".into()).is_err());
        assert_eq!(vars.resolve("REGISTRY").unwrap(), "127.0.0.1:31999");
    }

    #[test]
    fn test_substitution_idempotent() {
        let vars = engine();
        let once = vars.substitute("value: ###ZARF_VAR_DOMAIN###").unwrap();
        let twice = vars.substitute(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_fingerprint_stable() {
        assert_eq!(fingerprint("hunter2"), fingerprint("hunter2"));
        assert_ne!(fingerprint("hunter2"), fingerprint("hunter3"));
        assert_eq!(fingerprint("x").len(), 12);
    }
}
