//! Variable and constant declarations

use serde::{Deserialize, Serialize};

/// How a variable's value is interpreted at substitution time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    /// The value is substituted verbatim
    #[default]
    Raw,
    /// The value is a path; the file's content is substituted
    File,
}

/// A user-settable package variable
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDef {
    /// Variable name, uppercase with underscores
    pub name: String,

    /// Description shown when prompting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Default value when not set by flag, env, or prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    /// Prompt the user for a value during interactive deploys
    #[serde(default, skip_serializing_if = "is_false")]
    pub prompt: bool,

    /// Redact the value in all output
    #[serde(default, skip_serializing_if = "is_false")]
    pub sensitive: bool,

    /// Preserve the indentation of the token's column across newlines
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_indent: bool,

    /// Regex the final value must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Value interpretation
    #[serde(default, rename = "type", skip_serializing_if = "is_default_type")]
    pub kind: VariableType,
}

/// An immutable package constant, fixed at create time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZarfConstant {
    /// Constant name, uppercase with underscores
    pub name: String,

    /// The value of the constant
    pub value: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Regex the value must match at create time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

pub(crate) fn is_false(v: &bool) -> bool {
    !v
}

fn is_default_type(v: &VariableType) -> bool {
    *v == VariableType::Raw
}

/// Pattern every variable and constant name must match
pub const VARIABLE_NAME_PATTERN: &str = "^[A-Z0-9_]+$";

/// Returns true if the name is a legal variable/constant name
pub fn is_valid_variable_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_name_validation() {
        assert!(is_valid_variable_name("DOMAIN"));
        assert!(is_valid_variable_name("TLS_CERT_2"));
        assert!(!is_valid_variable_name("domain"));
        assert!(!is_valid_variable_name(""));
        assert!(!is_valid_variable_name("MY-VAR"));
    }

    #[test]
    fn test_variable_yaml_shape() {
        let yaml = r#"
name: DATABASE_URL
default: postgres://localhost
sensitive: true
type: file
"#;
        let v: VariableDef = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(v.name, "DATABASE_URL");
        assert!(v.sensitive);
        assert_eq!(v.kind, VariableType::File);
        assert!(!v.auto_indent);
    }
}
