use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use toml_edit::{DocumentMut, Item, Table, Value};

use super::ConfigError;

/// Prefix under which externally supplied keys are forwarded to the launched application.
pub const CUSTOM_PREFIX: &str = "custom.";

/// Flat, ordered key/value view over every configuration source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: IndexMap<String, String>,
}

impl Properties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a TOML file and flattens its tables into dotted keys.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or is not valid TOML.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub(crate) fn from_toml_str(contents: &str) -> Result<Self, String> {
        let doc: DocumentMut = contents.parse().map_err(|err| format!("{err}"))?;
        let mut props = Self::new();
        flatten_table(doc.as_table(), "", &mut props)?;
        Ok(props)
    }

    /// Applies a `key=value` override as passed through `-D`.
    ///
    /// # Errors
    /// Returns an error when the definition has no `=` or an empty key.
    pub fn apply_define(&mut self, raw: &str) -> Result<(), ConfigError> {
        let Some((key, value)) = raw.split_once('=') else {
            return Err(ConfigError::MalformedDefine {
                raw: raw.to_string(),
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::MalformedDefine {
                raw: raw.to_string(),
            });
        }
        self.set(key, value.trim());
        Ok(())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Later sources win over earlier ones.
    pub fn merge(&mut self, other: Properties) {
        for (key, value) in other.entries {
            self.entries.insert(key, value);
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// # Errors
    /// Returns [`ConfigError::Missing`] when the key is absent or blank.
    pub fn required(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::Missing {
            key: key.to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn flatten_table(table: &Table, prefix: &str, out: &mut Properties) -> Result<(), String> {
    for (key, item) in table.iter() {
        let full = join_key(prefix, key);
        match item {
            Item::None => {}
            Item::Value(value) => flatten_value(value, &full, out)?,
            Item::Table(nested) => flatten_table(nested, &full, out)?,
            Item::ArrayOfTables(_) => {
                return Err(format!("arrays of tables are not supported (`{full}`)"));
            }
        }
    }
    Ok(())
}

fn flatten_value(value: &Value, key: &str, out: &mut Properties) -> Result<(), String> {
    match value {
        Value::InlineTable(inline) => {
            for (child, nested) in inline.iter() {
                flatten_value(nested, &join_key(key, child), out)?;
            }
        }
        Value::Array(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items.iter() {
                parts.push(scalar_to_string(item).ok_or_else(|| {
                    format!("`{key}` may only contain strings, numbers or booleans")
                })?);
            }
            out.set(key, parts.join(","));
        }
        other => {
            let text = scalar_to_string(other)
                .ok_or_else(|| format!("unsupported value for `{key}`"))?;
            out.set(key, text);
        }
    }
    Ok(())
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.value().clone()),
        Value::Integer(i) => Some(i.value().to_string()),
        Value::Float(f) => Some(f.value().to_string()),
        Value::Boolean(b) => Some(b.value().to_string()),
        Value::Datetime(d) => Some(d.value().to_string()),
        Value::Array(_) | Value::InlineTable(_) => None,
    }
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Properties forwarded to the launched application with [`CUSTOM_PREFIX`] stripped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomProperties {
    entries: IndexMap<String, String>,
}

impl CustomProperties {
    #[must_use]
    pub fn from_properties(props: &Properties) -> Self {
        let entries = props
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(CUSTOM_PREFIX)
                    .filter(|stripped| !stripped.is_empty())
                    .map(|stripped| (stripped.to_string(), value.to_string()))
            })
            .collect();
        Self { entries }
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Environment pairs handed to an in-process entry point.
    #[must_use]
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// `-D<key>=<value>` flags for a spawned runtime.
    #[must_use]
    pub fn flags(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(k, v)| format!("-D{k}={v}"))
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
