use anyhow::{Context, Result};
use serde::{Deserialize, Serialize, Serializer};
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, warn};

/// Replacement shown for secret values
pub const MASK: &str = "********";

const CREDENTIAL_TERMS: &[&str] = &[
    "user", "password", "credential", "secret", "key", "token", "auth",
];
const SECRET_TERMS: &[&str] = &["password", "secret", "key", "token"];

/// Likely purpose of a property, judged from its dotted key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PropertyCategory {
    Connections,
    Endpoints,
    Security,
    #[serde(rename = "File Paths")]
    FilePaths,
    Timeouts,
    Features,
    Other,
}

// First matching category wins, in this order
const CATEGORY_TERMS: &[(PropertyCategory, &[&str])] = &[
    (PropertyCategory::Connections, &["host", "port", "url", "connection", "server"]),
    (PropertyCategory::Endpoints, &["endpoint", "api", "path", "route"]),
    (
        PropertyCategory::Security,
        &["auth", "token", "key", "secret", "password", "user", "cert"],
    ),
    (PropertyCategory::FilePaths, &["file", "directory", "folder"]),
    (PropertyCategory::Timeouts, &["timeout", "interval", "delay", "ttl"]),
    (PropertyCategory::Features, &["feature", "flag", "toggle", "enable", "disable"]),
];

impl PropertyCategory {
    pub fn of(key: &str) -> Self {
        CATEGORY_TERMS
            .iter()
            .find(|(_, terms)| mentions(key, terms))
            .map(|(category, _)| *category)
            .unwrap_or(PropertyCategory::Other)
    }
}

/// A connection block found in an environment file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// `SFTP`, `Database`, `HTTP/API` or `File System`
    #[serde(rename = "type")]
    pub kind: String,
    pub details: BTreeMap<String, String>,
}

/// Properties of one deployment environment, read from `<env>.yaml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Upper-cased file stem, e.g. `DEV`
    pub name: String,
    /// Flattened dotted keys. Secret values are masked when serialized.
    #[serde(serialize_with = "serialize_masked")]
    pub properties: BTreeMap<String, String>,
    pub connections: BTreeMap<String, Connection>,
    /// Credential-like properties, secrets already masked
    pub credentials: BTreeMap<String, String>,
    /// Every property grouped by category, secrets masked. Empty
    /// categories are left out.
    #[serde(default)]
    pub categories: BTreeMap<PropertyCategory, BTreeMap<String, String>>,
}

impl EnvironmentConfig {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(str::to_uppercase)
            .with_context(|| format!("environment file has no name: {}", path.display()))?;
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read environment file {}", path.display()))?;
        Self::from_yaml(&name, &content)
            .with_context(|| format!("invalid environment file {}", path.display()))
    }

    pub fn from_yaml(name: &str, yaml_str: &str) -> Result<Self> {
        let parsed: Value = serde_yaml::from_str(yaml_str)?;

        let mut properties = BTreeMap::new();
        flatten_into("", &parsed, &mut properties);
        let connections = connections(&parsed, &properties);

        Ok(Self::assemble(name, properties, connections))
    }

    /// Builds an environment from already-flat properties
    pub fn from_properties<K, V>(name: &str, properties: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let properties = properties
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::assemble(name, properties, BTreeMap::new())
    }

    fn assemble(
        name: &str,
        properties: BTreeMap<String, String>,
        connections: BTreeMap<String, Connection>,
    ) -> Self {
        let credentials = properties
            .iter()
            .filter(|(key, _)| mentions(last_segment(key), CREDENTIAL_TERMS))
            .map(|(key, value)| (key.clone(), masked(key, value)))
            .collect();

        let mut categories: BTreeMap<PropertyCategory, BTreeMap<String, String>> = BTreeMap::new();
        for (key, value) in &properties {
            categories
                .entry(PropertyCategory::of(key))
                .or_default()
                .insert(key.clone(), masked(key, value));
        }

        Self {
            name: name.to_string(),
            properties,
            connections,
            credentials,
            categories,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Every `*.yaml`/`*.yml` file in `dir`, in lexical order. Files that fail
/// to load are logged and skipped.
pub fn load_environments(dir: &Path) -> Result<Vec<EnvironmentConfig>> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("cannot read environment directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && matches!(
                    path.extension().and_then(|ext| ext.to_str()),
                    Some("yaml") | Some("yml")
                )
        })
        .collect();
    files.sort();

    let mut environments = Vec::with_capacity(files.len());
    for path in files {
        match EnvironmentConfig::from_yaml_file(&path) {
            Ok(env) => {
                debug!("Loaded environment {} ({} properties)", env.name, env.properties.len());
                environments.push(env);
            }
            Err(e) => warn!("Skipping environment file: {:#}", e),
        }
    }
    Ok(environments)
}

/// Keys whose value differs between at least two environments. A key that is
/// missing from an environment counts as a value of its own.
pub fn config_differences(environments: &[EnvironmentConfig]) -> BTreeSet<String> {
    if environments.len() < 2 {
        return BTreeSet::new();
    }

    all_keys(environments)
        .into_iter()
        .filter(|key| {
            let values: BTreeSet<Option<&String>> = environments
                .iter()
                .map(|env| env.properties.get(*key))
                .collect();
            values.len() > 1
        })
        .map(str::to_string)
        .collect()
}

/// One property across every environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub key: String,
    /// Values in the order of `EnvironmentComparison::environments`; secrets masked
    pub values: Vec<Option<String>>,
    pub differs: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentComparison {
    pub environments: Vec<String>,
    pub rows: Vec<ComparisonRow>,
}

/// Property-by-environment matrix for the comparison view
pub fn compare_environments(environments: &[EnvironmentConfig]) -> EnvironmentComparison {
    let differences = config_differences(environments);
    let rows = all_keys(environments)
        .into_iter()
        .map(|key| ComparisonRow {
            key: key.to_string(),
            values: environments
                .iter()
                .map(|env| env.properties.get(key).map(|value| masked(key, value)))
                .collect(),
            differs: differences.contains(key),
        })
        .collect();

    EnvironmentComparison {
        environments: environments.iter().map(|env| env.name.clone()).collect(),
        rows,
    }
}

fn all_keys(environments: &[EnvironmentConfig]) -> BTreeSet<&str> {
    environments
        .iter()
        .flat_map(|env| env.properties.keys().map(String::as_str))
        .collect()
}

fn flatten_into(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Mapping(mapping) => {
            for (key, child) in mapping {
                let Some(key) = scalar(key) else { continue };
                let path = if prefix.is_empty() {
                    key
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(&path, child, out);
            }
        }
        Value::Tagged(tagged) => flatten_into(prefix, &tagged.value, out),
        other => {
            if prefix.is_empty() {
                return;
            }
            if let Some(rendered) = scalar(other) {
                out.insert(prefix.to_string(), rendered);
            }
        }
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Sequence(items) => Some(
            items
                .iter()
                .filter_map(scalar)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Tagged(tagged) => scalar(&tagged.value),
        Value::Mapping(_) => None,
    }
}

fn connections(
    parsed: &Value,
    properties: &BTreeMap<String, String>,
) -> BTreeMap<String, Connection> {
    let Some(mapping) = parsed.as_mapping() else {
        return BTreeMap::new();
    };

    let mut result = BTreeMap::new();
    for (key, value) in mapping {
        let Some(key) = key.as_str() else { continue };
        let lower = key.to_lowercase();
        let is_block = value.is_mapping();

        let kind = if is_block && lower.contains("sftp") {
            "SFTP"
        } else if is_block && mentions(&lower, &["db", "database", "jdbc"]) {
            "Database"
        } else if is_block && mentions(&lower, &["http", "api", "rest", "soap"]) {
            "HTTP/API"
        } else if (is_block || value.is_string()) && mentions(&lower, &["file", "directory", "path"]) {
            "File System"
        } else {
            continue;
        };

        let details = if is_block {
            let prefix = format!("{}.", key);
            properties
                .iter()
                .filter_map(|(k, v)| {
                    k.strip_prefix(&prefix)
                        .map(|rest| (rest.to_string(), masked(k, v)))
                })
                .collect()
        } else {
            let path = value.as_str().unwrap_or_default().to_string();
            BTreeMap::from([("path".to_string(), path)])
        };

        result.insert(
            key.to_string(),
            Connection {
                kind: kind.to_string(),
                details,
            },
        );
    }
    result
}

fn mentions(text: &str, terms: &[&str]) -> bool {
    let lower = text.to_lowercase();
    terms.iter().any(|term| lower.contains(term))
}

fn last_segment(key: &str) -> &str {
    key.rsplit('.').next().unwrap_or(key)
}

fn masked(key: &str, value: &str) -> String {
    if mentions(last_segment(key), SECRET_TERMS) {
        MASK.to_string()
    } else {
        value.to_string()
    }
}

fn serialize_masked<S>(properties: &BTreeMap<String, String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let view: BTreeMap<&str, String> = properties
        .iter()
        .map(|(key, value)| (key.as_str(), masked(key, value)))
        .collect();
    view.serialize(serializer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flattens_nested_yaml() {
        let env = EnvironmentConfig::from_yaml(
            "DEV",
            r#"
http:
  host: "0.0.0.0"
  port: 8081
sftp:
  host: sftp.dev
  password: hunter2
retries: [1, 2, 3]
enabled: true
"#,
        )
        .unwrap();

        assert_eq!(env.get("http.port"), Some("8081"));
        assert_eq!(env.get("sftp.host"), Some("sftp.dev"));
        assert_eq!(env.get("retries"), Some("1,2,3"));
        assert_eq!(env.get("enabled"), Some("true"));
        assert_eq!(env.get("sftp.password"), Some("hunter2"));
    }

    #[test]
    fn test_connections_and_credentials() {
        let env = EnvironmentConfig::from_yaml(
            "DEV",
            r#"
sftp:
  host: sftp.dev
  password: hunter2
db:
  url: "jdbc:h2:mem"
outputPath: /data/out
api:
  user: svc
  token: abc
"#,
        )
        .unwrap();

        assert_eq!(env.connections["sftp"].kind, "SFTP");
        assert_eq!(env.connections["sftp"].details["password"], MASK);
        assert_eq!(env.connections["db"].kind, "Database");
        assert_eq!(env.connections["outputPath"].kind, "File System");
        assert_eq!(env.connections["outputPath"].details["path"], "/data/out");
        assert_eq!(env.connections["api"].kind, "HTTP/API");

        assert_eq!(env.credentials["api.user"], "svc");
        assert_eq!(env.credentials["api.token"], MASK);
        assert_eq!(env.credentials["sftp.password"], MASK);
        assert!(!env.credentials.contains_key("sftp.host"));
    }

    #[test]
    fn test_serialized_properties_are_masked() {
        let env = EnvironmentConfig::from_properties("PROD", [("db.password", "s3cret"), ("db.host", "h")]);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["properties"]["db.password"], MASK);
        assert_eq!(json["properties"]["db.host"], "h");
    }

    #[test]
    fn test_property_categories() {
        let env = EnvironmentConfig::from_properties(
            "DEV",
            [
                ("sftp.host", "sftp.dev"),
                ("orders.api.basePath", "/v1"),
                ("sftp.password", "hunter2"),
                ("sftp.username", "svc"),
                ("archive.directory", "/data"),
                ("http.response.timeout", "30000"),
                ("feature.enableAudit", "true"),
                ("app.name", "orders"),
            ],
        );
        let keys = |category: PropertyCategory| -> Vec<&str> {
            env.categories
                .get(&category)
                .map(|props| props.keys().map(String::as_str).collect())
                .unwrap_or_default()
        };

        assert_eq!(keys(PropertyCategory::Connections), vec!["sftp.host"]);
        assert_eq!(keys(PropertyCategory::Endpoints), vec!["orders.api.basePath"]);
        assert_eq!(keys(PropertyCategory::Security), vec!["sftp.password", "sftp.username"]);
        assert_eq!(keys(PropertyCategory::FilePaths), vec!["archive.directory"]);
        assert_eq!(keys(PropertyCategory::Timeouts), vec!["http.response.timeout"]);
        assert_eq!(keys(PropertyCategory::Features), vec!["feature.enableAudit"]);
        assert_eq!(keys(PropertyCategory::Other), vec!["app.name"]);
        assert_eq!(env.categories[&PropertyCategory::Security]["sftp.password"], MASK);
        assert_eq!(env.categories[&PropertyCategory::Security]["sftp.username"], "svc");

        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["categories"]["File Paths"]["archive.directory"], "/data");
    }

    #[test]
    fn test_single_environment_has_no_differences() {
        let env = EnvironmentConfig::from_properties("DEV", [("host", "a")]);
        assert!(config_differences(&[env]).is_empty());
    }
}
