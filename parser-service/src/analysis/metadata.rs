use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::environment::MASK;

const POM_FILE: &str = "pom.xml";
const POM_PROPERTIES_FILE: &str = "pom.properties";
const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";
const ARTIFACT_DESCRIPTORS: &[&str] = &[
    "mule-artifact.json",
    "META-INF/mule-artifact/mule-artifact.json",
];
const BUILD_PROPERTIES: &[&str] = &["build.properties", "META-INF/build.properties"];
/// Directory name API specifications are kept under
const API_DIR: &str = "api";
const API_SPEC_EXTENSIONS: &[&str] = &["raml", "yaml", "yml", "json"];
const SECURE_TERMS: &[&str] = &["password", "secret", "key", "token"];

static RAML_TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^title:\s*(.+?)\s*$").unwrap());
static RAML_VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^version:\s*(.+?)\s*$").unwrap());

/// Maven `groupId:artifactId:version`; any part may be absent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MavenCoordinates {
    pub group_id: Option<String>,
    pub artifact_id: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MavenProject {
    #[serde(flatten)]
    pub coordinates: MavenCoordinates,
    pub name: Option<String>,
    pub description: Option<String>,
    pub parent: Option<MavenCoordinates>,
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MavenDependency {
    #[serde(flatten)]
    pub coordinates: MavenCoordinates,
    pub scope: Option<String>,
    pub classifier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MavenPlugin {
    #[serde(flatten)]
    pub coordinates: MavenCoordinates,
    pub configuration: BTreeMap<String, String>,
}

/// Deployment descriptor fields read from `mule-artifact.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuleArtifact {
    pub name: Option<String>,
    pub mule_version: Option<String>,
    pub product: Option<String>,
    pub class_loader_type: Option<String>,
    pub bundle_type: Option<String>,
    pub config_files: Vec<String>,
    /// Names of properties the runtime decrypts
    pub secure_properties: Vec<String>,
}

/// A properties-file entry that looks like a secret. The value is never kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureProperty {
    pub key: String,
    pub masked_value: String,
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiSpec {
    /// Path relative to the application root
    pub file: String,
    /// Upper-cased extension: `RAML`, `YAML`, `YML` or `JSON`
    #[serde(rename = "type")]
    pub spec_type: String,
    pub size: u64,
    pub title: Option<String>,
    pub version: Option<String>,
}

/// Build and packaging facts about an application, gathered from the files
/// around its flow documents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationMetadata {
    pub maven: Option<MavenProject>,
    pub dependencies: Vec<MavenDependency>,
    pub plugins: Vec<MavenPlugin>,
    /// Main section of `META-INF/MANIFEST.MF`
    pub manifest: BTreeMap<String, String>,
    pub artifact: Option<MuleArtifact>,
    pub build_properties: BTreeMap<String, String>,
    pub secure_properties: Vec<SecureProperty>,
    pub api_specs: Vec<ApiSpec>,
}

impl ApplicationMetadata {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// `groupId:artifactId:version` of the project, when the pom names one
    pub fn coordinates(&self) -> Option<String> {
        let c = &self.maven.as_ref()?.coordinates;
        let part = |p: &Option<String>| p.clone().unwrap_or_else(|| "?".to_string());
        c.artifact_id
            .as_ref()
            .map(|_| format!("{}:{}:{}", part(&c.group_id), part(&c.artifact_id), part(&c.version)))
    }
}

/// Collects metadata from a project directory or an unpacked package. A file
/// that cannot be read or parsed is logged and left out.
pub fn extract_metadata(root: &Path, skip_directories: &[String]) -> ApplicationMetadata {
    let files = files_under(root, skip_directories);
    let mut metadata = ApplicationMetadata::default();

    if let Some(pom) = project_pom(&files, root) {
        match read_pom(&pom) {
            Ok(parsed) => {
                metadata.maven = Some(parsed.project);
                metadata.dependencies = parsed.dependencies;
                metadata.plugins = parsed.plugins;
            }
            Err(e) => warn!("Skipping project pom: {:#}", e),
        }
    }
    add_packaged_dependencies(&mut metadata, &files);

    let manifest = root.join(MANIFEST_PATH);
    if manifest.is_file() {
        match std::fs::read_to_string(&manifest) {
            Ok(content) => metadata.manifest = parse_manifest(&content),
            Err(e) => warn!("Cannot read {}: {}", manifest.display(), e),
        }
    }

    if let Some(descriptor) = first_existing(root, ARTIFACT_DESCRIPTORS) {
        match read_artifact(&descriptor) {
            Ok(artifact) => metadata.artifact = Some(artifact),
            Err(e) => warn!("Skipping artifact descriptor: {:#}", e),
        }
    }

    if let Some(path) = first_existing(root, BUILD_PROPERTIES) {
        match std::fs::read_to_string(&path) {
            Ok(content) => metadata.build_properties = parse_properties(&content).into_iter().collect(),
            Err(e) => warn!("Cannot read {}: {}", path.display(), e),
        }
    }

    for path in files.iter().filter(|p| has_extension(p, &["properties"])) {
        if file_name(path) == POM_PROPERTIES_FILE {
            continue;
        }
        match std::fs::read_to_string(path) {
            Ok(content) => metadata
                .secure_properties
                .extend(secure_properties(&content, &relative(root, path))),
            Err(e) => warn!("Cannot read {}: {}", path.display(), e),
        }
    }

    metadata.api_specs = files
        .iter()
        .filter(|p| is_api_spec(p))
        .filter_map(|p| match read_api_spec(root, p) {
            Ok(spec) => Some(spec),
            Err(e) => {
                warn!("Skipping API specification: {:#}", e);
                None
            }
        })
        .collect();

    debug!(
        "Metadata: {} dependencies, {} secure properties, {} API specs",
        metadata.dependencies.len(),
        metadata.secure_properties.len(),
        metadata.api_specs.len()
    );
    metadata
}

pub struct PomContents {
    pub project: MavenProject,
    pub dependencies: Vec<MavenDependency>,
    pub plugins: Vec<MavenPlugin>,
}

fn read_pom(path: &Path) -> Result<PomContents> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    parse_pom(&content).with_context(|| format!("invalid pom {}", path.display()))
}

/// Reads project coordinates, dependencies and build plugins from a pom.
/// Elements are matched by local name, so the Maven namespace is optional.
pub fn parse_pom(content: &str) -> Result<PomContents> {
    let doc = Document::parse(content)?;
    let project = doc.root_element();
    if project.tag_name().name() != "project" {
        bail!("root element is <{}>, not <project>", project.tag_name().name());
    }

    let parent = child(project, "parent").map(coordinates);
    let mut own = coordinates(project);
    // groupId and version are inherited from the parent when left out
    if let Some(parent) = &parent {
        own.group_id = own.group_id.or_else(|| parent.group_id.clone());
        own.version = own.version.or_else(|| parent.version.clone());
    }

    let maven = MavenProject {
        coordinates: own,
        name: child_text(project, "name"),
        description: child_text(project, "description"),
        parent,
        properties: child(project, "properties")
            .map(text_children)
            .unwrap_or_default(),
    };

    let dependencies = child(project, "dependencies")
        .map(|deps| {
            elements(deps, "dependency")
                .map(|dep| MavenDependency {
                    coordinates: coordinates(dep),
                    scope: child_text(dep, "scope"),
                    classifier: child_text(dep, "classifier"),
                })
                .collect()
        })
        .unwrap_or_default();

    let plugins = child(project, "build")
        .and_then(|build| child(build, "plugins"))
        .map(|plugins| {
            elements(plugins, "plugin")
                .map(|plugin| MavenPlugin {
                    coordinates: coordinates(plugin),
                    configuration: child(plugin, "configuration")
                        .map(text_children)
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(PomContents {
        project: maven,
        dependencies,
        plugins,
    })
}

/// Main-section entries of a JAR manifest. Lines starting with a space
/// continue the previous value.
pub fn parse_manifest(content: &str) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    let mut current: Option<(String, String)> = None;

    for line in content.lines() {
        if let Some(rest) = line.strip_prefix(' ') {
            if let Some((_, value)) = current.as_mut() {
                value.push_str(rest);
            }
            continue;
        }
        if let Some((key, value)) = current.take() {
            entries.insert(key, value);
        }
        // a blank line ends the main section
        if line.trim().is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            current = Some((key.trim().to_string(), value.trim_start().to_string()));
        }
    }
    if let Some((key, value)) = current {
        entries.insert(key, value);
    }
    entries
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactDescriptor {
    name: Option<String>,
    min_mule_version: Option<String>,
    required_product: Option<String>,
    class_loader_model_loader_descriptor: Option<LoaderDescriptor>,
    bundle_descriptor_loader: Option<LoaderDescriptor>,
    #[serde(default)]
    configs: Vec<String>,
    #[serde(default)]
    secure_properties: Vec<String>,
}

#[derive(Deserialize)]
struct LoaderDescriptor {
    id: Option<String>,
}

fn read_artifact(path: &Path) -> Result<MuleArtifact> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    parse_artifact(&content).with_context(|| format!("invalid descriptor {}", path.display()))
}

pub fn parse_artifact(content: &str) -> Result<MuleArtifact> {
    let descriptor: ArtifactDescriptor = serde_json::from_str(content)?;
    Ok(MuleArtifact {
        name: descriptor.name,
        mule_version: descriptor.min_mule_version,
        product: descriptor.required_product,
        class_loader_type: descriptor.class_loader_model_loader_descriptor.and_then(|d| d.id),
        bundle_type: descriptor.bundle_descriptor_loader.and_then(|d| d.id),
        config_files: descriptor.configs,
        secure_properties: descriptor.secure_properties,
    })
}

/// `key=value` (or `key: value`) lines, skipping comments, in file order
pub fn parse_properties(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| {
            let split = line.find(|c| c == '=' || c == ':')?;
            let (key, value) = line.split_at(split);
            Some((key.trim().to_string(), value[1..].trim().to_string()))
        })
        .collect()
}

/// Entries whose key names a secret, or every entry of a `*secure*` file
pub fn secure_properties(content: &str, file: &str) -> Vec<SecureProperty> {
    let secure_file = file_name(Path::new(file)).to_lowercase().contains("secure");
    parse_properties(content)
        .into_iter()
        .filter(|(key, _)| {
            let key = key.to_lowercase();
            secure_file || SECURE_TERMS.iter().any(|term| key.contains(term))
        })
        .map(|(key, _)| SecureProperty {
            key,
            masked_value: MASK.to_string(),
            file: file.to_string(),
        })
        .collect()
}

fn read_api_spec(root: &Path, path: &Path) -> Result<ApiSpec> {
    let size = std::fs::metadata(path)
        .with_context(|| format!("cannot stat {}", path.display()))?
        .len();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_lowercase();

    let (title, version) = if extension == "raml" {
        (capture(&RAML_TITLE, &content), capture(&RAML_VERSION, &content))
    } else {
        openapi_info(&content)
    };

    Ok(ApiSpec {
        file: relative(root, path),
        spec_type: extension.to_uppercase(),
        size,
        title,
        version,
    })
}

// OpenAPI and Swagger documents keep both under `info`; JSON parses as YAML
fn openapi_info(content: &str) -> (Option<String>, Option<String>) {
    let Ok(value) = serde_yaml::from_str::<serde_yaml::Value>(content) else {
        return (None, None);
    };
    let field = |name: &str| {
        value
            .get("info")
            .and_then(|info| info.get(name))
            .and_then(|v| match v {
                serde_yaml::Value::String(s) => Some(s.clone()),
                serde_yaml::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    };
    (field("title"), field("version"))
}

fn capture(pattern: &Regex, content: &str) -> Option<String> {
    pattern
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_matches(|c| c == '"' || c == '\'').to_string())
}

fn add_packaged_dependencies(metadata: &mut ApplicationMetadata, files: &[PathBuf]) {
    let own = metadata.maven.as_ref().map(|m| m.coordinates.clone());

    for path in files.iter().filter(|p| file_name(p) == POM_PROPERTIES_FILE) {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Cannot read {}: {}", path.display(), e);
                continue;
            }
        };
        let properties: BTreeMap<String, String> = parse_properties(&content).into_iter().collect();
        let coordinates = MavenCoordinates {
            group_id: properties.get("groupId").cloned(),
            artifact_id: properties.get("artifactId").cloned(),
            version: properties.get("version").cloned(),
        };
        if coordinates.artifact_id.is_none() || Some(&coordinates) == own.as_ref() {
            continue;
        }
        let known = metadata
            .dependencies
            .iter()
            .any(|dep| dep.coordinates.group_id == coordinates.group_id
                && dep.coordinates.artifact_id == coordinates.artifact_id);
        if !known {
            metadata.dependencies.push(MavenDependency {
                coordinates,
                scope: None,
                classifier: None,
            });
        }
    }
}

// The shallowest pom wins: the project pom over copies under META-INF/maven
fn project_pom(files: &[PathBuf], root: &Path) -> Option<PathBuf> {
    files
        .iter()
        .filter(|p| file_name(p) == POM_FILE)
        .min_by_key(|p| {
            let depth = p.strip_prefix(root).map(|r| r.components().count()).unwrap_or(usize::MAX);
            (depth, (*p).clone())
        })
        .cloned()
}

fn is_api_spec(path: &Path) -> bool {
    has_extension(path, API_SPEC_EXTENSIONS)
        && path
            .parent()
            .and_then(|dir| dir.file_name())
            .map(|name| name == API_DIR)
            .unwrap_or(false)
}

fn files_under(root: &Path, skip_directories: &[String]) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !e.file_type().is_dir()
                || !skip_directories.iter().any(|skip| e.file_name() == skip.as_str())
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

fn first_existing(root: &Path, candidates: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(|candidate| root.join(candidate))
        .find(|path| path.is_file())
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|wanted| wanted.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|name| name.to_str()).unwrap_or_default()
}

fn relative(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|c| c.is_element() && c.tag_name().name() == name)
}

fn elements<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |c| c.is_element() && c.tag_name().name() == name)
}

fn child_text(node: Node, name: &str) -> Option<String> {
    child(node, name)
        .and_then(|c| c.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn coordinates(node: Node) -> MavenCoordinates {
    MavenCoordinates {
        group_id: child_text(node, "groupId"),
        artifact_id: child_text(node, "artifactId"),
        version: child_text(node, "version"),
    }
}

fn text_children(node: Node) -> BTreeMap<String, String> {
    node.children()
        .filter(|c| c.is_element())
        .map(|c| {
            let text = c.text().map(str::trim).unwrap_or_default();
            (c.tag_name().name().to_string(), text.to_string())
        })
        .collect()
}
