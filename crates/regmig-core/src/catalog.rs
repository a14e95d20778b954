//! Package and version discovery from a registry tree.
//!
//! Backends whose native API only exposes a file listing use these helpers
//! to implement `get_packages` / `get_versions`. The layout understood for
//! each artifact type:
//!
//! - NPM, Helm-legacy, Python, RPM, Conda, Cargo: archive file names such as
//!   `name-1.2.3.tgz`, grouped by directory
//! - Go: `<module>/@v/<version>.{info,mod,zip}`
//! - Maven: `<group path>/<artifactId>/<version>/<artifactId>-<version>*`
//! - Generic, NuGet, Dart: `<package>/<version>/**`
//!
//! OCI types are enumerated through a registry catalog API instead and are
//! rejected here.

use crate::error::{MigrateError, Result};
use crate::tree::{get_node_for_path, TreeNode};
use crate::types::{ArtifactType, Package, Version};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Name of the version holding loose files of a generic package
pub const LOOSE_FILES_VERSION: &str = "(root)";

static NPM_ARCHIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+?)-(\d+\.\d+\.\d+(?:[-+][0-9A-Za-z.+-]*)?)\.tgz$").expect("valid regex")
});
static CRATE_ARCHIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+?)-(\d+\.\d+\.\d+(?:[-+][0-9A-Za-z.+-]*)?)\.crate$").expect("valid regex")
});
static PYTHON_SDIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+)-(\d[^-]*)\.(?:tar\.gz|tar\.bz2|zip)$").expect("valid regex")
});
static RPM_PACKAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+)-([^-]+-[^-]+)\.[^.]+\.rpm$").expect("valid regex"));
static CONDA_PACKAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+)-([^-]+)-[^-]+\.(?:tar\.bz2|conda)$").expect("valid regex")
});
static PEP503_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-_.]+").expect("valid regex"));

/// PEP 503 normalised project name
pub fn normalize_python_name(name: &str) -> String {
    PEP503_SEPARATORS.replace_all(name, "-").to_lowercase()
}

/// Split an archive file name into `(package, version)` for filename-based formats
pub fn parse_archive_name(artifact_type: ArtifactType, file_name: &str) -> Option<(String, String)> {
    let captures = |re: &Regex| {
        re.captures(file_name)
            .map(|c| (c[1].to_string(), c[2].to_string()))
    };
    match artifact_type {
        ArtifactType::Npm | ArtifactType::HelmLegacy => captures(&NPM_ARCHIVE),
        ArtifactType::Cargo => captures(&CRATE_ARCHIVE),
        ArtifactType::Rpm => captures(&RPM_PACKAGE),
        ArtifactType::Conda => captures(&CONDA_PACKAGE),
        ArtifactType::Python => {
            if let Some(stem) = file_name.strip_suffix(".whl") {
                let mut parts = stem.split('-');
                match (parts.next(), parts.next()) {
                    (Some(name), Some(version)) if !name.is_empty() && !version.is_empty() => {
                        Some((normalize_python_name(name), version.to_string()))
                    }
                    _ => None,
                }
            } else {
                captures(&PYTHON_SDIST).map(|(n, v)| (normalize_python_name(&n), v))
            }
        }
        _ => None,
    }
}

fn is_filename_based(artifact_type: ArtifactType) -> bool {
    matches!(
        artifact_type,
        ArtifactType::Npm
            | ArtifactType::HelmLegacy
            | ArtifactType::Python
            | ArtifactType::Rpm
            | ArtifactType::Conda
            | ArtifactType::Cargo
    )
}

fn parent_key(key: &str) -> String {
    match key.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => key[..i].to_string(),
    }
}

/// NPM stores scoped packages as `@scope/name/-/name-1.0.0.tgz`
fn npm_package_name(dir_key: &str, bare: &str) -> String {
    let segments: Vec<&str> = dir_key.split('/').filter(|s| !s.is_empty()).collect();
    if let [.., scope, name, "-"] = segments.as_slice() {
        if scope.starts_with('@') && *name == bare {
            return format!("{}/{}", scope, name);
        }
    }
    bare.to_string()
}

fn walk<'a, F>(node: &'a Arc<TreeNode>, visit: &mut F)
where
    F: FnMut(&'a Arc<TreeNode>),
{
    visit(node);
    for child in &node.children {
        walk(child, visit);
    }
}

/// Discover packages of `artifact_type` in a registry tree
pub fn packages_from_tree(
    registry: &str,
    artifact_type: ArtifactType,
    root: &Arc<TreeNode>,
) -> Result<Vec<Package>> {
    let packages = match artifact_type {
        t if t.is_oci() => {
            return Err(MigrateError::Unsupported(format!(
                "{} packages cannot be derived from a file listing",
                t
            )))
        }
        t if is_filename_based(t) => archive_packages(registry, t, root),
        ArtifactType::Go => go_packages(registry, root),
        ArtifactType::Maven => maven_packages(registry, root),
        _ => directory_packages(registry, artifact_type, root),
    };
    debug!(registry, artifact_type = %artifact_type, count = packages.len(), "Discovered packages");
    Ok(packages)
}

/// Discover versions of `package`; `node` is the package's subtree
pub fn versions_from_tree(
    artifact_type: ArtifactType,
    package: &Package,
    node: &Arc<TreeNode>,
) -> Result<Vec<Version>> {
    if artifact_type.is_oci() {
        return Err(MigrateError::Unsupported(format!(
            "{} versions are copied with their repository",
            artifact_type
        )));
    }

    if let Some(ref version) = package.version {
        let file = package
            .url
            .as_deref()
            .and_then(|u| u.rsplit('/').next())
            .map(str::to_string);
        let mut v = Version::new(&package.registry, &package.name, version, &package.path);
        v.files = file.into_iter().collect();
        v.size = package.size;
        return Ok(vec![v]);
    }

    let versions = if is_filename_based(artifact_type) {
        archive_versions(artifact_type, package, node)
    } else {
        match artifact_type {
            ArtifactType::Go => go_versions(package, node),
            ArtifactType::Maven => node
                .dirs()
                .filter(|d| is_maven_version_dir(&node.name, d))
                .map(|d| sized(Version::new(&package.registry, &package.name, &d.name, &d.key), d))
                .collect(),
            _ => directory_versions(artifact_type, package, node),
        }
    };
    Ok(versions)
}

fn sized(mut version: Version, node: &TreeNode) -> Version {
    version.size = node.size();
    version
}

fn archive_packages(registry: &str, artifact_type: ArtifactType, root: &Arc<TreeNode>) -> Vec<Package> {
    let mut grouped: BTreeMap<(String, String), u64> = BTreeMap::new();
    walk(root, &mut |node| {
        if let (true, Some(file)) = (node.is_leaf, node.file.as_ref()) {
            if let Some((bare, _)) = parse_archive_name(artifact_type, &file.name) {
                let dir = parent_key(&node.key);
                let name = if artifact_type == ArtifactType::Npm {
                    npm_package_name(&dir, &bare)
                } else {
                    bare
                };
                *grouped.entry((dir, name)).or_default() += file.size;
            }
        }
    });

    grouped
        .into_iter()
        .map(|((dir, name), size)| Package {
            size,
            ..Package::new(registry, dir, name)
        })
        .collect()
}

fn archive_versions(artifact_type: ArtifactType, package: &Package, node: &Arc<TreeNode>) -> Vec<Version> {
    let bare = package.name.rsplit('/').next().unwrap_or(&package.name);
    let mut grouped: BTreeMap<String, Vec<(String, u64)>> = BTreeMap::new();
    for leaf in node.leaves() {
        let Some(file) = leaf.file.as_ref() else { continue };
        if let Some((name, version)) = parse_archive_name(artifact_type, &file.name) {
            if name == bare {
                grouped
                    .entry(version)
                    .or_default()
                    .push((file.name.clone(), file.size));
            }
        }
    }

    grouped
        .into_iter()
        .map(|(version, files)| {
            let size = files.iter().map(|(_, s)| s).sum();
            let mut v = Version::new(&package.registry, &package.name, version, &node.key)
                .with_files(files.into_iter().map(|(n, _)| n).collect());
            v.size = size;
            v
        })
        .collect()
}

fn go_packages(registry: &str, root: &Arc<TreeNode>) -> Vec<Package> {
    let mut packages = Vec::new();
    walk(root, &mut |node| {
        if !node.is_leaf && node.name == "@v" {
            let module_key = parent_key(&node.key);
            let name = module_key.trim_start_matches('/').to_string();
            packages.push(Package {
                size: node.size(),
                ..Package::new(registry, module_key, name)
            });
        }
    });
    packages
}

fn go_versions(package: &Package, node: &Arc<TreeNode>) -> Vec<Version> {
    let Some(versions_dir) = node.child("@v") else {
        return Vec::new();
    };
    let mut grouped: BTreeMap<String, Vec<(String, u64)>> = BTreeMap::new();
    for leaf in versions_dir.leaves() {
        let Some(file) = leaf.file.as_ref() else { continue };
        let stem = [".info", ".mod", ".zip"]
            .iter()
            .find_map(|ext| file.name.strip_suffix(ext));
        if let Some(version) = stem {
            grouped
                .entry(version.to_string())
                .or_default()
                .push((file.name.clone(), file.size));
        }
    }

    grouped
        .into_iter()
        .map(|(version, files)| {
            let size = files.iter().map(|(_, s)| s).sum();
            let mut v = Version::new(&package.registry, &package.name, version, &versions_dir.key)
                .with_files(files.into_iter().map(|(n, _)| n).collect());
            v.size = size;
            v
        })
        .collect()
}

fn is_maven_version_dir(artifact_id: &str, dir: &TreeNode) -> bool {
    let prefix = format!("{}-{}", artifact_id, dir.name);
    dir.leaves().any(|l| l.name.starts_with(&prefix))
}

fn maven_packages(registry: &str, root: &Arc<TreeNode>) -> Vec<Package> {
    let mut packages = Vec::new();
    walk(root, &mut |node| {
        if node.is_leaf || node.key == "/" {
            return;
        }
        if node.dirs().any(|d| is_maven_version_dir(&node.name, d)) {
            let group = parent_key(&node.key)
                .trim_start_matches('/')
                .replace('/', ".");
            let name = if group.is_empty() {
                node.name.clone()
            } else {
                format!("{}:{}", group, node.name)
            };
            packages.push(Package {
                size: node.size(),
                ..Package::new(registry, &node.key, name)
            });
        }
    });
    packages
}

fn directory_packages(registry: &str, artifact_type: ArtifactType, root: &Arc<TreeNode>) -> Vec<Package> {
    let mut packages: Vec<Package> = root
        .dirs()
        .map(|d| Package {
            size: d.size(),
            ..Package::new(registry, &d.key, &d.name)
        })
        .collect();

    let loose = root.leaves().count();
    if loose > 0 {
        if artifact_type == ArtifactType::Generic {
            packages.push(Package {
                size: root.leaves().filter_map(|l| l.file.as_ref()).map(|f| f.size).sum(),
                ..Package::new(registry, "/", LOOSE_FILES_VERSION)
            });
        } else {
            warn!(registry, count = loose, artifact_type = %artifact_type, "Ignoring files outside any package directory");
        }
    }
    packages
}

fn directory_versions(artifact_type: ArtifactType, package: &Package, node: &Arc<TreeNode>) -> Vec<Version> {
    let mut versions: Vec<Version> = if package.name == LOOSE_FILES_VERSION {
        Vec::new()
    } else {
        node.dirs()
            .map(|d| sized(Version::new(&package.registry, &package.name, &d.name, &d.key), d))
            .collect()
    };

    let loose: Vec<(String, u64)> = node
        .leaves()
        .filter_map(|l| l.file.as_ref())
        .map(|f| (f.name.clone(), f.size))
        .collect();
    if !loose.is_empty() {
        if artifact_type == ArtifactType::Generic {
            let size = loose.iter().map(|(_, s)| s).sum();
            let mut v = Version::new(&package.registry, &package.name, LOOSE_FILES_VERSION, &node.key)
                .with_files(loose.into_iter().map(|(n, _)| n).collect());
            v.size = size;
            versions.push(v);
        } else {
            warn!(package = %package.name, count = loose.len(), "Ignoring files outside any version directory");
        }
    }
    versions
}

/// True when `root` holds `version` of `package`, using the same discovery rules
pub fn tree_has_version(
    registry: &str,
    artifact_type: ArtifactType,
    root: &Arc<TreeNode>,
    package: &str,
    version: &str,
) -> Result<bool> {
    for pkg in packages_from_tree(registry, artifact_type, root)?
        .iter()
        .filter(|p| p.name == package)
    {
        let node = get_node_for_path(root, &pkg.path)?;
        if versions_from_tree(artifact_type, pkg, &node)?
            .iter()
            .any(|v| v.name == version)
        {
            return Ok(true);
        }
    }
    Ok(false)
}

#[derive(Debug, Deserialize)]
struct HelmIndex {
    #[serde(default)]
    entries: BTreeMap<String, Vec<HelmIndexEntry>>,
}

#[derive(Debug, Deserialize)]
struct HelmIndexEntry {
    version: serde_yaml::Value,
    #[serde(default)]
    urls: Vec<String>,
}

/// Packages listed in a Helm repository `index.yaml`, one per chart version.
///
/// Entries whose archive is absent from `root` are skipped.
pub fn packages_from_helm_index(registry: &str, index_yaml: &str, root: &Arc<TreeNode>) -> Result<Vec<Package>> {
    let index: HelmIndex = serde_yaml::from_str(index_yaml)?;
    let mut packages = Vec::new();

    for (chart, entries) in index.entries {
        for entry in entries {
            // Unquoted versions such as `1.2` load as numbers
            let version = match entry.version {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                other => {
                    warn!(chart = %chart, version = ?other, "Skipping chart entry with invalid version");
                    continue;
                }
            };
            let Some(url) = entry.urls.first() else {
                warn!(chart = %chart, version = %version, "Chart entry without URLs");
                continue;
            };
            // Absolute URLs point at the repository root; keep only the path part
            let relative = match url.split_once("://") {
                Some((_, rest)) => rest.split_once('/').map(|(_, p)| p).unwrap_or(rest),
                None => url.as_str(),
            };
            let relative = relative.trim_start_matches('/');
            let Ok(leaf) = get_node_for_path(root, relative) else {
                warn!(chart = %chart, url = %url, "Chart archive listed in index but not found");
                continue;
            };
            packages.push(Package {
                size: leaf.size(),
                url: Some(relative.to_string()),
                version: Some(version.clone()),
                ..Package::new(registry, parent_key(&leaf.key), &chart)
            });
        }
    }
    Ok(packages)
}
