use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use crate::container::Container;
use crate::error::IgnisError;

/// Where to look for one artifact kind: directories relative to the
/// project root and the file extensions that identify the artifact.
#[derive(Debug, Clone)]
pub struct ArtifactConventions {
    pub dirs: Vec<String>,
    pub extensions: Vec<String>,
}

/// Per-kind discovery outcome.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArtifactReport {
    pub discovered: usize,
    pub loaded: usize,
    pub errors: usize,
    pub files: Vec<String>,
}

/// Summary emitted after a discovery run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryReport {
    pub duration_ms: u128,
    pub artifacts: HashMap<String, ArtifactReport>,
    pub phases: Vec<String>,
    pub success: bool,
    pub total_loaded: usize,
    pub total_errors: usize,
}

type ArtifactFactory = Box<dyn Fn(&Container) -> Result<String, IgnisError> + Send + Sync>;

/// Convention-based artifact discovery.
///
/// Enumerates files under each kind's directories, matches them against
/// the registered extensions, and pairs each match with a registered
/// factory by file stem. Matched factories bind the artifact into the
/// container under `namespace.<Name>`. Compiled code cannot be imported
/// at runtime, so factories are registered up front and the scan decides
/// which of them load.
pub struct DiscoveryBooter {
    root: PathBuf,
    conventions: Vec<(String, ArtifactConventions)>,
    factories: HashMap<(String, String), ArtifactFactory>,
}

impl DiscoveryBooter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            conventions: Vec::new(),
            factories: HashMap::new(),
        }
    }

    /// Declare where artifacts of `kind` live and how their files end.
    pub fn convention(mut self, kind: &str, conventions: ArtifactConventions) -> Self {
        self.conventions.push((kind.to_string(), conventions));
        self
    }

    /// Register a factory for the artifact whose file stem is `stem`.
    ///
    /// The factory binds the artifact and returns the binding key it used.
    pub fn factory<F>(mut self, kind: &str, stem: &str, factory: F) -> Self
    where
        F: Fn(&Container) -> Result<String, IgnisError> + Send + Sync + 'static,
    {
        self.factories
            .insert((kind.to_string(), stem.to_string()), Box::new(factory));
        self
    }

    /// Scan, load, and report.
    pub fn discover(&self, container: &Container) -> DiscoveryReport {
        let started = Instant::now();
        let mut artifacts: HashMap<String, ArtifactReport> = HashMap::new();
        let mut total_loaded = 0;
        let mut total_errors = 0;

        for (kind, conventions) in &self.conventions {
            let report = artifacts.entry(kind.clone()).or_default();
            for dir in &conventions.dirs {
                let dir_path = self.root.join(dir);
                let mut files = Vec::new();
                collect_files(&dir_path, &mut files);
                for file in files {
                    let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };
                    let Some(stem) = match_extension(name, &conventions.extensions) else {
                        continue;
                    };
                    report.discovered += 1;
                    report.files.push(display_relative(&self.root, &file));

                    match self.factories.get(&(kind.clone(), stem.to_string())) {
                        Some(factory) => match factory(container) {
                            Ok(key) => {
                                debug!(kind = %kind, key = %key, "artifact loaded");
                                report.loaded += 1;
                            }
                            Err(err) => {
                                warn!(kind = %kind, file = %name, error = %err, "artifact failed to load");
                                report.errors += 1;
                            }
                        },
                        None => {
                            debug!(kind = %kind, file = %name, "no factory registered for artifact");
                        }
                    }
                }
            }
            total_loaded += report.loaded;
            total_errors += report.errors;
        }

        DiscoveryReport {
            duration_ms: started.elapsed().as_millis(),
            artifacts,
            phases: vec!["scan".into(), "load".into()],
            success: total_errors == 0,
            total_loaded,
            total_errors,
        }
    }
}

/// Strip the longest matching registered extension, or `None`.
fn match_extension<'a>(file_name: &'a str, extensions: &[String]) -> Option<&'a str> {
    extensions
        .iter()
        .filter(|ext| file_name.ends_with(ext.as_str()))
        .max_by_key(|ext| ext.len())
        .map(|ext| &file_name[..file_name.len() - ext.len()])
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    paths.sort();
    for path in paths {
        if path.is_dir() {
            collect_files(&path, out);
        } else {
            out.push(path);
        }
    }
}

fn display_relative(root: &Path, file: &Path) -> String {
    file.strip_prefix(root)
        .unwrap_or(file)
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn discovery_loads_registered_factories_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("controllers/user.controller.js"));
        touch(&dir.path().join("controllers/order.controller.js"));
        touch(&dir.path().join("controllers/readme.md"));
        touch(&dir.path().join("models/user.model.js"));

        let booter = DiscoveryBooter::new(dir.path())
            .convention(
                "controllers",
                ArtifactConventions {
                    dirs: vec!["controllers".into()],
                    extensions: vec![".controller.js".into()],
                },
            )
            .convention(
                "models",
                ArtifactConventions {
                    dirs: vec!["models".into()],
                    extensions: vec![".model.js".into()],
                },
            )
            .factory("controllers", "user", |container| {
                container.bind("controllers.UserController").to_value(1u8);
                Ok("controllers.UserController".into())
            })
            .factory("models", "user", |container| {
                container.bind("models.User").to_value(2u8);
                Ok("models.User".into())
            });

        let container = Container::new();
        let report = booter.discover(&container);

        assert!(report.success);
        assert_eq!(report.total_loaded, 2);
        assert_eq!(report.total_errors, 0);
        assert_eq!(report.phases, vec!["scan", "load"]);

        let controllers = &report.artifacts["controllers"];
        assert_eq!(controllers.discovered, 2);
        assert_eq!(controllers.loaded, 1);
        assert!(container.contains("controllers.UserController"));
        assert!(container.contains("models.User"));
    }

    #[test]
    fn factory_failure_counts_as_error() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("controllers/bad.controller.js"));

        let booter = DiscoveryBooter::new(dir.path())
            .convention(
                "controllers",
                ArtifactConventions {
                    dirs: vec!["controllers".into()],
                    extensions: vec![".controller.js".into()],
                },
            )
            .factory("controllers", "bad", |_container| {
                Err(IgnisError::config_invalid("broken artifact"))
            });

        let report = booter.discover(&Container::new());
        assert!(!report.success);
        assert_eq!(report.total_errors, 1);
        assert_eq!(report.artifacts["controllers"].discovered, 1);
    }

    #[test]
    fn missing_directories_are_not_errors() {
        let dir = tempfile::tempdir().unwrap();
        let booter = DiscoveryBooter::new(dir.path()).convention(
            "controllers",
            ArtifactConventions {
                dirs: vec!["does-not-exist".into()],
                extensions: vec![".controller.js".into()],
            },
        );
        let report = booter.discover(&Container::new());
        assert!(report.success);
        assert_eq!(report.total_loaded, 0);
    }
}
