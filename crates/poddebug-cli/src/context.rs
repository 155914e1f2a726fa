//! Identity resolution
//!
//! The session layer always receives an already-resolved identity. This
//! module is the CLI's resolver: explicit flags win, then environment
//! variables (via clap's env support), then a `.poddebug.json` project file
//! in the working directory.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;

use poddebug_store::SessionKey;

pub const PROJECT_FILE: &str = ".poddebug.json";

/// Component identity flags, shared by every subcommand
#[derive(Args, Debug, Default)]
pub struct IdentityArgs {
    /// Component name
    #[arg(long, env = "PODDEBUG_COMPONENT", global = true)]
    pub component: Option<String>,

    /// Application name
    #[arg(long = "app", env = "PODDEBUG_APP", global = true)]
    pub application: Option<String>,

    /// Namespace (project) in the cluster
    #[arg(long, env = "PODDEBUG_NAMESPACE", global = true)]
    pub namespace: Option<String>,
}

/// Per-project defaults, the stand-in for devfile/local-config resolution
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ProjectConfig {
    component: Option<String>,
    application: Option<String>,
    namespace: Option<String>,
}

fn load_project_config(dir: &Path) -> Result<ProjectConfig> {
    let path = dir.join(PROJECT_FILE);
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read project file {:?}", path))?;
    serde_json::from_str(&json).with_context(|| format!("Failed to parse project file {:?}", path))
}

/// Resolve the identity key from flags, environment, and the project file
pub fn resolve_identity(args: &IdentityArgs, project_dir: &Path) -> Result<SessionKey> {
    let project = load_project_config(project_dir)?;

    let component = args
        .component
        .clone()
        .or(project.component)
        .context("No component selected; pass --component or add a .poddebug.json")?;
    let application = args
        .application
        .clone()
        .or(project.application)
        .unwrap_or_default();
    let namespace = args
        .namespace
        .clone()
        .or(project.namespace)
        .context("No namespace selected; pass --namespace or add a .poddebug.json")?;

    SessionKey::new(component, application, namespace)
        .context("Invalid component identity")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_flags_only() {
        let temp = TempDir::new().unwrap();
        let args = IdentityArgs {
            component: Some("web".to_string()),
            application: Some("app".to_string()),
            namespace: Some("ns".to_string()),
        };

        let key = resolve_identity(&args, temp.path()).unwrap();
        assert_eq!(key.component, "web");
        assert_eq!(key.application, "app");
        assert_eq!(key.namespace, "ns");
    }

    #[test]
    fn test_project_file_fills_gaps() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(PROJECT_FILE),
            r#"{"component": "web", "namespace": "ns"}"#,
        )
        .unwrap();

        let key = resolve_identity(&IdentityArgs::default(), temp.path()).unwrap();
        assert_eq!(key.component, "web");
        assert_eq!(key.application, "");
        assert_eq!(key.namespace, "ns");
    }

    #[test]
    fn test_flags_override_project_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(PROJECT_FILE),
            r#"{"component": "web", "namespace": "ns"}"#,
        )
        .unwrap();

        let args = IdentityArgs {
            component: Some("api".to_string()),
            ..Default::default()
        };
        let key = resolve_identity(&args, temp.path()).unwrap();
        assert_eq!(key.component, "api");
        assert_eq!(key.namespace, "ns");
    }

    #[test]
    fn test_missing_component_is_an_error() {
        let temp = TempDir::new().unwrap();
        let args = IdentityArgs {
            namespace: Some("ns".to_string()),
            ..Default::default()
        };

        assert!(resolve_identity(&args, temp.path()).is_err());
    }

    #[test]
    fn test_malformed_project_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(PROJECT_FILE), "{oops").unwrap();

        assert!(resolve_identity(&IdentityArgs::default(), temp.path()).is_err());
    }
}
