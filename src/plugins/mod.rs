//! Plugin discovery and execution.
//!
//! Plugins are standalone executables discovered by extension in the
//! configured directory. Metadata lives in header comments:
//!
//! ```text
//! # @@ okta
//! # @T category authentication
//! # @T source okta
//! ```
//!
//! `@@` names the plugin; each `@T` line contributes one term to the
//! conjunction the event source is queried with. At run time the plugin
//! receives `{"events": [...]}` on stdin and must print
//! `{"results": [...]}` on stdout and exit zero.

pub mod event;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use log::info;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub use event::{EventResult, PluginResult};

/// File extension plugin executables are discovered by.
const PLUGIN_EXTENSION: &str = "py";

/// One `(field, value)` filter term from a plugin header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginTerm {
    pub field: String,
    pub value: String,
}

/// A discovered plugin.
#[derive(Debug, Clone)]
pub struct Plugin {
    pub name: String,
    pub path: PathBuf,
    pub terms: Vec<PluginTerm>,
}

/// The document handed to a plugin on stdin: raw event JSON straight from
/// the event source.
#[derive(Debug, Default, Serialize)]
pub struct PluginRequest {
    pub events: Vec<serde_json::Value>,
}

impl Plugin {
    /// Runs the plugin subprocess over `input` and returns its validated
    /// results.
    ///
    /// A non-zero exit status or malformed output is a hard error for
    /// this plugin on this window.
    pub async fn run(&self, input: &PluginRequest) -> Result<PluginResult> {
        let payload = serde_json::to_vec(input).context("failed to encode plugin request")?;

        let mut child = Command::new(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn plugin {}", self.path.display()))?;

        let mut stdin = child
            .stdin
            .take()
            .context("plugin stdin unavailable")?;
        stdin
            .write_all(&payload)
            .await
            .with_context(|| format!("failed to write to plugin {}", self.name))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("failed waiting for plugin {}", self.name))?;
        if !output.status.success() {
            bail!("plugin {} exited with status {}", self.name, output.status);
        }

        let mut result: PluginResult = serde_json::from_slice(&output.stdout)
            .with_context(|| format!("plugin {} produced malformed output", self.name))?;
        result.validate()?;
        Ok(result)
    }
}

/// Parses plugin metadata from the executable's header comments.
pub fn plugin_from_file(path: &Path) -> Result<Plugin> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read plugin: {}", path.display()))?;

    let mut plugin = Plugin {
        name: String::new(),
        path: path.to_path_buf(),
        terms: Vec::new(),
    };
    for line in content.lines() {
        let args: Vec<&str> = line.split(' ').collect();
        if args.len() < 3 || args[0] != "#" {
            continue;
        }
        if args[1] == "@@" {
            plugin.name = args[2].to_string();
        } else if args[1] == "@T" && args.len() >= 4 {
            plugin.terms.push(PluginTerm {
                field: args[2].to_string(),
                value: args[3].to_string(),
            });
        }
    }
    Ok(plugin)
}

/// Discovers every plugin in `dir`.
///
/// Files without a `@@` name line are skipped; their results could never
/// pass event validation.
pub fn load_plugins(dir: &Path) -> Result<Vec<Plugin>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read plugins directory: {}", dir.display()))?;

    let mut plugins = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(PLUGIN_EXTENSION) {
            continue;
        }
        let plugin = plugin_from_file(&path)?;
        if plugin.name.is_empty() {
            log::warn!("plugin {} has no name header, skipping", path.display());
            continue;
        }
        info!("added plugin {} ({} terms)", plugin.name, plugin.terms.len());
        plugins.push(plugin);
    }
    Ok(plugins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_plugin(dir: &Path, fname: &str, header: &str) -> PathBuf {
        let path = dir.join(fname);
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/usr/bin/env python3").unwrap();
        write!(f, "{}", header).unwrap();
        path
    }

    #[test]
    fn test_plugin_from_file_parses_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_plugin(
            dir.path(),
            "okta.py",
            "# @@ okta\n# @T category authentication\n# @T source okta\nprint('hi')\n",
        );
        let plugin = plugin_from_file(&path).unwrap();
        assert_eq!(plugin.name, "okta");
        assert_eq!(
            plugin.terms,
            vec![
                PluginTerm {
                    field: "category".to_string(),
                    value: "authentication".to_string()
                },
                PluginTerm {
                    field: "source".to_string(),
                    value: "okta".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_load_plugins_filters_extension_and_nameless() {
        let dir = tempfile::tempdir().unwrap();
        write_plugin(dir.path(), "okta.py", "# @@ okta\n");
        write_plugin(dir.path(), "readme.txt", "# @@ not-a-plugin\n");
        write_plugin(dir.path(), "broken.py", "# no metadata here\n");

        let plugins = load_plugins(dir.path()).unwrap();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].name, "okta");
    }

    #[tokio::test]
    async fn test_run_plugin_round_trip() {
        // A plugin that echoes a fixed result document.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("echo.py");
        std::fs::write(
            &path,
            "#!/bin/sh\n# @@ echo\necho '{\"results\":[{\"timestamp\":\"2024-05-01T10:00:00Z\",\"principal\":\"user@host.com\",\"source_ipv4\":\"63.245.214.133\",\"valid\":true,\"name\":\"echo\"}]}'\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let plugin = plugin_from_file(&path).unwrap();
        let result = plugin.run(&PluginRequest::default()).await.unwrap();
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.results[0].principal, "user@host.com");
    }

    #[tokio::test]
    async fn test_run_plugin_nonzero_exit_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fail.py");
        std::fs::write(&path, "#!/bin/sh\n# @@ fail\nexit 3\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let plugin = plugin_from_file(&path).unwrap();
        assert!(plugin.run(&PluginRequest::default()).await.is_err());
    }
}
