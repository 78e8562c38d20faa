use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use minijinja::Value;
use serde::Deserialize;

use crate::context::GlobalVars;
use crate::error::{Result, SiteError};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub serve: ServeConfig,
    /// Global template variables
    #[serde(default)]
    pub vars: toml::Table,
}

/// Site directories, relative to the site root
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_templates")]
    pub templates: PathBuf,

    #[serde(default = "default_output")]
    pub output: PathBuf,

    #[serde(default = "default_static", rename = "static")]
    pub static_dir: PathBuf,

    #[serde(default = "default_styles")]
    pub styles: PathBuf,
}

fn default_templates() -> PathBuf {
    PathBuf::from("templates")
}

fn default_output() -> PathBuf {
    PathBuf::from("public")
}

fn default_static() -> PathBuf {
    PathBuf::from("static")
}

fn default_styles() -> PathBuf {
    PathBuf::from("styles")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            templates: default_templates(),
            output: default_output(),
            static_dir: default_static(),
            styles: default_styles(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    /// Enable HTML and CSS minification
    #[serde(default = "default_true")]
    pub minify: bool,
}

fn default_true() -> bool {
    true
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self { minify: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServeConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl SiteConfig {
    pub async fn load(site_path: &Path) -> Result<Self> {
        let config_path = site_path.join("config.toml");

        if !config_path.exists() {
            return Ok(SiteConfig::default());
        }

        let content = tokio::fs::read_to_string(&config_path)
            .await
            .map_err(|e| SiteError::ConfigRead {
                path: (&config_path).into(),
                cause: e,
            })?;

        Self::parse(&config_path, &content)
    }

    pub fn parse(config_path: &Path, content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SiteError::config_parse(config_path, content, e))
    }

    /// `[vars]` from the config with command-line `--var` overrides on top
    pub fn global_vars(&self, overrides: &[(String, String)]) -> GlobalVars {
        let mut vars: GlobalVars = self
            .vars
            .iter()
            .map(|(key, value)| (key.clone(), toml_to_value(value)))
            .collect();

        for (key, value) in overrides {
            vars.insert(key.clone(), Value::from(value.as_str()));
        }

        vars
    }
}

fn toml_to_value(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::from(s.as_str()),
        toml::Value::Integer(i) => Value::from(*i),
        toml::Value::Float(f) => Value::from(*f),
        toml::Value::Boolean(b) => Value::from(*b),
        toml::Value::Datetime(dt) => Value::from(dt.to_string()),
        toml::Value::Array(items) => items.iter().map(toml_to_value).collect(),
        toml::Value::Table(table) => Value::from(
            table
                .iter()
                .map(|(key, value)| (key.clone(), toml_to_value(value)))
                .collect::<BTreeMap<String, Value>>(),
        ),
    }
}

/// Parse a `KEY=VALUE` command-line variable
pub fn parse_var(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{}`", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing variable name in `{}`", s));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config = SiteConfig::parse(Path::new("config.toml"), "").unwrap();
        assert_eq!(config.paths.templates, PathBuf::from("templates"));
        assert_eq!(config.paths.output, PathBuf::from("public"));
        assert_eq!(config.paths.static_dir, PathBuf::from("static"));
        assert!(config.build.minify);
        assert_eq!(config.serve.port, 8080);
        assert!(config.vars.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let config = SiteConfig::parse(
            Path::new("config.toml"),
            r#"
[paths]
templates = "src"
output = "dist"
static = "assets"

[build]
minify = false

[serve]
port = 3000

[vars]
site_name = "Frost"
year = 2024
nav = ["home", "about"]
"#,
        )
        .unwrap();

        assert_eq!(config.paths.templates, PathBuf::from("src"));
        assert_eq!(config.paths.static_dir, PathBuf::from("assets"));
        assert!(!config.build.minify);
        assert_eq!(config.serve.port, 3000);

        let vars = config.global_vars(&[]);
        assert_eq!(vars["site_name"].as_str(), Some("Frost"));
        assert_eq!(i64::try_from(vars["year"].clone()).ok(), Some(2024));
        assert_eq!(vars["nav"].len(), Some(2));
    }

    #[test]
    fn test_cli_vars_override_config() {
        let config =
            SiteConfig::parse(Path::new("config.toml"), "[vars]\ntitle = \"Config\"\n").unwrap();
        let vars = config.global_vars(&[("title".to_string(), "Cli".to_string())]);
        assert_eq!(vars["title"].as_str(), Some("Cli"));
    }

    #[test]
    fn test_invalid_config_reports_parse_error() {
        let err = SiteConfig::parse(Path::new("config.toml"), "[build\nminify = true").unwrap_err();
        assert!(matches!(err, SiteError::ConfigParse { .. }));
    }

    #[test]
    fn test_parse_var() {
        assert_eq!(
            parse_var("title=Hello = World").unwrap(),
            ("title".to_string(), "Hello = World".to_string())
        );
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=x").is_err());
    }
}
