use std::path::{Path, PathBuf};

use anyhow::Context;

use getset::Getters;

use log::info;

use serde::{Deserialize, Serialize};

use tokio::{fs::File, io::AsyncReadExt};

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8080";

const TEMPLATES_DIRECTORY: &str = "templates";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ServerType {
    TCP,
    UNIX,
}

#[derive(Debug, Clone, Deserialize, Serialize, Getters)]
#[getset(get = "pub")]
pub struct FastCGIConnectionConfiguration {
    max_concurrent_connections: u8,
    max_requests_per_connection: u8,
}

impl Default for FastCGIConnectionConfiguration {
    fn default() -> Self {
        Self {
            max_concurrent_connections: 10,
            max_requests_per_connection: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Getters)]
#[getset(get = "pub")]
pub struct ServerConfiguration {
    server_type: ServerType,
    bind_address: String,
    #[serde(default)]
    fastcgi_connection_configuration: FastCGIConnectionConfiguration,
}

impl Default for ServerConfiguration {
    fn default() -> Self {
        Self {
            server_type: ServerType::TCP,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            fastcgi_connection_configuration: FastCGIConnectionConfiguration::default(),
        }
    }
}

/// One routing rule: requests whose URI matches `pattern` render `template`.
#[derive(Debug, Clone, Deserialize, Serialize, Getters)]
#[getset(get = "pub")]
pub struct TemplateRule {
    pattern: String,
    template: String,
    /// Request URI used when the rule's template is checked with `--syntax-check`.
    #[serde(default)]
    test_uri: Option<String>,
}

impl TemplateRule {
    pub fn new(pattern: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            template: template.into(),
            test_uri: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Getters)]
#[getset(get = "pub")]
pub struct Configuration {
    #[serde(default)]
    default_template: Option<String>,
    #[serde(default)]
    templates: Vec<TemplateRule>,
    /// Opaque data handed unmodified to every template.
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    server_configuration: ServerConfiguration,
}

impl Configuration {
    pub fn new(
        default_template: Option<String>,
        templates: Vec<TemplateRule>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            default_template,
            templates,
            data,
            server_configuration: ServerConfiguration::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationFormat {
    Yaml,
    Json,
}

impl ConfigurationFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|extension| extension.to_str()) {
            Some(extension) if extension.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

pub fn parse_configuration(
    contents: &[u8],
    format: ConfigurationFormat,
) -> anyhow::Result<Configuration> {
    let configuration = match format {
        ConfigurationFormat::Yaml => {
            serde_yaml::from_slice(contents).context("error unmarshalling yaml configuration")?
        }
        ConfigurationFormat::Json => {
            serde_json::from_slice(contents).context("error unmarshalling json configuration")?
        }
    };
    Ok(configuration)
}

pub async fn read_configuration(config_file: &Path) -> anyhow::Result<Configuration> {
    info!("reading {}", config_file.display());

    let mut file = File::open(config_file)
        .await
        .with_context(|| format!("error opening config file '{}'", config_file.display()))?;

    let mut file_contents = Vec::new();

    file.read_to_end(&mut file_contents)
        .await
        .with_context(|| format!("error reading config file '{}'", config_file.display()))?;

    let configuration =
        parse_configuration(&file_contents, ConfigurationFormat::from_path(config_file))
            .with_context(|| format!("error parsing config file '{}'", config_file.display()))?;

    info!("configuration\n{:#?}", configuration);

    Ok(configuration)
}

/// Directory that relative template references are resolved against.
pub fn templates_directory(config_file: &Path) -> PathBuf {
    config_file
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(TEMPLATES_DIRECTORY)
}
