//! Directory structure and file generation for `.pipeline-bridge` initialization.

use super::error::{InitError, InitResult};
use super::templates::get_template;
use crate::config::CONFIG_DIR;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

/// Remote URL written when none is given.
pub const DEFAULT_REMOTE_URL: &str = "https://pipeline.example.com";

const REMOTE_URL_PLACEHOLDER: &str = "{{remote_url}}";

/// Options for initializing a `.pipeline-bridge` directory.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Target directory where .pipeline-bridge will be created.
    pub target_dir: PathBuf,

    /// Address of the remote pipeline application.
    pub remote_url: Option<String>,

    /// Overwrite existing .pipeline-bridge directory if it exists.
    pub force: bool,

    /// Only write `config.toml`; stages fall back to the built-in defaults.
    pub minimal: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            target_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            remote_url: None,
            force: false,
            minimal: false,
        }
    }
}

/// Generate a `.pipeline-bridge` directory with templates.
///
/// This function creates the following structure:
/// ```text
/// .pipeline-bridge/
/// ├── config.toml
/// └── stages.yaml (unless minimal)
/// ```
///
/// # Arguments
/// * `options` - Configuration for the initialization process
///
/// # Returns
/// `Ok(path)` with the created directory, or an `InitError` if:
/// - The .pipeline-bridge directory already exists (without force flag)
/// - The remote URL does not parse
/// - A template file cannot be found
/// - File system operations fail
pub async fn generate_bridge_structure(options: InitOptions) -> InitResult<PathBuf> {
    let pb_dir = options.target_dir.join(CONFIG_DIR);

    if pb_dir.exists() && !options.force {
        return Err(InitError::DirectoryExists(pb_dir));
    }

    let remote_url = options
        .remote_url
        .unwrap_or_else(|| DEFAULT_REMOTE_URL.to_string());
    Url::parse(&remote_url).map_err(|source| InitError::InvalidRemoteUrl {
        value: remote_url.clone(),
        source,
    })?;

    fs::create_dir_all(&pb_dir).map_err(|source| InitError::DirectoryCreate {
        path: pb_dir.clone(),
        source,
    })?;

    let config = load_template("config.toml")?.replace(REMOTE_URL_PLACEHOLDER, &remote_url);
    write_file(&pb_dir.join("config.toml"), &config)?;

    if !options.minimal {
        write_file(&pb_dir.join("stages.yaml"), &load_template("stages.yaml")?)?;
    }

    Ok(pb_dir)
}

fn load_template(template_path: &str) -> InitResult<String> {
    get_template(template_path).ok_or_else(|| InitError::TemplateNotFound(template_path.to_string()))
}

fn write_file(target_path: &Path, content: &str) -> InitResult<()> {
    fs::write(target_path, content).map_err(|source| InitError::FileWrite {
        path: target_path.to_path_buf(),
        source,
    })
}
