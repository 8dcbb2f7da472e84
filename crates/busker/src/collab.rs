//! External collaborators: scaffolding, bundling, uploading.
//!
//! Only the scaffolder is implemented here. Bundle layout and upload
//! framing are left to whoever implements [`Builder`] and [`Uploader`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const MANIFEST_VERSION: u32 = 0;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a valid manifest: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("manifest is missing required key `{0}`")]
    MissingKey(&'static str),

    #[error("{0} already exists")]
    AlreadyExists(PathBuf),

    #[error("invalid app name {0:?}: must start with a letter and contain only letters, digits or '_'")]
    InvalidName(String),
}

/// Contents of an app directory's `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppManifest {
    pub name: String,
    pub description: String,
    pub example_prompts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub manifest_version: u32,
}

impl AppManifest {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            example_prompts: Vec::new(),
            icon: None,
            manifest_version: MANIFEST_VERSION,
        }
    }

    pub fn with_prompts<I, S>(mut self, prompts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.example_prompts.extend(prompts.into_iter().map(Into::into));
        self
    }

    /// Read and validate `<dir>/manifest.json`.
    pub fn load(dir: &Path) -> Result<Self, ManifestError> {
        let path = dir.join(MANIFEST_FILE);
        let text = std::fs::read_to_string(&path).map_err(|source| ManifestError::Read {
            path: path.clone(),
            source,
        })?;

        let raw: serde_json::Value =
            serde_json::from_str(&text).map_err(|source| ManifestError::Parse {
                path: path.clone(),
                source,
            })?;
        for key in ["name", "description", "example_prompts"] {
            if raw.get(key).is_none() {
                return Err(ManifestError::MissingKey(key));
            }
        }

        let manifest: Self =
            serde_json::from_value(raw).map_err(|source| ManifestError::Parse { path, source })?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.name.trim().is_empty() {
            return Err(ManifestError::MissingKey("name"));
        }
        if self.description.trim().is_empty() {
            return Err(ManifestError::MissingKey("description"));
        }
        Ok(())
    }

    pub fn write(&self, dir: &Path) -> Result<PathBuf, ManifestError> {
        let path = dir.join(MANIFEST_FILE);
        let mut text = serde_json::to_string_pretty(self).map_err(|source| ManifestError::Parse {
            path: path.clone(),
            source,
        })?;
        text.push('\n');
        std::fs::write(&path, text).map_err(|source| ManifestError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// What `busker init` asks for.
#[derive(Debug, Clone)]
pub struct ScaffoldRequest {
    /// PascalCase app name; also the name of the single starter tool's prefix.
    pub name: String,
    pub description: String,
    pub example_prompts: Vec<String>,
}

/// Creates a new app directory.
pub trait Scaffolder {
    fn scaffold(&self, request: &ScaffoldRequest) -> Result<PathBuf, ManifestError>;
}

/// Writes a starter crate under `root/<Name>/`.
#[derive(Debug, Clone)]
pub struct DirScaffolder {
    root: PathBuf,
}

impl DirScaffolder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Scaffolder for DirScaffolder {
    #[tracing::instrument(skip(self, request), fields(app.name = %request.name))]
    fn scaffold(&self, request: &ScaffoldRequest) -> Result<PathBuf, ManifestError> {
        let name = pascal_case(&request.name)?;
        let dir = self.root.join(&name);
        if dir.exists() {
            return Err(ManifestError::AlreadyExists(dir));
        }

        let write = |path: PathBuf, contents: String| {
            std::fs::write(&path, contents).map_err(|source| ManifestError::Write { path, source })
        };

        let src = dir.join("src");
        std::fs::create_dir_all(&src).map_err(|source| ManifestError::Write {
            path: src.clone(),
            source,
        })?;

        let manifest = AppManifest::new(name.to_lowercase(), request.description.clone())
            .with_prompts(request.example_prompts.iter().cloned());
        manifest.validate()?;
        manifest.write(&dir)?;

        write(dir.join("Cargo.toml"), cargo_template(&name))?;
        write(src.join("main.rs"), main_template(&name, &request.description))?;

        tracing::info!(path = %dir.display(), "Scaffolded app");
        Ok(dir)
    }
}

fn pascal_case(name: &str) -> Result<String, ManifestError> {
    let mut chars = name.chars();
    let valid = matches!(chars.clone().next(), Some(c) if c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(ManifestError::InvalidName(name.to_string()));
    }
    Ok(match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    })
}

fn cargo_template(name: &str) -> String {
    format!(
        r#"[package]
name = "{crate_name}"
version = "0.1.0"
edition = "2021"

[dependencies]
busker = "{version}"
tokio = {{ version = "1", features = ["rt-multi-thread", "macros"] }}
anyhow = "1"
"#,
        crate_name = name.to_lowercase(),
        version = env!("CARGO_PKG_VERSION"),
    )
}

fn main_template(name: &str, description: &str) -> String {
    let description = description.replace('\\', "\\\\").replace('"', "\\\"");
    format!(
        r#"use std::sync::Arc;

use busker::{{App, AppMetadata, Args, CallContext, ToolDef}};

struct {name};

impl App for {name} {{
    fn metadata(&self) -> AppMetadata {{
        AppMetadata::new("{name}", "{description}").with_icon("icon.png")
    }}

    // Tool names must start with a capital letter.
    fn tools() -> Vec<ToolDef<Self>> {{
        vec![ToolDef::new("{name}Tool", "Replace this with a description of the tool.")
            .icon("brain")
            .param::<String>("user_input")
            .hint("user_input", "A description of the argument")
            .handler({snake}_tool)]
    }}
}}

async fn {snake}_tool(_app: Arc<{name}>, mut args: Args, _ctx: CallContext) -> anyhow::Result<String> {{
    let input: String = args.take("user_input")?;
    Ok(input)
}}

#[tokio::main]
async fn main() -> anyhow::Result<()> {{
    busker::launch({name}).await?;
    Ok(())
}}
"#,
        snake = name.to_lowercase(),
    )
}

/// A bundle produced from an app directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub path: PathBuf,
    pub manifest: AppManifest,
}

/// Packs an app directory into a distributable bundle.
#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, app_dir: &Path, out_dir: &Path) -> anyhow::Result<Bundle>;
}

/// Coarse upload progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadProgress {
    Started { total_bytes: u64 },
    Sent { bytes: u64 },
    Finished,
    Failed(String),
}

/// Streams a bundle to a connected client.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(
        &self,
        bundle: &Bundle,
        progress: tokio::sync::mpsc::Sender<UploadProgress>,
    ) -> anyhow::Result<()>;
}
