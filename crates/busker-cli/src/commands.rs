//! CLI command implementations

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use busker::collab::{DirScaffolder, ScaffoldRequest, Scaffolder};
use busker::ToolClient;
use busker_conf::{BuskerConfig, ConfigSources};
use busker_proto::{Attachment, CallParams, WireValue};

/// Validate that a URL points at an HTTP service.
fn client_for(url: &str) -> Result<ToolClient> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        bail!(
            "Invalid URL: '{}'\n\n\
             The client speaks HTTP; serve the app on TCP to reach it:\n  \
             busker demo --bind tcp://127.0.0.1:7070\n  \
             busker describe --url http://127.0.0.1:7070",
            url
        );
    }
    Ok(ToolClient::new(url))
}

/// Parse `name=value` pairs. A value that is a tagged wire value in JSON
/// (`{"int": 3}`) is used as-is, anything else is sent as text.
pub fn parse_args(pairs: &[String]) -> Result<Vec<(String, WireValue)>> {
    pairs
        .iter()
        .map(|pair| {
            let (name, raw) = pair
                .split_once('=')
                .with_context(|| format!("argument '{}' is not name=value", pair))?;
            if name.is_empty() {
                bail!("argument '{}' has an empty name", pair);
            }
            let value = serde_json::from_str::<WireValue>(raw)
                .unwrap_or_else(|_| WireValue::text(raw));
            Ok((name.to_string(), value))
        })
        .collect()
}

pub async fn describe(url: &str) -> Result<()> {
    let client = client_for(url)?;
    let described = client.describe().await?;
    println!("{}", serde_json::to_string_pretty(&described)?);
    Ok(())
}

pub async fn discover(url: &str) -> Result<()> {
    let client = client_for(url)?;
    let discovered = client.discover().await?;
    println!("{}", serde_json::to_string_pretty(&discovered)?);
    Ok(())
}

pub async fn ping(url: &str) -> Result<()> {
    let client = client_for(url)?;
    let start = std::time::Instant::now();
    let pong = client.ping().await?;
    println!("{} (version {}) in {:?}", pong.status, pong.version, start.elapsed());
    Ok(())
}

/// Call a tool, print the result, and optionally save its attachments.
pub async fn call(url: &str, tool: &str, args: &[String], save_dir: Option<&Path>) -> Result<()> {
    let client = client_for(url)?;

    let mut params = CallParams::new(tool);
    for (name, value) in parse_args(args)? {
        params = params.arg(name, value);
    }

    let result = client.call(&params).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if let Some(dir) = save_dir {
        for attachment in &result.attachments {
            let path = save_attachment(&client, attachment, dir).await?;
            eprintln!("saved {}", path.display());
        }
    }
    client.end_session().await?;
    Ok(())
}

/// Download one attachment of an earlier call.
pub async fn fetch(url: &str, call_id: &str, index: usize, out: &Path) -> Result<()> {
    let client = client_for(url)?;
    let attachment = Attachment {
        index,
        name: out
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        size: 0,
        url: Attachment::path_for(call_id, index),
    };
    let bytes = client.fetch_attachment(&attachment).await?;
    tokio::fs::write(out, &bytes)
        .await
        .with_context(|| format!("writing {}", out.display()))?;
    eprintln!("wrote {} bytes to {}", bytes.len(), out.display());
    Ok(())
}

async fn save_attachment(client: &ToolClient, attachment: &Attachment, dir: &Path) -> Result<PathBuf> {
    let name = Path::new(&attachment.name)
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| format!("attachment-{}", attachment.index).into());
    let path = dir.join(name);
    let bytes = client.fetch_attachment(attachment).await?;
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&path, &bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// Create a new app directory.
pub fn init(dir: &Path, name: &str, description: &str, prompts: Vec<String>) -> Result<PathBuf> {
    let request = ScaffoldRequest {
        name: name.to_string(),
        description: description.to_string(),
        example_prompts: prompts,
    };
    let path = DirScaffolder::new(dir).scaffold(&request)?;
    println!("Created {}", path.display());
    Ok(path)
}

/// Print the effective configuration and where it came from.
pub fn show_config(config: &BuskerConfig, sources: &ConfigSources) {
    for file in &sources.files {
        println!("# loaded: {}", file.display());
    }
    for var in &sources.env_overrides {
        println!("# env override: {}", var);
    }
    print!("{}", config.to_toml());
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn args_accept_tagged_json_or_text() {
        let parsed = parse_args(&[
            "count={\"int\": 3}".to_string(),
            "text=hello world".to_string(),
            "tags={\"list\": [{\"text\": \"a\"}]}".to_string(),
            "eq=a=b".to_string(),
        ])
        .unwrap();

        assert_eq!(
            parsed,
            vec![
                ("count".to_string(), WireValue::Int(3)),
                ("text".to_string(), WireValue::text("hello world")),
                (
                    "tags".to_string(),
                    WireValue::List(vec![WireValue::text("a")])
                ),
                ("eq".to_string(), WireValue::text("a=b")),
            ]
        );
    }

    #[test]
    fn args_need_a_name() {
        assert!(parse_args(&["novalue".to_string()]).is_err());
        assert!(parse_args(&["=x".to_string()]).is_err());
    }

    #[test]
    fn client_needs_http() {
        assert!(client_for("unix:///tmp/busker_app.sock").is_err());
        assert!(client_for("http://127.0.0.1:7070").is_ok());
    }
}
