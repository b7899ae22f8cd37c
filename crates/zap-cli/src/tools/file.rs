//! File tool: asks for a JSON reply describing files and writes them below
//! the working directory.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use zap_session::{Tool, ToolError};
use zap_stream::StructuredResponse;

const INSTRUCTIONS: &str = r#"For this response and this response only, return *only* a JSON object with no text before or after it and no code fences.
The JSON must contain:
- a "summary" field with a brief summary of your response as a string,
- a "files" array where each entry is an object with:
  - "name": a descriptive file name (e.g. "script.js" or "readme.md"),
  - "path": a relative directory (e.g. "./src" or "./docs"),
  - "body": the file content as a string.
Use extensions that fit the content. Example: {"summary":"Summary text","files":[{"name":"example.md","path":"./docs","body":"Content"}]}"#;

#[derive(Debug, Deserialize)]
struct FileReply {
    summary: String,
    files: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    name: String,
    path: String,
    body: String,
}

/// Tool that turns a JSON reply into files on disk
pub struct FileTool {
    root: Option<PathBuf>,
}

impl FileTool {
    /// Write relative to the process working directory
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Write relative to `root` instead of the working directory
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn root(&self) -> Result<PathBuf, ToolError> {
        match self.root {
            Some(ref root) => Ok(root.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    async fn write_entry(&self, root: &Path, entry: &FileEntry) -> Result<PathBuf, ToolError> {
        let target = resolve_within(root, &entry.path, &entry.name)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, &entry.body).await?;
        Ok(target)
    }
}

impl Default for FileTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Join `dir/name` onto `root` lexically, refusing anything that would land
/// outside of it.
fn resolve_within(root: &Path, dir: &str, name: &str) -> Result<PathBuf, ToolError> {
    let mut relative = PathBuf::new();
    for component in Path::new(dir).join(name).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !relative.pop() {
                    return Err(ToolError::Rejected(format!(
                        "'{}' in '{}' escapes the working directory",
                        name, dir
                    )));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ToolError::Rejected(format!(
                    "'{}' in '{}' is an absolute path",
                    name, dir
                )));
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(ToolError::Rejected(format!("'{}' in '{}' names no file", name, dir)));
    }
    Ok(root.join(relative))
}

/// Strip a Markdown code fence some models wrap JSON in anyway.
fn strip_fence(message: &str) -> &str {
    let trimmed = message.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[async_trait]
impl Tool for FileTool {
    fn name(&self) -> &str {
        "file"
    }

    fn description(&self) -> &str {
        "Requests replies as JSON with a summary and files, then writes the files below the current directory"
    }

    async fn preprocess(&self, prompt: &str) -> Result<String, ToolError> {
        Ok(format!("{}\n\n{}", prompt, INSTRUCTIONS))
    }

    async fn postprocess(&self, response: &StructuredResponse) -> Result<(), ToolError> {
        let reply: FileReply = serde_json::from_str(strip_fence(&response.message))?;
        println!("{}", reply.summary);

        let root = self.root()?;
        let mut rejected = Vec::new();
        for raw in &reply.files {
            let entry: FileEntry = match serde_json::from_value(raw.clone()) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping invalid file entry {}: {}", raw, e);
                    continue;
                }
            };
            if entry.name.is_empty() {
                tracing::warn!("Skipping file entry without a name: {}", raw);
                continue;
            }
            match self.write_entry(&root, &entry).await {
                Ok(path) => println!("Wrote {}", path.display()),
                Err(ToolError::Rejected(reason)) => {
                    tracing::warn!("Rejected file: {}", reason);
                    rejected.push(reason);
                }
                Err(e) => return Err(e),
            }
        }

        if rejected.is_empty() {
            Ok(())
        } else {
            Err(ToolError::Rejected(rejected.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "zap-file-tool-{}-{}-{}",
            name,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn reply(message: &str) -> StructuredResponse {
        StructuredResponse::new("r1", message)
    }

    #[tokio::test]
    async fn test_preprocess_appends_instructions() {
        let prompt = FileTool::new().preprocess("make a readme").await.unwrap();
        assert!(prompt.starts_with("make a readme\n\n"));
        assert!(prompt.contains("\"summary\""));
        assert!(prompt.contains("\"files\""));
    }

    #[tokio::test]
    async fn test_writes_files_below_root() {
        let root = temp_root("write");
        let tool = FileTool::with_root(&root);
        let message = r#"{"summary":"Two files","files":[
            {"name":"readme.md","path":"./docs","body":"hello"},
            {"name":"main.rs","path":"src/bin","body":"fn main() {}"}
        ]}"#;

        tool.postprocess(&reply(message)).await.unwrap();

        assert_eq!(std::fs::read_to_string(root.join("docs/readme.md")).unwrap(), "hello");
        assert_eq!(
            std::fs::read_to_string(root.join("src/bin/main.rs")).unwrap(),
            "fn main() {}"
        );
        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_escaping_paths_are_rejected() {
        let root = temp_root("escape");
        let tool = FileTool::with_root(root.join("inner"));
        let message = r#"{"summary":"s","files":[
            {"name":"evil.txt","path":"../..","body":"x"},
            {"name":"ok.txt","path":".","body":"fine"}
        ]}"#;

        let err = tool.postprocess(&reply(message)).await.unwrap_err();

        assert!(matches!(err, ToolError::Rejected(ref r) if r.contains("evil.txt")));
        assert!(root.join("inner/ok.txt").exists());
        assert!(!root.join("evil.txt").exists());
        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_incomplete_entries_are_skipped() {
        let root = temp_root("skip");
        let tool = FileTool::with_root(&root);
        let message = r#"{"summary":"s","files":[
            {"name":"a.txt","path":"."},
            {"name":"b.txt","path":".","body":"b"}
        ]}"#;

        tool.postprocess(&reply(message)).await.unwrap();

        assert!(!root.join("a.txt").exists());
        assert!(root.join("b.txt").exists());
        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_non_json_reply_is_invalid() {
        let tool = FileTool::with_root(std::env::temp_dir());
        let err = tool.postprocess(&reply("Sure! Here are your files")).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidResponse(_)));

        let err = tool
            .postprocess(&reply(r#"{"summary":"no files"}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidResponse(_)));
    }

    #[test]
    fn test_resolve_within() {
        let root = Path::new("/work");
        assert_eq!(
            resolve_within(root, "./a/../b", "c.txt").unwrap(),
            PathBuf::from("/work/b/c.txt")
        );
        assert!(resolve_within(root, "/etc", "passwd").is_err());
        assert!(resolve_within(root, "..", "x").is_err());
        assert!(resolve_within(root, ".", "").is_err());
    }

    #[test]
    fn test_strip_fence() {
        assert_eq!(strip_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fence("  {\"a\":1} "), "{\"a\":1}");
    }
}
