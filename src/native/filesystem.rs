use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::fs;
use walkdir::{DirEntry, WalkDir};

use super::{parse_args, NativeTools, Toolset};
use crate::error::{Error, Result};

#[derive(Deserialize)]
struct PathInput {
    path: String,
}

#[derive(Deserialize)]
struct WriteInput {
    path: String,
    content: String,
}

#[derive(Deserialize)]
struct EditInput {
    path: String,
    find: String,
    replace: String,
}

#[derive(Deserialize)]
struct SearchInput {
    path: String,
    query: String,
}

const MAX_SEARCH_MATCHES: usize = 100;
const MAX_MATCH_LINE: usize = 200;
// a NUL in the first block marks a file as binary
const BINARY_SNIFF_LEN: usize = 512;

/// File access rooted at the runtime directory.
pub struct Filesystem {
    base: PathBuf,
}

impl Filesystem {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base.join(p)
        }
    }

    pub async fn read_file(&self, args: &str) -> Result<String> {
        let input: PathInput = parse_args(args)?;
        fs::read_to_string(self.resolve(&input.path))
            .await
            .map_err(|e| Error::execution(format!("failed to read file: {e}")))
    }

    pub async fn write_file(&self, args: &str) -> Result<String> {
        let input: WriteInput = parse_args(args)?;
        let path = self.resolve(&input.path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::execution(format!("failed to create directories: {e}")))?;
        }
        fs::write(&path, input.content)
            .await
            .map_err(|e| Error::execution(format!("failed to write file: {e}")))?;

        Ok(format!("Successfully wrote to {}", input.path))
    }

    pub async fn edit_file(&self, args: &str) -> Result<String> {
        let input: EditInput = parse_args(args)?;
        if input.find.is_empty() {
            return Err(Error::invalid_input("find must not be empty"));
        }
        let path = self.resolve(&input.path);

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| Error::execution(format!("failed to read file: {e}")))?;
        if !content.contains(&input.find) {
            return Err(Error::execution("exact string not found in file"));
        }

        fs::write(&path, content.replace(&input.find, &input.replace))
            .await
            .map_err(|e| Error::execution(format!("failed to write file: {e}")))?;

        Ok(format!("Successfully edited {}", input.path))
    }

    pub async fn list_directory(&self, args: &str) -> Result<String> {
        let input: PathInput = parse_args(args)?;
        let mut dir = fs::read_dir(self.resolve(&input.path))
            .await
            .map_err(|e| Error::execution(format!("failed to list directory: {e}")))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let meta = entry.metadata().await?;
            entries.push((
                entry.file_name().to_string_lossy().into_owned(),
                meta.is_dir(),
                meta.len(),
            ));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out = String::new();
        for (name, is_dir, size) in entries {
            let prefix = if is_dir { "[DIR] " } else { "[FILE]" };
            out.push_str(&format!("{prefix} {name} ({size} bytes)\n"));
        }
        Ok(out)
    }

    /// Recursive substring search, one `path:line: text` entry per match.
    ///
    /// Hidden directories, `vendor` and `node_modules` are skipped, as are
    /// binary files. Stops after 100 matches.
    pub async fn search_files(&self, args: &str) -> Result<String> {
        let input: SearchInput = parse_args(args)?;
        if input.query.is_empty() {
            return Err(Error::invalid_input("query must not be empty"));
        }
        // drop `.` components so reported paths stay clean
        let root: PathBuf = self.resolve(&input.path).components().collect();
        fs::metadata(&root)
            .await
            .map_err(|e| Error::execution(format!("search failed: {e}")))?;

        let base = self.base.clone();
        tokio::task::spawn_blocking(move || search_tree(&root, &base, &input.query))
            .await
            .map_err(|e| Error::execution(format!("search failed: {e}")))
    }

    pub async fn get_file_info(&self, args: &str) -> Result<String> {
        let input: PathInput = parse_args(args)?;
        let meta = fs::metadata(self.resolve(&input.path))
            .await
            .map_err(|e| Error::execution(format!("failed to get file info: {e}")))?;

        let modified = meta
            .modified()
            .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
            .unwrap_or_else(|_| "unknown".to_string());

        Ok(format!(
            "Path: {}\nSize: {} bytes\nIsDir: {}\nMode: {}\nModTime: {}\n",
            input.path,
            meta.len(),
            meta.is_dir(),
            mode_string(&meta),
            modified,
        ))
    }
}

fn search_tree(root: &Path, base: &Path, query: &str) -> String {
    let mut out = String::new();
    let mut matches = 0;

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e));

    'files: for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(bytes) = std::fs::read(entry.path()) else {
            continue;
        };
        if bytes.iter().take(BINARY_SNIFF_LEN).any(|b| *b == 0) {
            continue;
        }

        let shown = entry.path().strip_prefix(base).unwrap_or(entry.path());
        for (i, line) in bytes.split(|b| *b == b'\n').enumerate() {
            let Ok(line) = std::str::from_utf8(line) else {
                continue;
            };
            if !line.contains(query) {
                continue;
            }
            out.push_str(&format!(
                "{}:{}: {}\n",
                shown.display(),
                i + 1,
                clip(line.trim(), MAX_MATCH_LINE)
            ));
            matches += 1;
            if matches >= MAX_SEARCH_MATCHES {
                out.push_str("... (too many matches, stopping search)\n");
                break 'files;
            }
        }
    }

    if matches == 0 {
        "No matches found.".to_string()
    } else {
        out
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || name == "vendor" || name == "node_modules"
}

fn clip(line: &str, max_chars: usize) -> String {
    match line.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &line[..cut]),
        None => line.to_string(),
    }
}

#[cfg(unix)]
fn mode_string(meta: &std::fs::Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;
    format!("{:o}", meta.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn mode_string(meta: &std::fs::Metadata) -> String {
    if meta.permissions().readonly() {
        "readonly".to_string()
    } else {
        "readwrite".to_string()
    }
}

fn path_schema(description: &str) -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "path": { "type": "string", "description": description }
        },
        "required": ["path"]
    })
}

impl Toolset for Filesystem {
    fn register(self: Arc<Self>, tools: &mut NativeTools) {
        let files = self.clone();
        tools.register(
            "read_file",
            "Read a file from the local filesystem",
            path_schema("The path to the file to read"),
            move |args| {
                let files = files.clone();
                async move { files.read_file(&args).await }
            },
        );

        let files = self.clone();
        tools.register(
            "write_file",
            "Write content to a file on the local filesystem",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "The path to the file to write" },
                    "content": { "type": "string", "description": "The content to write to the file" }
                },
                "required": ["path", "content"]
            }),
            move |args| {
                let files = files.clone();
                async move { files.write_file(&args).await }
            },
        );

        let files = self.clone();
        tools.register(
            "edit_file",
            "Edit a file by replacing an exact string with a new one",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "The path to the file to edit" },
                    "find": { "type": "string", "description": "The exact string to find in the file" },
                    "replace": { "type": "string", "description": "The string to replace it with" }
                },
                "required": ["path", "find", "replace"]
            }),
            move |args| {
                let files = files.clone();
                async move { files.edit_file(&args).await }
            },
        );

        let files = self.clone();
        tools.register(
            "list_directory",
            "List contents of a directory",
            path_schema("The directory path to list"),
            move |args| {
                let files = files.clone();
                async move { files.list_directory(&args).await }
            },
        );

        let files = self.clone();
        tools.register(
            "search_files",
            "Search for a string in files under a directory (recursive)",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "The directory to search in" },
                    "query": { "type": "string", "description": "The text to search for" }
                },
                "required": ["path", "query"]
            }),
            move |args| {
                let files = files.clone();
                async move { files.search_files(&args).await }
            },
        );

        let files = self;
        tools.register(
            "get_file_info",
            "Get metadata about a file (size, mode, modtime)",
            path_schema("The path to the file or directory to inspect"),
            move |args| {
                let files = files.clone();
                async move { files.get_file_info(&args).await }
            },
        );
    }
}
