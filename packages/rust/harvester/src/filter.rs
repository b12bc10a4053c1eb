//! Attachment content filter.
//!
//! Decides from a file name alone whether an attachment is worth downloading.
//! The allow-list is built once at start-up and never changes afterwards, so
//! a single [`ContentFilter`] is shared read-only by every job.

use std::collections::HashSet;
use std::sync::LazyLock;

/// Extensions treated as text out of the box.
const TEXT_EXTENSIONS: &[&str] = &[
    // plain text and data
    "txt", "text", "log", "csv", "json", "xml", "yaml", "yml", "toml", "ini", "conf", "config",
    "env", "lock", "properties", "cfg", "sql",
    // markup and docs
    "md", "markdown", "rst", "adoc", "asciidoc", "rtf", "sdoc", "svg",
    // web
    "css", "scss", "less", "js", "jsx", "ts", "tsx", "vue", "elm", "graphql", "gql",
    // source code
    "go", "py", "java", "c", "cpp", "h", "hpp", "rb", "php", "swift", "pl", "r", "m", "mat",
    "sas", "vb", "vbs", "cs", "fs", "fsx", "dart", "kotlin", "scala", "groovy", "lua", "rust",
    "rs", "ex", "exs", "hs", "clj", "d", "jl", "nim",
    // shell and scripts
    "sh", "bash", "zsh", "bat", "cmd", "ps1", "psm1",
    // schemas, patches, dotfiles
    "proto", "avro", "diff", "patch", "htaccess", "gitignore", "dockerignore",
];

static DEFAULT_EXTENSIONS: LazyLock<HashSet<String>> =
    LazyLock::new(|| TEXT_EXTENSIONS.iter().map(|e| e.to_string()).collect());

/// Case-insensitive allow-list of text-like file extensions.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    extensions: HashSet<String>,
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.clone(),
        }
    }
}

impl ContentFilter {
    /// The built-in allow-list plus `extra` extensions.
    ///
    /// Extras may be given with or without a leading dot.
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut filter = Self::default();
        filter.extensions.extend(
            extra
                .into_iter()
                .map(|e| e.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty()),
        );
        filter
    }

    /// Whether an attachment named `file_name` should be downloaded.
    ///
    /// The extension is whatever follows the last `.`, so `.gitignore` has the
    /// extension `gitignore` and `archive.tar.gz` has `gz`. Names without a
    /// dot, or ending in one, are rejected.
    pub fn allows(&self, file_name: &str) -> bool {
        extension(file_name).is_some_and(|ext| self.extensions.contains(&ext))
    }
}

/// Whether `file_name` is text-like according to the built-in allow-list.
pub fn is_text_like(file_name: &str) -> bool {
    extension(file_name).is_some_and(|ext| DEFAULT_EXTENSIONS.contains(&ext))
}

fn extension(file_name: &str) -> Option<String> {
    // Only the final path component counts: "dir.d/README" has no extension.
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let (_, ext) = base.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
