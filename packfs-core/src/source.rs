//! Loading the rendered-content document into a [`ContentTree`].
//!
//! The document is TOML.  Every top-level table is a group and every string
//! inside it is one file:
//!
//! ```toml
//! [web]
//! "job.conf" = "A"
//!
//! [db]
//! "job.conf" = """
//! job "db" {}
//! """
//! ```

use std::path::Path;

use crate::error::ConfigError;
use crate::tree::{ContentTree, TreeBuilder};

/// Read and parse the document at `path`.
pub fn load_document(path: &Path) -> Result<ContentTree, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let tree = parse_document(&text).map_err(|e| match e {
        ConfigError::Parse { source, .. } => ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })?;
    tracing::debug!(
        path = %path.display(),
        groups = tree.group_count(),
        files = tree.file_count(),
        "loaded content document"
    );
    Ok(tree)
}

/// Parse document text.  Parse errors carry an empty path; use
/// [`load_document`] to get the file name in messages.
pub fn parse_document(text: &str) -> Result<ContentTree, ConfigError> {
    let table: toml::Table = toml::from_str(text).map_err(|source| ConfigError::Parse {
        path: Default::default(),
        source,
    })?;

    let mut builder = TreeBuilder::new();
    for (group, value) in table {
        let files = match value {
            toml::Value::Table(files) => files,
            other => {
                return Err(ConfigError::InvalidEntry {
                    key: group,
                    reason: format!("expected a table of files, found {}", other.type_str()),
                });
            }
        };
        builder.group(&group)?;
        for (name, content) in files {
            let content = match content {
                toml::Value::String(content) => content,
                other => {
                    return Err(ConfigError::InvalidEntry {
                        key: format!("{group}.{name}"),
                        reason: format!("expected file content string, found {}", other.type_str()),
                    });
                }
            };
            builder.insert(&group, name, content)?;
        }
    }
    Ok(builder.build())
}
