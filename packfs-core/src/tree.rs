//! The immutable content tree: groups of named files.
//!
//! ```text
//! /                  ContentTree
//! ├── <group>/       Group
//! │   └── <file>     FileContent
//! └── <group>/
//! ```
//!
//! Both levels are `BTreeMap`s so every listing comes back in the same
//! (lexicographic) order.  Nothing here is mutable once [`TreeBuilder::build`]
//! has run; the tree is shared behind an `Arc` while mounted.

use std::collections::BTreeMap;

use crate::error::ConfigError;
use crate::node::RootNode;

/// Opaque file bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileContent(Vec<u8>);

impl FileContent {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<String> for FileContent {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<&str> for FileContent {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<&[u8]> for FileContent {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

/// A named collection of files, presented as one directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Group {
    files: BTreeMap<String, FileContent>,
}

impl Group {
    pub fn get(&self, name: &str) -> Option<&FileContent> {
        self.files.get(name)
    }

    pub(crate) fn file_entry(&self, name: &str) -> Option<(&str, &FileContent)> {
        self.files.get_key_value(name).map(|(n, c)| (n.as_str(), c))
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &FileContent)> {
        self.files.iter().map(|(n, c)| (n.as_str(), c))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Group name → [`Group`].  Built once per invocation, then read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentTree {
    groups: BTreeMap<String, Group>,
}

impl ContentTree {
    /// Build a tree from nested `(group, [(file, content)])` pairs.
    ///
    /// # Examples
    /// ```
    /// # use packfs_core::ContentTree;
    /// let tree = ContentTree::from_groups([
    ///     ("web", vec![("job.conf", "A")]),
    ///     ("db", vec![("job.conf", "B")]),
    /// ])
    /// .unwrap();
    /// assert_eq!(tree.group_count(), 2);
    /// ```
    pub fn from_groups<G, F, N, M, C>(groups: G) -> Result<Self, ConfigError>
    where
        G: IntoIterator<Item = (N, F)>,
        F: IntoIterator<Item = (M, C)>,
        N: Into<String>,
        M: Into<String>,
        C: Into<FileContent>,
    {
        let mut builder = TreeBuilder::new();
        for (group, files) in groups {
            let group: String = group.into();
            builder.group(&group)?;
            for (name, content) in files {
                builder.insert(&group, name, content)?;
            }
        }
        Ok(builder.build())
    }

    /// The directory node for the top level.  An empty tree is a valid,
    /// empty directory.
    pub fn root(&self) -> RootNode<'_> {
        RootNode::new(self)
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    pub(crate) fn group_entry(&self, name: &str) -> Option<(&str, &Group)> {
        self.groups.get_key_value(name).map(|(n, g)| (n.as_str(), g))
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &Group)> {
        self.groups.iter().map(|(n, g)| (n.as_str(), g))
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn file_count(&self) -> usize {
        self.groups.values().map(Group::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Accumulates groups and files, validating names as they arrive.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    groups: BTreeMap<String, Group>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure `name` exists as a (possibly empty) group.
    pub fn group(&mut self, name: &str) -> Result<&mut Self, ConfigError> {
        validate_name(name)?;
        self.groups.entry(name.to_string()).or_default();
        Ok(self)
    }

    /// Add one file, creating its group on first use.
    ///
    /// A second file with the same name in the same group is rejected rather
    /// than silently replacing the first.
    pub fn insert(
        &mut self,
        group: &str,
        name: impl Into<String>,
        content: impl Into<FileContent>,
    ) -> Result<&mut Self, ConfigError> {
        let name = name.into();
        validate_name(group)?;
        validate_name(&name)?;
        let files = &mut self.groups.entry(group.to_string()).or_default().files;
        if files.contains_key(&name) {
            return Err(ConfigError::Duplicate(format!("{group}/{name}")));
        }
        files.insert(name, content.into());
        Ok(self)
    }

    pub fn build(self) -> ContentTree {
        ContentTree {
            groups: self.groups,
        }
    }
}

/// A name must work as a single path component.
fn validate_name(name: &str) -> Result<(), ConfigError> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name == "." || name == ".." {
        "reserved directory name"
    } else if name.contains('/') {
        "contains a path separator"
    } else if name.contains('\0') {
        "contains a NUL byte"
    } else {
        return Ok(());
    };
    Err(ConfigError::InvalidName {
        name: name.to_string(),
        reason,
    })
}
