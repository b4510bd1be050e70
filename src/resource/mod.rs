//! Typed resource model.
//!
//! A manifest declares resources of five kinds: runtimes, tools, tool sets,
//! installers, and installer repositories. Each variant knows how to
//! validate itself and which other resources it depends on; the planner
//! builds its dependency graph from those edges.

pub mod command;
pub mod installer;
pub mod repository;
pub mod runtime;
pub mod source;
pub mod store;
pub mod tool;
pub mod toolset;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use command::CommandSet;
pub use installer::{InstallerMode, InstallerResource, InstallerSpec};
pub use repository::{RepositoryResource, RepositorySource, RepositorySpec};
pub use runtime::{InstallMode, RuntimeResource, RuntimeSpec};
pub use source::{ArchiveType, ChecksumSpec, SourceSpec};
pub use store::ResourceStore;
pub use tool::{PackageId, ToolPattern, ToolResource, ToolSpec};
pub use toolset::{ToolSetMember, ToolSetResource, ToolSetSpec};

/// Resource kinds. Name is unique within a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Kind {
    Runtime,
    Tool,
    ToolSet,
    Installer,
    InstallerRepository,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::Runtime => "Runtime",
            Kind::Tool => "Tool",
            Kind::ToolSet => "ToolSet",
            Kind::Installer => "Installer",
            Kind::InstallerRepository => "InstallerRepository",
        };
        f.write_str(s)
    }
}

/// A reference from one resource to another, by kind and name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ref {
    pub kind: Kind,
    pub name: String,
}

impl Ref {
    pub fn new(kind: Kind, name: impl Into<String>) -> Self {
        Self { kind, name: name.into() }
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Shared resource metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Manifest validation and reference errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("duplicate {kind} {name:?}")]
    Duplicate { kind: Kind, name: String },

    #[error("{from} references unknown {target}")]
    UnknownRef { from: Ref, target: Ref },

    #[error("invalid {kind} {name:?}: {reason}")]
    Invalid { kind: Kind, name: String, reason: String },

    #[error("dependency cycle: {path}")]
    Cycle { path: String },

    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(kind: Kind, name: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid { kind, name: name.to_string(), reason: reason.into() }
    }
}

/// A declared resource, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Resource {
    Runtime(RuntimeResource),
    Tool(ToolResource),
    ToolSet(ToolSetResource),
    Installer(InstallerResource),
    InstallerRepository(RepositoryResource),
}

impl Resource {
    pub fn kind(&self) -> Kind {
        match self {
            Resource::Runtime(_) => Kind::Runtime,
            Resource::Tool(_) => Kind::Tool,
            Resource::ToolSet(_) => Kind::ToolSet,
            Resource::Installer(_) => Kind::Installer,
            Resource::InstallerRepository(_) => Kind::InstallerRepository,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata().name
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            Resource::Runtime(r) => &r.metadata,
            Resource::Tool(r) => &r.metadata,
            Resource::ToolSet(r) => &r.metadata,
            Resource::Installer(r) => &r.metadata,
            Resource::InstallerRepository(r) => &r.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        match self {
            Resource::Runtime(r) => &mut r.metadata,
            Resource::Tool(r) => &mut r.metadata,
            Resource::ToolSet(r) => &mut r.metadata,
            Resource::Installer(r) => &mut r.metadata,
            Resource::InstallerRepository(r) => &mut r.metadata,
        }
    }

    /// The `<group>/<version>` schema tag this resource was declared with.
    pub fn group_version(&self) -> &str {
        match self {
            Resource::Runtime(r) => &r.api_version,
            Resource::Tool(r) => &r.api_version,
            Resource::ToolSet(r) => &r.api_version,
            Resource::Installer(r) => &r.api_version,
            Resource::InstallerRepository(r) => &r.api_version,
        }
    }

    /// A reference identifying this resource.
    pub fn to_ref(&self) -> Ref {
        Ref::new(self.kind(), self.name())
    }

    /// Validates the resource in isolation. Reference resolution and cycle
    /// checks happen later, in [`ResourceStore::validate`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name().is_empty() {
            return Err(ConfigError::invalid(self.kind(), "", "metadata.name is required"));
        }
        match self {
            Resource::Runtime(r) => r.spec.validate(&r.metadata.name),
            Resource::Tool(r) => r.spec.validate(&r.metadata.name),
            Resource::ToolSet(r) => r.spec.validate(&r.metadata.name),
            Resource::Installer(r) => r.spec.validate(&r.metadata.name),
            Resource::InstallerRepository(r) => r.spec.validate(&r.metadata.name),
        }
    }

    /// Outgoing dependency edges of this resource.
    pub fn dependencies(&self) -> Vec<Ref> {
        match self {
            Resource::Runtime(_) => Vec::new(),
            Resource::Tool(r) => r.spec.dependencies(),
            Resource::ToolSet(r) => r.spec.dependencies(),
            Resource::Installer(r) => r.spec.dependencies(),
            Resource::InstallerRepository(r) => r.spec.dependencies(),
        }
    }
}
