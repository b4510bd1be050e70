//! Name-keyed resource store with typed lookup, reference validation, and
//! cycle detection.

use std::collections::{BTreeMap, BTreeSet};

use super::installer::{InstallerMode, InstallerResource};
use super::repository::RepositoryResource;
use super::runtime::RuntimeResource;
use super::tool::{ToolPattern, ToolResource};
use super::toolset::ToolSetResource;
use super::{ConfigError, Kind, Ref, Resource};

/// All declared resources, indexed by kind and name.
#[derive(Debug, Default)]
pub struct ResourceStore {
    runtimes: BTreeMap<String, RuntimeResource>,
    tools: BTreeMap<String, ToolResource>,
    toolsets: BTreeMap<String, ToolSetResource>,
    installers: BTreeMap<String, InstallerResource>,
    repositories: BTreeMap<String, RepositoryResource>,
}

impl ResourceStore {
    /// Builds a store from a resource list, expanding tool sets and
    /// validating per-resource shape and name uniqueness. Cross-resource
    /// checks (reference resolution, pattern consistency, acyclicity) run
    /// in [`ResourceStore::validate`], which the planner invokes after its
    /// fail-fast state checks.
    pub fn build(resources: Vec<Resource>) -> Result<Self, ConfigError> {
        let mut store = Self::default();
        for resource in resources {
            resource.validate()?;
            store.insert(resource)?;
        }

        // Tool sets expand into tools before any cross-checking, so the
        // expanded tools get the same validation as hand-written ones.
        let toolsets = std::mem::take(&mut store.toolsets);
        for set in toolsets.values() {
            for tool in set.expand() {
                tool.spec.validate(&tool.metadata.name).map_err(|_| {
                    ConfigError::invalid(
                        Kind::ToolSet,
                        &set.metadata.name,
                        format!("expanded tool {:?} is invalid", tool.metadata.name),
                    )
                })?;
                store.insert(Resource::Tool(tool))?;
            }
        }
        store.toolsets = toolsets;
        Ok(store)
    }

    /// Cross-resource validation: every ref resolves to the expected kind,
    /// tool patterns are consistent with their installers, and the ref
    /// graph is acyclic.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_refs()?;
        self.detect_cycles()
    }

    fn insert(&mut self, resource: Resource) -> Result<(), ConfigError> {
        let kind = resource.kind();
        let name = resource.name().to_string();
        let duplicate = match resource {
            Resource::Runtime(r) => self.runtimes.insert(name.clone(), r).is_some(),
            Resource::Tool(r) => self.tools.insert(name.clone(), r).is_some(),
            Resource::ToolSet(r) => self.toolsets.insert(name.clone(), r).is_some(),
            Resource::Installer(r) => self.installers.insert(name.clone(), r).is_some(),
            Resource::InstallerRepository(r) => {
                self.repositories.insert(name.clone(), r).is_some()
            }
        };
        if duplicate {
            return Err(ConfigError::Duplicate { kind, name });
        }
        Ok(())
    }

    pub fn runtime(&self, name: &str) -> Option<&RuntimeResource> {
        self.runtimes.get(name)
    }

    pub fn tool(&self, name: &str) -> Option<&ToolResource> {
        self.tools.get(name)
    }

    pub fn installer(&self, name: &str) -> Option<&InstallerResource> {
        self.installers.get(name)
    }

    pub fn repository(&self, name: &str) -> Option<&RepositoryResource> {
        self.repositories.get(name)
    }

    pub fn runtimes(&self) -> impl Iterator<Item = &RuntimeResource> {
        self.runtimes.values()
    }

    pub fn tools(&self) -> impl Iterator<Item = &ToolResource> {
        self.tools.values()
    }

    pub fn installers(&self) -> impl Iterator<Item = &InstallerResource> {
        self.installers.values()
    }

    pub fn repositories(&self) -> impl Iterator<Item = &RepositoryResource> {
        self.repositories.values()
    }

    fn contains(&self, reference: &Ref) -> bool {
        match reference.kind {
            Kind::Runtime => self.runtimes.contains_key(&reference.name),
            Kind::Tool => self.tools.contains_key(&reference.name),
            Kind::ToolSet => self.toolsets.contains_key(&reference.name),
            Kind::Installer => self.installers.contains_key(&reference.name),
            Kind::InstallerRepository => self.repositories.contains_key(&reference.name),
        }
    }

    /// The install pattern of a tool, resolved against its installer.
    pub fn tool_pattern(&self, tool: &ToolResource) -> Result<ToolPattern, ConfigError> {
        if let Some(installer_name) = &tool.spec.installer_ref {
            let installer = self.installer(installer_name).ok_or_else(|| {
                ConfigError::UnknownRef {
                    from: Ref::new(Kind::Tool, tool.metadata.name.clone()),
                    target: Ref::new(Kind::Installer, installer_name.clone()),
                }
            })?;
            match installer.spec.mode {
                InstallerMode::Download => Ok(ToolPattern::Download),
                InstallerMode::Delegation => {
                    if tool.spec.package.is_none() {
                        return Err(ConfigError::invalid(
                            Kind::Tool,
                            &tool.metadata.name,
                            format!("delegation installer {installer_name:?} requires spec.package"),
                        ));
                    }
                    Ok(ToolPattern::InstallerDelegation)
                }
            }
        } else if tool.spec.runtime_ref.is_some() {
            Ok(ToolPattern::RuntimeDelegation)
        } else {
            Ok(ToolPattern::Commands)
        }
    }

    fn validate_refs(&self) -> Result<(), ConfigError> {
        let mut check = |from: Ref, deps: Vec<Ref>| -> Result<(), ConfigError> {
            for target in deps {
                if !self.contains(&target) {
                    return Err(ConfigError::UnknownRef { from: from.clone(), target });
                }
            }
            Ok(())
        };
        for tool in self.tools.values() {
            check(
                Ref::new(Kind::Tool, tool.metadata.name.clone()),
                tool.spec.dependencies(),
            )?;
            // Resolving the pattern cross-checks tool fields against the
            // installer's mode.
            self.tool_pattern(tool)?;
        }
        for installer in self.installers.values() {
            check(
                Ref::new(Kind::Installer, installer.metadata.name.clone()),
                installer.spec.dependencies(),
            )?;
        }
        for repo in self.repositories.values() {
            check(
                Ref::new(Kind::InstallerRepository, repo.metadata.name.clone()),
                repo.spec.dependencies(),
            )?;
        }
        for set in self.toolsets.values() {
            check(
                Ref::new(Kind::ToolSet, set.metadata.name.clone()),
                set.spec.dependencies(),
            )?;
        }
        Ok(())
    }

    fn dependencies_of(&self, node: &Ref) -> Vec<Ref> {
        match node.kind {
            Kind::Runtime => Vec::new(),
            Kind::Tool => self
                .tools
                .get(&node.name)
                .map(|t| t.spec.dependencies())
                .unwrap_or_default(),
            Kind::ToolSet => self
                .toolsets
                .get(&node.name)
                .map(|t| t.spec.dependencies())
                .unwrap_or_default(),
            Kind::Installer => self
                .installers
                .get(&node.name)
                .map(|i| i.spec.dependencies())
                .unwrap_or_default(),
            Kind::InstallerRepository => self
                .repositories
                .get(&node.name)
                .map(|r| r.spec.dependencies())
                .unwrap_or_default(),
        }
    }

    /// DFS cycle check over the ref graph, reporting the cycle path.
    fn detect_cycles(&self) -> Result<(), ConfigError> {
        fn visit(
            store: &ResourceStore,
            node: Ref,
            on_path: &mut Vec<Ref>,
            done: &mut BTreeSet<Ref>,
        ) -> Result<(), ConfigError> {
            if done.contains(&node) {
                return Ok(());
            }
            if let Some(pos) = on_path.iter().position(|n| *n == node) {
                let mut cycle: Vec<String> =
                    on_path[pos..].iter().map(ToString::to_string).collect();
                cycle.push(node.to_string());
                return Err(ConfigError::Cycle { path: cycle.join(" -> ") });
            }
            on_path.push(node.clone());
            for dep in store.dependencies_of(&node) {
                visit(store, dep, on_path, done)?;
            }
            on_path.pop();
            done.insert(node);
            Ok(())
        }

        let mut all: Vec<Ref> = Vec::new();
        all.extend(self.runtimes.keys().map(|n| Ref::new(Kind::Runtime, n)));
        all.extend(self.tools.keys().map(|n| Ref::new(Kind::Tool, n)));
        all.extend(self.installers.keys().map(|n| Ref::new(Kind::Installer, n)));
        all.extend(
            self.repositories
                .keys()
                .map(|n| Ref::new(Kind::InstallerRepository, n)),
        );

        let mut done = BTreeSet::new();
        for start in all {
            visit(self, start, &mut Vec::new(), &mut done)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resource;

    fn parse(yaml: &str) -> Resource {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn download_installer() -> Resource {
        parse("kind: Installer\napiVersion: tomei.dev/v1\nmetadata: {name: download}\nspec: {mode: download}\n")
    }

    #[test]
    fn unknown_ref_is_rejected() {
        let tool = parse(
            "kind: Tool\napiVersion: tomei.dev/v1\nmetadata: {name: gopls}\nspec: {runtimeRef: go, package: golang.org/x/tools/gopls}\n",
        );
        let err = ResourceStore::build(vec![tool]).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("unknown Runtime/go"), "{err}");
    }

    #[test]
    fn duplicate_names_within_a_kind_are_rejected() {
        let a = download_installer();
        let b = download_installer();
        let err = ResourceStore::build(vec![a, b]).unwrap_err();
        assert!(matches!(err, ConfigError::Duplicate { kind: Kind::Installer, .. }));
    }

    #[test]
    fn toolset_expansion_lands_in_the_tool_index() {
        let runtime = parse(
            "kind: Runtime\napiVersion: tomei.dev/v1\nmetadata: {name: go}\nspec:\n  version: 1.26.0\n  mode: download\n  source: {url: \"https://go.dev/dl/go.tar.gz\"}\n",
        );
        let set = parse(
            "kind: ToolSet\napiVersion: tomei.dev/v1\nmetadata: {name: go-tools}\nspec:\n  runtimeRef: go\n  tools:\n    - {name: gopls, package: golang.org/x/tools/gopls}\n",
        );
        let store = ResourceStore::build(vec![runtime, set]).unwrap();
        store.validate().unwrap();
        assert!(store.tool("gopls").is_some());
    }

    #[test]
    fn deep_ref_chains_validate_cleanly() {
        // Tool -> Installer -> Runtime is the longest chain the kinds
        // allow; the cycle check walks it without complaint.
        let runtime = parse(
            "kind: Runtime\napiVersion: tomei.dev/v1\nmetadata: {name: go}\nspec:\n  mode: delegation\n  bootstrap: {install: \"./get-go.sh\"}\n",
        );
        let installer = parse(
            "kind: Installer\napiVersion: tomei.dev/v1\nmetadata: {name: go-install}\nspec:\n  mode: delegation\n  runtimeRef: go\n  commands: {install: \"go install {{.Package}}@{{.Version}}\"}\n",
        );
        let repo = parse(
            "kind: InstallerRepository\napiVersion: tomei.dev/v1\nmetadata: {name: extra}\nspec: {installerRef: go-install, source: git, url: \"https://github.com/org/extra\"}\n",
        );
        let tool = parse(
            "kind: Tool\napiVersion: tomei.dev/v1\nmetadata: {name: gopls}\nspec: {installerRef: go-install, package: golang.org/x/tools/gopls}\n",
        );
        let store = ResourceStore::build(vec![runtime, installer, repo, tool]).unwrap();
        store.validate().unwrap();
    }

    #[test]
    fn delegation_installer_tool_without_package_is_rejected() {
        let installer = parse(
            "kind: Installer\napiVersion: tomei.dev/v1\nmetadata: {name: go-install}\nspec:\n  mode: delegation\n  runtimeRef: go\n  commands: {install: \"go install {{.Package}}@{{.Version}}\"}\n",
        );
        let runtime = parse(
            "kind: Runtime\napiVersion: tomei.dev/v1\nmetadata: {name: go}\nspec:\n  mode: delegation\n  bootstrap: {install: \"./get-go.sh\"}\n",
        );
        let tool = parse(
            "kind: Tool\napiVersion: tomei.dev/v1\nmetadata: {name: gopls}\nspec: {installerRef: go-install, source: {url: \"https://h/a.tar.gz\"}}\n",
        );
        let err = ResourceStore::build(vec![installer, runtime, tool])
            .unwrap()
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("requires spec.package"), "{err}");
    }
}
