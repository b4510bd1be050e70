//! Tool installers: download, runtime delegation, installer delegation,
//! and self-carried command sets.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;

use crate::exec::context;
use crate::io::{checksum, download, extract};
use crate::registry::ResolveRequest;
use crate::resource::{ArchiveType, ChecksumSpec, CommandSet, ToolPattern, ToolResource};
use crate::shell::{self, ExecRequest};
use crate::state::{InstallerState, RuntimeState, ToolState};
use crate::template::{self, Vars};

use super::{remove_dir_if_present, remove_link_if_present, resolve_version};
use super::{InstallContext, InstallError};

/// State entries a tool install may need to consult: its runtime, its
/// installer, and (for delegation installers) the installer's runtime. The
/// executor snapshots these from the live state right before the node
/// runs, so a runtime upgraded in an earlier layer is seen post-upgrade.
#[derive(Debug, Clone, Default)]
pub struct ToolDeps {
    pub runtime: Option<RuntimeState>,
    pub installer: Option<InstallerState>,
    pub installer_runtime: Option<RuntimeState>,
}

/// Installs a tool according to its resolved pattern.
pub async fn install(
    ctx: &InstallContext,
    resource: &ToolResource,
    pattern: ToolPattern,
    deps: &ToolDeps,
) -> Result<ToolState, InstallError> {
    match pattern {
        ToolPattern::Download => install_download(ctx, resource).await,
        ToolPattern::RuntimeDelegation => install_runtime_delegation(ctx, resource, deps).await,
        ToolPattern::InstallerDelegation => {
            install_installer_delegation(ctx, resource, deps).await
        }
        ToolPattern::Commands => install_commands(resource).await,
    }
}

async fn install_download(
    ctx: &InstallContext,
    resource: &ToolResource,
) -> Result<ToolState, InstallError> {
    let name = &resource.metadata.name;
    let spec = &resource.spec;
    let identity = format!("Tool/{name}");

    let resolved = resolve_version(&identity, &spec.version, None, &BTreeMap::new()).await?;

    // Artifact location comes either from the declared source or from the
    // registry resolver.
    let (url, expected, archive_type) = match &spec.source {
        Some(source) => {
            let vars = Vars::new()
                .version(resolved.version.clone())
                .os(crate::platform::os())
                .arch(crate::platform::arch());
            let url = template::render(&source.url, &vars)?;
            let asset = url.rsplit('/').next().unwrap_or("artifact").to_string();
            let expected = match &source.checksum {
                Some(spec) => Some(checksum::expected_digest(&ctx.client, spec, &asset).await?),
                None => None,
            };
            let archive_type = source.archive_type.unwrap_or_else(|| ArchiveType::infer(&url));
            (url, expected, archive_type)
        }
        None => {
            let package = spec.package.as_ref().ok_or_else(|| {
                InstallError::Invalid(format!("{identity} has neither source nor package"))
            })?;
            let (owner, repo) = package.owner_repo().ok_or_else(|| {
                InstallError::Invalid(format!(
                    "{identity}: package {package} is not an owner/repo pair"
                ))
            })?;
            let request = ResolveRequest {
                registry_ref: &ctx.registry_ref,
                owner,
                repo,
                version: &resolved.version,
                os: crate::platform::os(),
                arch: crate::platform::arch(),
            };
            let asset = ctx.resolver.resolve(&request).await?;
            for finding in &asset.errors {
                context::report_output(&format!("registry: {finding}"));
            }
            let expected = match &asset.checksum_url {
                Some(checksum_url) => Some(
                    checksum::expected_digest(
                        &ctx.client,
                        &ChecksumSpec::File {
                            url: checksum_url.clone(),
                            file: asset.asset.clone(),
                        },
                        &asset.asset,
                    )
                    .await?,
                ),
                None => None,
            };
            (asset.archive_url, expected, asset.archive_type)
        }
    };

    if context::is_cancelled() {
        return Err(InstallError::Cancelled);
    }

    let tmp_root = ctx.paths.tmp_dir();
    std::fs::create_dir_all(&tmp_root).map_err(|e| InstallError::io(&tmp_root, e))?;
    let workdir = tempfile::Builder::new()
        .prefix("tomei-")
        .tempdir_in(&tmp_root)
        .map_err(|e| InstallError::io(&tmp_root, e))?;
    let asset_name = url.rsplit('/').next().unwrap_or("artifact").to_string();
    let artifact = workdir.path().join(&asset_name);

    let digest =
        download::fetch_verified(&ctx.client, &url, &artifact, expected.as_deref()).await?;

    if context::is_cancelled() {
        return Err(InstallError::Cancelled);
    }

    let install_dir = ctx.paths.tool_dir(name, &resolved.version);
    remove_dir_if_present(&install_dir)?;
    let binaries = spec.binaries_or(name);
    {
        let artifact = artifact.clone();
        let extract_dir = install_dir.clone();
        let first_binary = binaries[0].clone();
        tokio::task::spawn_blocking(move || {
            extract::extract(&artifact, &extract_dir, archive_type, &first_binary)
        })
        .await
        .map_err(|e| InstallError::Invalid(format!("extract task failed: {e}")))?
        .map_err(|e| InstallError::io(&install_dir, e))?;
    }

    let bin_dir = ctx.paths.bin_dir();
    let mut bin_paths = Vec::new();
    for binary in &binaries {
        let target = extract::find_binary(&install_dir, binary).ok_or_else(|| {
            InstallError::Invalid(format!("{identity}: binary {binary:?} not found in archive"))
        })?;
        extract::mark_executable(&target).map_err(|e| InstallError::io(&target, e))?;
        let link = bin_dir.join(binary);
        extract::place_symlink(&target, &link).map_err(|e| InstallError::io(&link, e))?;
        context::report_output(&format!("linked {}", link.display()));
        bin_paths.push(link);
    }

    Ok(ToolState {
        version: resolved.version,
        version_kind: resolved.kind,
        spec_version: spec.version.clone(),
        method: "download".to_string(),
        installer_ref: spec.installer_ref.clone(),
        runtime_ref: None,
        package: spec.package.clone(),
        source: spec.source.clone(),
        commands: None,
        install_path: Some(install_dir),
        bin_paths,
        binaries,
        digest: Some(digest),
        taint_reason: String::new(),
        updated_at: Utc::now(),
    })
}

/// Common body of the two delegation patterns.
async fn install_delegated(
    resource: &ToolResource,
    commands: &CommandSet,
    env: &BTreeMap<String, String>,
    tool_bin_path: Option<PathBuf>,
    method: &str,
) -> Result<ToolState, InstallError> {
    let name = &resource.metadata.name;
    let spec = &resource.spec;
    let identity = format!("Tool/{name}");
    let package = spec
        .package
        .as_ref()
        .ok_or_else(|| InstallError::Invalid(format!("{identity} has no package")))?;

    let resolve_command = commands.resolve_version.as_deref().map(|script| {
        template::render(
            script,
            &Vars::new()
                .package(package.to_string())
                .name(name.clone())
                .version(if spec.version.is_empty() { "latest" } else { &spec.version }),
        )
    });
    let resolve_command = match resolve_command {
        Some(rendered) => Some(rendered?),
        None => None,
    };

    let resolved =
        resolve_version(&identity, &spec.version, resolve_command.as_deref(), env).await?;

    let bin_path = tool_bin_path.unwrap_or_default();
    let install_template = commands
        .install
        .as_deref()
        .ok_or_else(|| InstallError::Invalid(format!("{identity}: no install command")))?;
    let script = template::render(
        install_template,
        &Vars::new()
            .package(package.to_string())
            .version(resolved.version.clone())
            .bin_path(bin_path.display().to_string())
            .name(name.clone()),
    )?;
    shell::run(ExecRequest::new(&identity, "install", script).env(env)).await?;

    let binaries = spec.binaries_or(name);
    let bin_paths = if bin_path.as_os_str().is_empty() {
        Vec::new()
    } else {
        binaries.iter().map(|b| bin_path.join(b)).collect()
    };

    Ok(ToolState {
        version: resolved.version,
        version_kind: resolved.kind,
        spec_version: spec.version.clone(),
        method: method.to_string(),
        installer_ref: spec.installer_ref.clone(),
        runtime_ref: spec.runtime_ref.clone(),
        package: Some(package.clone()),
        source: None,
        commands: spec.commands.clone(),
        install_path: None,
        bin_paths,
        binaries,
        digest: None,
        taint_reason: String::new(),
        updated_at: Utc::now(),
    })
}

async fn install_runtime_delegation(
    ctx: &InstallContext,
    resource: &ToolResource,
    deps: &ToolDeps,
) -> Result<ToolState, InstallError> {
    let name = &resource.metadata.name;
    let runtime_name = resource.spec.runtime_ref.as_deref().unwrap_or_default();
    let runtime = deps.runtime.as_ref().ok_or_else(|| {
        InstallError::Invalid(format!(
            "Tool/{name}: runtime {runtime_name:?} is not installed"
        ))
    })?;
    let commands = runtime.commands.clone().ok_or_else(|| {
        InstallError::Invalid(format!(
            "Tool/{name}: runtime {runtime_name:?} declares no tool commands"
        ))
    })?;
    let tool_bin_path = runtime
        .tool_bin_path
        .clone()
        .or_else(|| Some(ctx.paths.bin_dir()));
    install_delegated(resource, &commands, &runtime.env, tool_bin_path, "runtime-delegation")
        .await
}

async fn install_installer_delegation(
    ctx: &InstallContext,
    resource: &ToolResource,
    deps: &ToolDeps,
) -> Result<ToolState, InstallError> {
    let name = &resource.metadata.name;
    let installer_name = resource.spec.installer_ref.as_deref().unwrap_or_default();
    let installer = deps.installer.as_ref().ok_or_else(|| {
        InstallError::Invalid(format!(
            "Tool/{name}: installer {installer_name:?} is not recorded"
        ))
    })?;
    let commands = installer.commands.clone().ok_or_else(|| {
        InstallError::Invalid(format!(
            "Tool/{name}: installer {installer_name:?} carries no commands"
        ))
    })?;
    let (env, tool_bin_path) = match &deps.installer_runtime {
        Some(runtime) => (
            runtime.env.clone(),
            runtime.tool_bin_path.clone().or_else(|| Some(ctx.paths.bin_dir())),
        ),
        None => (BTreeMap::new(), Some(ctx.paths.bin_dir())),
    };
    install_delegated(resource, &commands, &env, tool_bin_path, "installer-delegation").await
}

async fn install_commands(resource: &ToolResource) -> Result<ToolState, InstallError> {
    let name = &resource.metadata.name;
    let spec = &resource.spec;
    let identity = format!("Tool/{name}");
    let commands = spec
        .commands
        .clone()
        .ok_or_else(|| InstallError::Invalid(format!("{identity} carries no commands")))?;

    let already_installed = match &commands.check {
        Some(script) => {
            shell::check(ExecRequest::new(&identity, "check", script.clone())).await?
        }
        None => false,
    };

    if !already_installed {
        let install_script = commands
            .install
            .clone()
            .ok_or_else(|| InstallError::Invalid(format!("{identity}: no install command")))?;
        let script = template::render(
            &install_script,
            &Vars::new().name(name.clone()).version(if spec.version.is_empty() {
                "latest"
            } else {
                &spec.version
            }),
        )?;
        shell::run(ExecRequest::new(&identity, "install", script)).await?;
    } else {
        context::report_output("check passed, install skipped");
    }

    let resolved = resolve_version(
        &identity,
        &spec.version,
        commands.resolve_version.as_deref(),
        &BTreeMap::new(),
    )
    .await?;

    Ok(ToolState {
        version: resolved.version,
        version_kind: resolved.kind,
        spec_version: spec.version.clone(),
        method: "commands".to_string(),
        installer_ref: None,
        runtime_ref: None,
        package: spec.package.clone(),
        source: None,
        commands: Some(commands),
        install_path: None,
        bin_paths: Vec::new(),
        binaries: spec.binaries_or(name),
        digest: None,
        taint_reason: String::new(),
        updated_at: Utc::now(),
    })
}

/// Removes an installed tool using the facts captured in its entry.
pub async fn remove(
    ctx: &InstallContext,
    entry: &ToolState,
    name: &str,
    deps: &ToolDeps,
) -> Result<(), InstallError> {
    let identity = format!("Tool/{name}");
    match entry.method.as_str() {
        "download" => {
            for link in &entry.bin_paths {
                remove_link_if_present(link)?;
            }
            let tool_root = ctx
                .paths
                .tool_dir(name, "x")
                .parent()
                .map(std::path::Path::to_path_buf)
                .expect("tool dir has a parent");
            remove_dir_if_present(&tool_root)?;
        }
        "runtime-delegation" | "installer-delegation" => {
            let (commands, env) = if entry.method == "runtime-delegation" {
                let runtime = deps.runtime.as_ref();
                (
                    runtime.and_then(|r| r.commands.clone()),
                    runtime.map(|r| r.env.clone()).unwrap_or_default(),
                )
            } else {
                (
                    deps.installer.as_ref().and_then(|i| i.commands.clone()),
                    deps.installer_runtime
                        .as_ref()
                        .map(|r| r.env.clone())
                        .unwrap_or_default(),
                )
            };
            let remove_template = commands.and_then(|c| c.remove);
            if let Some(template_text) = remove_template {
                let package = entry
                    .package
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| name.to_string());
                let script = template::render(
                    &template_text,
                    &Vars::new()
                        .package(package)
                        .version(entry.version.clone())
                        .name(name.to_string())
                        .bin_path(
                            entry
                                .bin_paths
                                .first()
                                .and_then(|p| p.parent())
                                .map(|p| p.display().to_string())
                                .unwrap_or_default(),
                        ),
                )?;
                shell::run(ExecRequest::new(&identity, "remove", script).env(&env)).await?;
            } else {
                for link in &entry.bin_paths {
                    remove_link_if_present(link)?;
                }
            }
        }
        "commands" => {
            if let Some(script) = entry.commands.as_ref().and_then(|c| c.remove.clone()) {
                shell::run(ExecRequest::new(&identity, "remove", script)).await?;
            }
        }
        other => {
            return Err(InstallError::Invalid(format!(
                "{identity}: unknown install method {other:?} in state"
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::VersionKind;

    fn tool(yaml: &str) -> ToolResource {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn runtime_state(tool_bin: &std::path::Path, install_cmd: &str) -> RuntimeState {
        RuntimeState {
            version: "1.26.0".into(),
            version_kind: VersionKind::Exact,
            spec_version: "1.26.0".into(),
            mode: crate::resource::InstallMode::Delegation,
            install_path: None,
            bin_dir: None,
            tool_bin_path: Some(tool_bin.to_path_buf()),
            binaries: Vec::new(),
            digest: None,
            source: None,
            bootstrap: None,
            env: BTreeMap::from([("GOFLAGS".to_string(), "-trimpath".to_string())]),
            commands: Some(CommandSet {
                install: Some(install_cmd.to_string()),
                update: None,
                check: None,
                remove: None,
                resolve_version: None,
            }),
            resolve_version: None,
            taint_on_upgrade: true,
            taint_reason: String::new(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn runtime_delegation_renders_and_runs_the_install_template() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls.txt");
        let resource = tool(
            "apiVersion: tomei.dev/v1\nmetadata: {name: gopls}\nspec:\n  version: v0.16.0\n  runtimeRef: go\n  package: golang.org/x/tools/gopls\n",
        );
        let deps = ToolDeps {
            runtime: Some(runtime_state(
                dir.path(),
                &format!(
                    "echo \"install {{{{.Package}}}}@{{{{.Version}}}} into {{{{.BinPath}}}} env=$GOFLAGS\" >> {}",
                    log.display()
                ),
            )),
            ..Default::default()
        };
        let ctx = InstallContext::new(crate::Paths::rooted(dir.path()), reqwest::Client::new());

        let entry = install(&ctx, &resource, ToolPattern::RuntimeDelegation, &deps)
            .await
            .unwrap();

        let recorded = std::fs::read_to_string(&log).unwrap();
        assert_eq!(
            recorded.trim(),
            format!(
                "install golang.org/x/tools/gopls@v0.16.0 into {} env=-trimpath",
                dir.path().display()
            )
        );
        assert_eq!(entry.method, "runtime-delegation");
        assert_eq!(entry.version, "v0.16.0");
        assert_eq!(entry.version_kind, VersionKind::Exact);
        assert_eq!(entry.bin_paths, vec![dir.path().join("gopls")]);
    }

    #[tokio::test]
    async fn runtime_delegation_without_installed_runtime_fails() {
        let dir = tempfile::tempdir().unwrap();
        let resource = tool(
            "apiVersion: tomei.dev/v1\nmetadata: {name: gopls}\nspec:\n  runtimeRef: go\n  package: golang.org/x/tools/gopls\n",
        );
        let ctx = InstallContext::new(crate::Paths::rooted(dir.path()), reqwest::Client::new());
        let err = install(&ctx, &resource, ToolPattern::RuntimeDelegation, &ToolDeps::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not installed"), "{err}");
    }

    #[tokio::test]
    async fn commands_pattern_honors_check_idempotency() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("present");
        std::fs::write(&marker, "").unwrap();
        let resource = tool(&format!(
            "apiVersion: tomei.dev/v1\nmetadata: {{name: mytool}}\nspec:\n  version: 2.0.0\n  commands:\n    check: \"test -e {m}\"\n    install: \"touch {m}.reinstalled\"\n    resolveVersion: \"echo 2.0.0\"\n",
            m = marker.display()
        ));
        let ctx = InstallContext::new(crate::Paths::rooted(dir.path()), reqwest::Client::new());

        let entry = install(&ctx, &resource, ToolPattern::Commands, &ToolDeps::default())
            .await
            .unwrap();
        assert!(!marker.with_extension("reinstalled").exists());
        assert_eq!(entry.method, "commands");
        assert_eq!(entry.version, "2.0.0");
        assert_eq!(entry.version_kind, VersionKind::Alias);
    }

    #[tokio::test]
    async fn commands_remove_runs_the_captured_remove_script() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("installed");
        std::fs::write(&marker, "").unwrap();
        let entry = ToolState {
            version: "1.0.0".into(),
            version_kind: VersionKind::Exact,
            spec_version: "1.0.0".into(),
            method: "commands".into(),
            installer_ref: None,
            runtime_ref: None,
            package: None,
            source: None,
            commands: Some(CommandSet {
                install: Some("true".into()),
                update: None,
                check: None,
                remove: Some(format!("rm {}", marker.display())),
                resolve_version: None,
            }),
            install_path: None,
            bin_paths: Vec::new(),
            binaries: Vec::new(),
            digest: None,
            taint_reason: String::new(),
            updated_at: Utc::now(),
        };
        let ctx = InstallContext::new(crate::Paths::rooted(dir.path()), reqwest::Client::new());
        remove(&ctx, &entry, "mytool", &ToolDeps::default()).await.unwrap();
        assert!(!marker.exists());
    }
}
