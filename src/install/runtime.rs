//! Runtime installers: download archives or delegate to bootstrap
//! scripts.

use chrono::Utc;

use crate::exec::context;
use crate::io::{checksum, download, extract};
use crate::resource::{ArchiveType, InstallMode, RuntimeResource};
use crate::shell::{self, ExecRequest};
use crate::state::RuntimeState;
use crate::template::{self, Vars};

use super::{expand_home, remove_dir_if_present, remove_link_if_present, resolve_version};
use super::{InstallContext, InstallError, ResolvedVersion};

/// Installs (or re-installs) a runtime and returns the entry to persist.
pub async fn install(
    ctx: &InstallContext,
    resource: &RuntimeResource,
) -> Result<RuntimeState, InstallError> {
    match resource.spec.mode {
        InstallMode::Download => install_download(ctx, resource).await,
        InstallMode::Delegation => install_delegation(resource).await,
    }
}

async fn install_download(
    ctx: &InstallContext,
    resource: &RuntimeResource,
) -> Result<RuntimeState, InstallError> {
    let name = &resource.metadata.name;
    let spec = &resource.spec;
    let identity = format!("Runtime/{name}");
    let source = spec
        .source
        .as_ref()
        .ok_or_else(|| InstallError::Invalid(format!("{identity} has no source")))?;

    let resolved = resolve_version(
        &identity,
        &spec.version,
        spec.resolve_version.as_deref(),
        &spec.env,
    )
    .await?;

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

    if context::is_cancelled() {
        return Err(InstallError::Cancelled);
    }

    let tmp_root = ctx.paths.tmp_dir();
    std::fs::create_dir_all(&tmp_root).map_err(|e| InstallError::io(&tmp_root, e))?;
    let workdir = tempfile::Builder::new()
        .prefix("tomei-")
        .tempdir_in(&tmp_root)
        .map_err(|e| InstallError::io(&tmp_root, e))?;
    let artifact = workdir.path().join(&asset);

    let digest =
        download::fetch_verified(&ctx.client, &url, &artifact, expected.as_deref()).await?;

    if context::is_cancelled() {
        return Err(InstallError::Cancelled);
    }

    let archive_type = source.archive_type.unwrap_or_else(|| ArchiveType::infer(&url));
    let install_dir = ctx.paths.runtime_dir(name, &resolved.version);
    remove_dir_if_present(&install_dir)?;
    {
        let artifact = artifact.clone();
        let extract_dir = install_dir.clone();
        let binary = spec.binaries.first().cloned().unwrap_or_else(|| name.clone());
        tokio::task::spawn_blocking(move || {
            extract::extract(&artifact, &extract_dir, archive_type, &binary)
        })
        .await
        .map_err(|e| InstallError::Invalid(format!("extract task failed: {e}")))?
        .map_err(|e| InstallError::io(&install_dir, e))?;
    }

    if context::is_cancelled() {
        return Err(InstallError::Cancelled);
    }

    let bin_dir = spec
        .bin_dir
        .as_deref()
        .map(expand_home)
        .unwrap_or_else(|| ctx.paths.bin_dir());
    for binary in &spec.binaries {
        let target = extract::find_binary(&install_dir, binary).ok_or_else(|| {
            InstallError::Invalid(format!("{identity}: binary {binary:?} not found in archive"))
        })?;
        extract::mark_executable(&target).map_err(|e| InstallError::io(&target, e))?;
        let link = bin_dir.join(binary);
        extract::place_symlink(&target, &link).map_err(|e| InstallError::io(&link, e))?;
        context::report_output(&format!("linked {}", link.display()));
    }

    Ok(state_entry(resource, resolved, Some(install_dir), Some(bin_dir), Some(digest)))
}

async fn install_delegation(resource: &RuntimeResource) -> Result<RuntimeState, InstallError> {
    let name = &resource.metadata.name;
    let spec = &resource.spec;
    let identity = format!("Runtime/{name}");
    let bootstrap = spec
        .bootstrap
        .as_ref()
        .ok_or_else(|| InstallError::Invalid(format!("{identity} has no bootstrap commands")))?;

    let already_installed = match &bootstrap.check {
        Some(script) => {
            shell::check(
                ExecRequest::new(&identity, "bootstrap check", script.clone()).env(&spec.env),
            )
            .await?
        }
        None => false,
    };

    if !already_installed {
        let install_script = bootstrap
            .install
            .clone()
            .ok_or_else(|| InstallError::Invalid(format!("{identity} has no bootstrap.install")))?;
        shell::run(ExecRequest::new(&identity, "bootstrap install", install_script).env(&spec.env))
            .await?;
    } else {
        context::report_output("bootstrap check passed, install skipped");
    }

    let resolved = resolve_version(
        &identity,
        &spec.version,
        spec.resolve_version.as_deref(),
        &spec.env,
    )
    .await?;

    let bin_dir = spec.bin_dir.as_deref().map(expand_home);
    Ok(state_entry(resource, resolved, None, bin_dir, None))
}

fn state_entry(
    resource: &RuntimeResource,
    resolved: ResolvedVersion,
    install_path: Option<std::path::PathBuf>,
    bin_dir: Option<std::path::PathBuf>,
    digest: Option<String>,
) -> RuntimeState {
    let spec = &resource.spec;
    RuntimeState {
        version: resolved.version,
        version_kind: resolved.kind,
        spec_version: spec.version.clone(),
        mode: spec.mode,
        install_path,
        bin_dir,
        tool_bin_path: spec.tool_bin_path.as_deref().map(expand_home),
        binaries: spec.binaries.clone(),
        digest,
        source: spec.source.clone(),
        bootstrap: spec.bootstrap.clone(),
        env: spec.env.clone(),
        commands: spec.commands.clone(),
        resolve_version: spec.resolve_version.clone(),
        taint_on_upgrade: spec.taint_on_upgrade,
        taint_reason: String::new(),
        updated_at: Utc::now(),
    }
}

/// Removes an installed runtime.
pub async fn remove(
    ctx: &InstallContext,
    entry: &RuntimeState,
    name: &str,
) -> Result<(), InstallError> {
    let identity = format!("Runtime/{name}");
    match entry.mode {
        InstallMode::Download => {
            let bin_dir = entry.bin_dir.clone().unwrap_or_else(|| ctx.paths.bin_dir());
            for binary in &entry.binaries {
                remove_link_if_present(&bin_dir.join(binary))?;
            }
            // The whole per-runtime tree is owned state; drop every
            // version, not just the recorded one.
            let runtime_root = ctx
                .paths
                .runtime_dir(name, "x")
                .parent()
                .map(std::path::Path::to_path_buf)
                .expect("runtime dir has a parent");
            remove_dir_if_present(&runtime_root)?;
        }
        InstallMode::Delegation => {
            if let Some(script) = entry.bootstrap.as_ref().and_then(|b| b.remove.clone()) {
                shell::run(
                    ExecRequest::new(&identity, "bootstrap remove", script).env(&entry.env),
                )
                .await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::VersionKind;

    fn delegation_runtime(yaml_spec: &str) -> RuntimeResource {
        serde_yaml::from_str(&format!(
            "apiVersion: tomei.dev/v1\nmetadata: {{name: demo}}\nspec:\n{yaml_spec}"
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn delegation_install_skips_when_check_passes() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("installed");
        let resource = delegation_runtime(&format!(
            "  mode: delegation\n  bootstrap:\n    check: \"test -e {m}\"\n    install: \"touch {m}.should-not-happen\"\n",
            m = marker.display()
        ));
        std::fs::write(&marker, "").unwrap();

        let entry = install_delegation(&resource).await.unwrap();
        assert!(!marker.with_extension("should-not-happen").exists());
        assert_eq!(entry.version, "latest");
        assert_eq!(entry.version_kind, VersionKind::Latest);
    }

    #[tokio::test]
    async fn delegation_install_runs_bootstrap_when_check_fails() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("installed");
        let resource = delegation_runtime(&format!(
            "  version: \"1.80\"\n  mode: delegation\n  bootstrap:\n    check: \"test -e {m}\"\n    install: \"touch {m}\"\n  resolveVersion: \"echo 1.80.1\"\n",
            m = marker.display()
        ));

        let entry = install_delegation(&resource).await.unwrap();
        assert!(marker.exists());
        assert_eq!(entry.version, "1.80.1");
        assert_eq!(entry.version_kind, VersionKind::Alias);
        assert_eq!(entry.spec_version, "1.80");
    }

    #[tokio::test]
    async fn delegation_install_failure_surfaces_phase() {
        let resource = delegation_runtime(
            "  mode: delegation\n  bootstrap:\n    install: \"echo nope >&2; exit 7\"\n",
        );
        let err = install_delegation(&resource).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("bootstrap install"), "{message}");
        assert!(message.contains("nope"), "{message}");
    }
}
