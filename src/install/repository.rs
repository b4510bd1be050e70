//! Installer-repository installers: git checkouts and delegated
//! repo-management scripts.

use chrono::Utc;

use crate::exec::context;
use crate::resource::{RepositoryResource, RepositorySource};
use crate::shell::{self, ExecRequest};
use crate::state::RepositoryState;

use super::{remove_dir_if_present, InstallContext, InstallError};

/// Installs or refreshes an installer repository.
pub async fn install(
    ctx: &InstallContext,
    resource: &RepositoryResource,
) -> Result<RepositoryState, InstallError> {
    let name = &resource.metadata.name;
    let spec = &resource.spec;
    let identity = format!("InstallerRepository/{name}");

    let path = match spec.source {
        RepositorySource::Git => {
            let url = spec
                .url
                .as_deref()
                .ok_or_else(|| InstallError::Invalid(format!("{identity} has no url")))?;
            let checkout = ctx.paths.repo_dir(&spec.installer_ref, name);
            if checkout.join(".git").exists() {
                context::report_output(&format!("updating {}", checkout.display()));
                shell::run(
                    ExecRequest::new(&identity, "install", "git pull --ff-only".to_string())
                        .cwd(&checkout),
                )
                .await?;
            } else {
                let parent = checkout
                    .parent()
                    .ok_or_else(|| InstallError::Invalid(format!("{identity}: bad repo path")))?;
                std::fs::create_dir_all(parent).map_err(|e| InstallError::io(parent, e))?;
                shell::run(ExecRequest::new(
                    &identity,
                    "install",
                    format!("git clone --depth 1 {} {}", url, checkout.display()),
                ))
                .await?;
            }
            Some(checkout)
        }
        RepositorySource::Delegation => {
            let commands = spec
                .commands
                .as_ref()
                .ok_or_else(|| InstallError::Invalid(format!("{identity} has no commands")))?;
            let already_added = match &commands.check {
                Some(script) => {
                    shell::check(ExecRequest::new(&identity, "check", script.clone())).await?
                }
                None => false,
            };
            if !already_added {
                let install = commands.install.clone().ok_or_else(|| {
                    InstallError::Invalid(format!("{identity}: no install command"))
                })?;
                shell::run(ExecRequest::new(&identity, "install", install)).await?;
            } else {
                context::report_output("check passed, install skipped");
            }
            None
        }
    };

    Ok(RepositoryState {
        installer_ref: spec.installer_ref.clone(),
        source: spec.source,
        url: spec.url.clone(),
        path,
        commands: spec.commands.clone(),
        taint_reason: String::new(),
        updated_at: Utc::now(),
    })
}

/// Removes an installer repository.
pub async fn remove(
    _ctx: &InstallContext,
    entry: &RepositoryState,
    name: &str,
) -> Result<(), InstallError> {
    let identity = format!("InstallerRepository/{name}");
    match entry.source {
        RepositorySource::Git => {
            if let Some(path) = &entry.path {
                remove_dir_if_present(path)?;
            }
        }
        RepositorySource::Delegation => {
            if let Some(script) = entry.commands.as_ref().and_then(|c| c.remove.clone()) {
                shell::run(ExecRequest::new(&identity, "remove", script)).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repository(yaml: &str) -> RepositoryResource {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn delegation_repository_runs_install_once() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("added");
        let resource = repository(&format!(
            "apiVersion: tomei.dev/v1\nmetadata: {{name: stable}}\nspec:\n  installerRef: helm\n  source: delegation\n  commands:\n    check: \"test -e {m}\"\n    install: \"touch {m}\"\n    remove: \"rm {m}\"\n",
            m = marker.display()
        ));
        let ctx = InstallContext::new(crate::Paths::rooted(dir.path()), reqwest::Client::new());

        let entry = install(&ctx, &resource).await.unwrap();
        assert!(marker.exists());
        assert!(entry.path.is_none());

        // Second install is a no-op thanks to the check command.
        std::fs::write(dir.path().join("data").join("x"), "").ok();
        install(&ctx, &resource).await.unwrap();
        assert!(marker.exists());

        remove(&ctx, &entry, "stable").await.unwrap();
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn git_repository_remove_deletes_the_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let checkout = dir.path().join("repos").join("helm").join("charts");
        std::fs::create_dir_all(&checkout).unwrap();
        let entry = RepositoryState {
            installer_ref: "helm".into(),
            source: RepositorySource::Git,
            url: Some("https://github.com/org/charts".into()),
            path: Some(checkout.clone()),
            commands: None,
            taint_reason: String::new(),
            updated_at: Utc::now(),
        };
        let ctx = InstallContext::new(crate::Paths::rooted(dir.path()), reqwest::Client::new());
        remove(&ctx, &entry, "charts").await.unwrap();
        assert!(!checkout.exists());
    }
}
