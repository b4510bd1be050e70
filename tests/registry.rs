//! Registry resolver behavior against a mock HTTP registry: fetch,
//! cache, and the override-merging precedence rules.

use reqwest::Client;

use tomei::registry::{ResolveRequest, Resolver};
use tomei::resource::ArchiveType;

const RIPGREP_DOC: &str = r#"
packages:
  - type: github_release
    repo_owner: BurntSushi
    repo_name: ripgrep
    asset: "ripgrep-{{.Version}}-{{.Arch}}-{{.OS}}.tar.gz"
    replacements:
      darwin: macos
      linux: linux
      amd64: x86_64
      arm64: aarch64
    checksum:
      type: github_release
      asset: "{{.Asset}}.sha256"
      algorithm: sha256
    version_overrides:
      - version_constraint: semver(">= 2.0.0")
        replacements:
          darwin: Darwin
    overrides:
      - goos: linux
        format: zip
"#;

fn request<'a>(version: &'a str, os: &'a str, arch: &'a str) -> ResolveRequest<'a> {
    ResolveRequest {
        registry_ref: "v4.190.0",
        owner: "BurntSushi",
        repo: "ripgrep",
        version,
        os,
        arch,
    }
}

async fn resolver_with_doc(doc: &str) -> (mockito::ServerGuard, mockito::Mock, tempfile::TempDir, Resolver) {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v4.190.0/pkgs/BurntSushi/ripgrep/registry.yaml")
        .with_body(doc)
        .expect(1)
        .create_async()
        .await;
    let cache = tempfile::tempdir().unwrap();
    let resolver = Resolver::new(server.url(), cache.path(), Client::new());
    (server, mock, cache, resolver)
}

#[tokio::test]
async fn version_override_replaces_the_replacements_map_wholesale() {
    let (_server, _mock, _cache, resolver) = resolver_with_doc(RIPGREP_DOC).await;

    // version 2.5.0 matches the >= 2.0.0 override: darwin renders as
    // Darwin (from the override) and arm64 stays arm64, because the
    // override REPLACED the whole base map and carries no arch entries.
    let resolved = resolver.resolve(&request("2.5.0", "darwin", "arm64")).await.unwrap();
    assert_eq!(resolved.asset, "ripgrep-2.5.0-arm64-Darwin.tar.gz");
    assert_eq!(
        resolved.archive_url,
        "https://github.com/BurntSushi/ripgrep/releases/download/2.5.0/ripgrep-2.5.0-arm64-Darwin.tar.gz"
    );
    // The checksum block survives the override untouched.
    assert_eq!(
        resolved.checksum_url.as_deref(),
        Some("https://github.com/BurntSushi/ripgrep/releases/download/2.5.0/ripgrep-2.5.0-arm64-Darwin.tar.gz.sha256")
    );
}

#[tokio::test]
async fn below_the_constraint_the_base_record_applies() {
    let (_server, _mock, _cache, resolver) = resolver_with_doc(RIPGREP_DOC).await;
    let resolved = resolver.resolve(&request("1.9.0", "darwin", "arm64")).await.unwrap();
    assert_eq!(resolved.asset, "ripgrep-1.9.0-aarch64-macos.tar.gz");
    assert_eq!(resolved.archive_type, ArchiveType::TarGz);
}

#[tokio::test]
async fn os_override_merges_after_the_version_override() {
    let (_server, _mock, _cache, resolver) = resolver_with_doc(RIPGREP_DOC).await;
    // linux matches the OS override, which swaps the format to zip while
    // the version override's replacements still govern the tokens.
    let resolved = resolver.resolve(&request("2.5.0", "linux", "amd64")).await.unwrap();
    assert_eq!(resolved.asset, "ripgrep-2.5.0-amd64-linux.tar.gz");
    assert_eq!(resolved.archive_type, ArchiveType::Zip);
}

#[tokio::test]
async fn second_resolution_hits_the_cache() {
    let (_server, mock, cache, resolver) = resolver_with_doc(RIPGREP_DOC).await;

    resolver.resolve(&request("1.0.0", "linux", "amd64")).await.unwrap();
    resolver.resolve(&request("2.5.0", "darwin", "arm64")).await.unwrap();

    // expect(1) on the mock: the second resolve read the cached bytes.
    mock.assert_async().await;
    assert!(cache
        .path()
        .join("v4.190.0/pkgs/BurntSushi/ripgrep/registry.yaml")
        .exists());
}

#[tokio::test]
async fn unsupported_platform_is_reported_but_still_resolves() {
    let doc = r#"
packages:
  - type: github_release
    asset: "tool-{{.Version}}-{{.OS}}-{{.Arch}}.tar.gz"
    supported_envs: ["linux/amd64"]
"#;
    let (_server, _mock, _cache, resolver) = resolver_with_doc(doc).await;
    let resolved = resolver.resolve(&request("1.0.0", "darwin", "arm64")).await.unwrap();
    assert_eq!(resolved.errors.len(), 1);
    assert!(resolved.archive_url.contains("tool-1.0.0-darwin-arm64.tar.gz"));
}

#[tokio::test]
async fn unknown_registry_fields_are_fatal() {
    let doc = r#"
packages:
  - type: github_release
    asset: "a-{{.Version}}.tar.gz"
    cosign_experiment: true
"#;
    let (_server, _mock, _cache, resolver) = resolver_with_doc(doc).await;
    let error = resolver.resolve(&request("1.0.0", "linux", "amd64")).await.unwrap_err();
    assert!(error.to_string().contains("parse"), "{error}");
}

#[tokio::test]
async fn missing_registry_document_is_a_download_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/v4.190.0/pkgs/BurntSushi/ripgrep/registry.yaml")
        .with_status(404)
        .create_async()
        .await;
    let cache = tempfile::tempdir().unwrap();
    let resolver = Resolver::new(server.url(), cache.path(), Client::new());
    let error = resolver.resolve(&request("1.0.0", "linux", "amd64")).await.unwrap_err();
    assert!(error.to_string().contains("404"), "{error}");
}
