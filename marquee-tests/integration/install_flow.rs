//! Install and update checks against a repository served over HTTP.

use std::sync::Arc;

use async_trait::async_trait;
use marquee_core::config::MarqueeConfig;
use marquee_core::provider::ProviderRegistry;
use marquee_core::test_fixtures::{create_temp_providers_root, manifest_json, sample_metadata};
use marquee_core::transport::ByteStream;
use marquee_core::{
    HttpTransport, InstallError, MarqueeError, ProviderInstallationStatus, ProviderManager,
    Repository, Transport, TransportError,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RAW_HOST: &str = "https://raw.githubusercontent.com";
const MANIFEST_PATH: &str = "/marquee/providers/builds/updater.json";

/// Sends raw-host requests to the mock server instead.
struct RewritingTransport {
    inner: HttpTransport,
    base: String,
}

#[async_trait]
impl Transport for RewritingTransport {
    async fn get(&self, url: &str) -> Result<ByteStream, TransportError> {
        let rewritten = match url.strip_prefix(RAW_HOST) {
            Some(rest) => format!("{}{rest}", self.base),
            None => url.to_string(),
        };
        self.inner.get(&rewritten).await
    }
}

fn repository() -> Repository {
    Repository::parse("https://github.com/marquee/providers").unwrap()
}

fn manager_for(server: &MockServer) -> (ProviderManager, TempDir) {
    let root = create_temp_providers_root();
    let mut config = MarqueeConfig::for_testing();
    config.storage.providers_root = root.path().to_path_buf();

    let transport = RewritingTransport {
        inner: HttpTransport::new(&config.network).unwrap(),
        base: server.uri(),
    };
    let manager = ProviderManager::new(
        Arc::new(transport),
        Arc::new(ProviderRegistry::in_memory()),
        &config,
    );
    (manager, root)
}

async fn serve(server: &MockServer, route: &str, body: impl Into<Vec<u8>>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.into()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_install_then_detect_outdated() {
    let server = MockServer::start().await;
    serve(&server, MANIFEST_PATH, manifest_json(&[sample_metadata("alpha", 10001)])).await;
    serve(&server, "/marquee/providers/builds/alpha.flx", b"alpha-10001".to_vec()).await;
    let (manager, root) = manager_for(&server);

    let entry = manager.install(&repository(), "alpha").await.unwrap();

    let folder = root.path().join("default").join("marquee-providers");
    assert_eq!(std::fs::read(folder.join("alpha.flx")).unwrap(), b"alpha-10001");
    assert!(folder.join("updater.json").exists());
    assert_eq!(manager.status("alpha", Some(10001)), ProviderInstallationStatus::Installed);
    assert_eq!(entry.installed_version_code, 10001);

    server.reset().await;
    serve(&server, MANIFEST_PATH, manifest_json(&[sample_metadata("alpha", 10002)])).await;

    let updates = manager.check_updates(&repository()).await.unwrap();

    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].status, ProviderInstallationStatus::Outdated);
    // Nothing was downloaded or changed automatically
    assert_eq!(std::fs::read(folder.join("alpha.flx")).unwrap(), b"alpha-10001");
    assert_eq!(
        manager.registry().get("alpha").unwrap().installed_version_code,
        10001
    );
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.path(), MANIFEST_PATH);
}

#[tokio::test]
async fn test_failed_reinstall_keeps_previous_bundle() {
    let server = MockServer::start().await;
    serve(&server, MANIFEST_PATH, manifest_json(&[sample_metadata("alpha", 1)])).await;
    serve(&server, "/marquee/providers/builds/alpha.flx", b"alpha-v1".to_vec()).await;
    let (manager, root) = manager_for(&server);
    manager.install(&repository(), "alpha").await.unwrap();

    server.reset().await;
    serve(&server, MANIFEST_PATH, manifest_json(&[sample_metadata("alpha", 2)])).await;
    Mock::given(method("GET"))
        .and(path("/marquee/providers/builds/alpha.flx"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = manager.update("alpha").await;

    match result {
        Err(MarqueeError::Install(InstallError::DownloadFailed { url, .. })) => {
            assert!(url.ends_with("/alpha.flx"), "unexpected url {url}");
        }
        other => panic!("expected DownloadFailed, got {other:?}"),
    }

    let bundle = root
        .path()
        .join("default")
        .join("marquee-providers")
        .join("alpha.flx");
    assert_eq!(std::fs::read(&bundle).unwrap(), b"alpha-v1");
    assert!(!bundle.with_file_name("alpha.flx.old").exists());
    assert_eq!(manager.registry().get("alpha").unwrap().installed_version_code, 1);
}

#[tokio::test]
async fn test_concurrent_installs_share_repository_folder() {
    let server = MockServer::start().await;
    serve(
        &server,
        MANIFEST_PATH,
        manifest_json(&[sample_metadata("alpha", 3), sample_metadata("beta", 5)]),
    )
    .await;
    serve(&server, "/marquee/providers/builds/alpha.flx", b"alpha-3".to_vec()).await;
    serve(&server, "/marquee/providers/builds/beta.flx", b"beta-5".to_vec()).await;
    let (manager, root) = manager_for(&server);
    let repository = repository();

    let (alpha, beta) = tokio::join!(
        manager.install(&repository, "alpha"),
        manager.install(&repository, "beta")
    );
    alpha.unwrap();
    beta.unwrap();

    let folder = root.path().join("default").join("marquee-providers");
    let manifest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(folder.join("updater.json")).unwrap()).unwrap();
    assert_eq!(manifest.as_array().map(Vec::len), Some(2));
    assert!(!folder.join("updater.json.old").exists());
    assert_eq!(std::fs::read(folder.join("beta.flx")).unwrap(), b"beta-5");

    manager.uninstall("alpha").await.unwrap();

    assert!(!folder.join("alpha.flx").exists());
    assert!(folder.join("beta.flx").exists());
    assert!(folder.join("updater.json").exists());
    assert_eq!(manager.status("beta", Some(5)), ProviderInstallationStatus::Installed);
}

#[tokio::test]
async fn test_missing_manifest_is_network_error() {
    let server = MockServer::start().await;
    let (manager, _root) = manager_for(&server);

    let result = manager.install(&repository(), "alpha").await;

    let error = result.unwrap_err();
    assert!(matches!(error, MarqueeError::Manifest(_)));
    assert_eq!(error.user_message(), "Could not reach the provider repository");
    assert!(manager.registry().is_empty());
}
