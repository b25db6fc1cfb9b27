//! Test fixtures for provider and resolution testing.
//!
//! Scripted providers and transports with call counters, so tests can
//! assert exactly which network-facing calls a component made.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use parking_lot::Mutex;

use crate::media::{Episode, Film, MediaLink};
use crate::provider::{
    LinkStream, ProviderApi, ProviderError, ProviderMetadata, ProviderRegistry,
    ProviderRegistryEntry,
};
use crate::provider::metadata::{Language, ProviderStatus, ProviderType};
use crate::transport::{ByteStream, Transport, TransportError};

/// Metadata published under `https://github.com/marquee/providers`.
///
/// The bundle lives at `<raw builds branch>/<id>.flx`, next to the
/// repository's `updater.json`.
pub fn sample_metadata(id: &str, version_code: i64) -> ProviderMetadata {
    ProviderMetadata {
        id: id.to_string(),
        name: format!("Provider {id}"),
        authors: Vec::new(),
        repository_url: "https://github.com/marquee/providers".to_string(),
        build_url: format!(
            "https://raw.githubusercontent.com/marquee/providers/builds/{id}.flx"
        ),
        changelog: String::new(),
        version_name: format!("1.0.{version_code}"),
        version_code,
        adult: false,
        description: None,
        icon_url: None,
        language: Language::Multiple,
        provider_type: ProviderType::All,
        status: ProviderStatus::Working,
    }
}

/// Serializes metadata the way a repository publishes it.
///
/// # Panics
///
/// Panics if serialization fails, which indicates a broken fixture.
pub fn manifest_json(providers: &[ProviderMetadata]) -> String {
    serde_json::to_string(providers).unwrap()
}

/// Creates an empty temporary providers root.
///
/// # Panics
///
/// Panics if the temporary directory cannot be created.
pub fn create_temp_providers_root() -> tempfile::TempDir {
    tempfile::tempdir().unwrap()
}

/// Registry with one enabled entry per provider, in slice order, each
/// named after its provider and attached to it.
///
/// # Panics
///
/// Panics if the in-memory registry rejects an entry.
pub fn registry_with(providers: &[Arc<ScriptedProvider>]) -> Arc<ProviderRegistry> {
    let registry = Arc::new(ProviderRegistry::in_memory());

    for provider in providers {
        let mut metadata = sample_metadata(provider.name(), 1);
        metadata.name = provider.name().to_string();
        registry.add(ProviderRegistryEntry::new(metadata)).unwrap();
        registry
            .attach(provider.name(), Arc::clone(provider) as Arc<dyn ProviderApi>)
            .unwrap();
    }

    registry
}

#[derive(Clone)]
enum LinkScript {
    Links(Vec<MediaLink>),
    FailAfter(Vec<MediaLink>, ProviderError),
}

/// Sets a flag when the link stream it travels with is dropped.
struct CloseFlag(Arc<AtomicBool>);

impl Drop for CloseFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Provider answering from a script.
pub struct ScriptedProvider {
    name: String,
    id_result: Result<String, ProviderError>,
    script: LinkScript,
    delay: Option<Duration>,
    hang: bool,
    id_calls: AtomicUsize,
    link_calls: AtomicUsize,
    closed: Arc<AtomicBool>,
}

impl ScriptedProvider {
    fn new(name: &str, id_result: Result<String, ProviderError>, script: LinkScript) -> Self {
        Self {
            name: name.to_string(),
            id_result,
            script,
            delay: None,
            hang: false,
            id_calls: AtomicUsize::new(0),
            link_calls: AtomicUsize::new(0),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Yields `links` for any title.
    pub fn with_links(name: &str, links: Vec<MediaLink>) -> Self {
        Self::new(name, Ok(format!("{name}-item")), LinkScript::Links(links))
    }

    /// Finds the title but has no links for it.
    pub fn empty(name: &str) -> Self {
        Self::with_links(name, Vec::new())
    }

    /// Fails to map the title to an item id.
    pub fn failing_id(name: &str, error: ProviderError) -> Self {
        Self::new(name, Err(error), LinkScript::Links(Vec::new()))
    }

    /// Yields `links`, then fails with `error`.
    pub fn failing_links(name: &str, links: Vec<MediaLink>, error: ProviderError) -> Self {
        Self::new(name, Ok(format!("{name}-item")), LinkScript::FailAfter(links, error))
    }

    /// Waits `delay` before answering the id lookup.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Keeps the link stream open forever after the scripted links.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id_calls(&self) -> usize {
        self.id_calls.load(Ordering::SeqCst)
    }

    pub fn link_calls(&self) -> usize {
        self.link_calls.load(Ordering::SeqCst)
    }

    /// Whether the last link stream handed out has been dropped.
    pub fn stream_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderApi for ScriptedProvider {
    async fn resolve_id(&self, _film: &Film) -> Result<String, ProviderError> {
        self.id_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.id_result.clone()
    }

    fn links(&self, _id: &str, _film: &Film, _episode: Option<&Episode>) -> LinkStream {
        self.link_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(false, Ordering::SeqCst);

        let items: Vec<Result<MediaLink, ProviderError>> = match &self.script {
            LinkScript::Links(links) => links.iter().cloned().map(Ok).collect(),
            LinkScript::FailAfter(links, error) => links
                .iter()
                .cloned()
                .map(Ok)
                .chain(std::iter::once(Err(error.clone())))
                .collect(),
        };

        let scripted = stream::iter(items);
        let body = if self.hang {
            scripted.chain(stream::pending()).boxed()
        } else {
            scripted.boxed()
        };

        let flag = CloseFlag(Arc::clone(&self.closed));
        body.map(move |item| {
            let _flag = &flag;
            item
        })
        .boxed()
    }
}

#[derive(Clone)]
enum Route {
    Body(Bytes),
    Status(u16),
    Truncated(Bytes),
}

/// Transport serving scripted responses; unknown URLs answer 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `body` for `url`, replacing any previous route.
    pub fn respond(&self, url: &str, body: impl Into<Bytes>) {
        self.routes
            .lock()
            .insert(url.to_string(), Route::Body(body.into()));
    }

    /// Answers `url` with a non-2xx status.
    pub fn fail_status(&self, url: &str, status: u16) {
        self.routes.lock().insert(url.to_string(), Route::Status(status));
    }

    /// Sends `prefix`, then breaks the body stream.
    pub fn truncate(&self, url: &str, prefix: impl Into<Bytes>) {
        self.routes
            .lock()
            .insert(url.to_string(), Route::Truncated(prefix.into()));
    }

    /// URLs requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &str) -> Result<ByteStream, TransportError> {
        self.requests.lock().push(url.to_string());
        let route = self.routes.lock().get(url).cloned();

        match route {
            Some(Route::Body(body)) => Ok(stream::iter([Ok(body)]).boxed()),
            Some(Route::Truncated(prefix)) => {
                let broken = Err(TransportError::Body {
                    url: url.to_string(),
                    reason: "connection reset".to_string(),
                });
                Ok(stream::iter([Ok(prefix), broken]).boxed())
            }
            Some(Route::Status(status)) => Err(TransportError::Status {
                url: url.to_string(),
                status,
            }),
            None => Err(TransportError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_transport_routes() {
        let transport = ScriptedTransport::new();
        transport.respond("https://a", "hello");
        transport.fail_status("https://b", 500);

        assert_eq!(&transport.get_bytes("https://a").await.unwrap()[..], b"hello");
        assert!(matches!(
            transport.get_bytes("https://b").await,
            Err(TransportError::Status { status: 500, .. })
        ));
        assert!(matches!(
            transport.get_bytes("https://c").await,
            Err(TransportError::Status { status: 404, .. })
        ));
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_scripted_provider_close_flag() {
        let provider = ScriptedProvider::with_links("a", vec![MediaLink::stream("x", "https://x")]);
        let film = Film::movie("f", "F");

        let mut links = provider.links("a-item", &film, None);
        assert!(links.next().await.is_some());
        assert!(!provider.stream_closed());

        drop(links);
        assert!(provider.stream_closed());
        assert_eq!(provider.link_calls(), 1);
    }
}
