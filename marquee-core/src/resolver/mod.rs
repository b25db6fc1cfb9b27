//! Media link resolution with per-key caching
//!
//! Tries providers in registry order until one yields a stream link,
//! reporting progress as a stream of [`ResolutionState`]s. Successful
//! results are cached per (provider, film, episode); concurrent requests for
//! the same title share a single provider pass.

pub mod cache;
pub mod state;
pub mod stream;

use std::collections::HashMap;
use std::sync::Arc;

pub use cache::{CacheEntry, CacheKey, LinkCache};
use futures::StreamExt;
use parking_lot::Mutex;
pub use state::ResolutionState;
pub use stream::{ProviderFailure, ResolutionOutcome, ResolutionReport, ResolutionStream};
use stream::{FlightTable, InFlight, ResolutionKey};

use crate::config::ResolutionConfig;
use crate::media::{Episode, Film, MediaLink};
use crate::provider::{ProviderApi, ProviderError, ProviderRegistry};

/// Parameters of a resolution.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub film: Film,
    pub episode: Option<Episode>,
    /// Try only this provider, even if disabled or in maintenance
    pub preferred_provider: Option<String>,
    /// Drop cached links of the candidates before resolving
    pub refresh: bool,
}

impl ResolveRequest {
    pub fn new(film: Film) -> Self {
        Self {
            film,
            episode: None,
            preferred_provider: None,
            refresh: false,
        }
    }

    pub fn with_episode(mut self, episode: Episode) -> Self {
        self.episode = Some(episode);
        self
    }

    pub fn with_preferred_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider_id.into());
        self
    }

    pub fn refreshing(mut self) -> Self {
        self.refresh = true;
        self
    }

    fn key(&self) -> ResolutionKey {
        ResolutionKey {
            film_id: self.film.id.clone(),
            episode_id: self.episode.as_ref().map(|e| e.id.clone()),
            preferred_provider: self.preferred_provider.clone(),
        }
    }

    fn cache_key(&self, provider_id: &str) -> CacheKey {
        CacheKey::new(
            provider_id,
            self.film.id.as_str(),
            self.episode.as_ref().map(|e| e.id.as_str()),
        )
    }
}

#[derive(Clone)]
struct Candidate {
    id: String,
    name: String,
    provider: Arc<dyn ProviderApi>,
}

/// Resolves playable links across the registered providers.
pub struct MediaLinkResolver {
    registry: Arc<ProviderRegistry>,
    cache: Arc<LinkCache>,
    flights: Arc<FlightTable>,
    config: ResolutionConfig,
}

impl MediaLinkResolver {
    pub fn new(registry: Arc<ProviderRegistry>, config: &ResolutionConfig) -> Self {
        Self {
            registry,
            cache: Arc::new(LinkCache::new()),
            flights: Arc::new(Mutex::new(HashMap::new())),
            config: config.clone(),
        }
    }

    pub fn cache(&self) -> &Arc<LinkCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Number of provider passes currently running.
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }

    /// Starts or joins a resolution and returns its progress stream.
    ///
    /// A cached result for any candidate short-circuits without calling a
    /// provider. A request whose key is already being resolved attaches to
    /// that pass. Dropping every stream of a pass cancels it, closing the
    /// provider's link stream and leaving the cache untouched.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn resolve(&self, request: ResolveRequest) -> ResolutionStream {
        let key = request.key();
        let mut flights = self.flights.lock();

        if let Some(flight) = flights.get(&key) {
            tracing::debug!("Joining in-flight resolution of {}", request.film.title);
            return ResolutionStream::attach(Arc::clone(flight), Arc::clone(&self.flights), key);
        }

        let candidates = self.candidates(&request);
        if candidates.is_empty() {
            tracing::warn!("No eligible providers for {}", request.film.title);
            return ResolutionStream::ready(ResolutionOutcome {
                state: ResolutionState::Unavailable(self.config.unavailable_message.clone()),
                provider_id: None,
                links: Vec::new(),
                failures: Vec::new(),
                from_cache: false,
            });
        }

        if request.refresh {
            for candidate in &candidates {
                self.cache.invalidate(&request.cache_key(&candidate.id));
            }
        }

        if let Some(outcome) = self.cached_outcome(&request, &candidates) {
            return ResolutionStream::ready(outcome);
        }

        tracing::info!(
            "Resolving {} across {} providers",
            request.film.title,
            candidates.len()
        );

        let flight = InFlight::new(self.config.progress_capacity);
        flights.insert(key.clone(), Arc::clone(&flight));
        let stream =
            ResolutionStream::attach(Arc::clone(&flight), Arc::clone(&self.flights), key.clone());

        tokio::spawn(run_flight(
            flight,
            key,
            request,
            candidates,
            Arc::clone(&self.cache),
            Arc::clone(&self.flights),
            self.config.unavailable_message.clone(),
        ));

        stream
    }

    /// Drops cached links of a film, or of one of its episodes.
    pub fn invalidate(&self, film_id: &str, episode_id: Option<&str>) -> usize {
        self.cache.invalidate_film(film_id, episode_id)
    }

    /// Cancels every running pass; subscribers receive a terminal error.
    pub fn cancel_all(&self) {
        let flights = self.flights.lock();
        for flight in flights.values() {
            flight.token().cancel();
        }
        tracing::info!("Cancelled {} in-flight resolutions", flights.len());
    }

    fn candidates(&self, request: &ResolveRequest) -> Vec<Candidate> {
        if let Some(preferred) = &request.preferred_provider {
            let entry = self.registry.get(preferred);
            let provider = self.registry.provider(preferred);

            return match (entry, provider) {
                (Some(entry), Some(provider)) => vec![Candidate {
                    id: entry.metadata.id,
                    name: entry.metadata.name,
                    provider,
                }],
                _ => {
                    tracing::warn!("Preferred provider {} is not available", preferred);
                    Vec::new()
                }
            };
        }

        self.registry
            .candidates(request.film.kind)
            .into_iter()
            .map(|(entry, provider)| Candidate {
                id: entry.metadata.id,
                name: entry.metadata.name,
                provider,
            })
            .collect()
    }

    fn cached_outcome(
        &self,
        request: &ResolveRequest,
        candidates: &[Candidate],
    ) -> Option<ResolutionOutcome> {
        candidates.iter().find_map(|candidate| {
            let entry = self.cache.get(&request.cache_key(&candidate.id))?;
            if !entry.has_stream() {
                return None;
            }

            tracing::debug!("Cache hit for {} from {}", request.film.title, candidate.name);
            let state = if entry.has_trusted_stream() {
                ResolutionState::success_with_trusted(&candidate.name)
            } else {
                ResolutionState::success(&candidate.name)
            };

            Some(ResolutionOutcome {
                state,
                provider_id: Some(candidate.id.clone()),
                links: entry.links,
                failures: Vec::new(),
                from_cache: true,
            })
        })
    }
}

impl Drop for MediaLinkResolver {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

async fn run_flight(
    flight: Arc<InFlight>,
    key: ResolutionKey,
    request: ResolveRequest,
    candidates: Vec<Candidate>,
    cache: Arc<LinkCache>,
    flights: Arc<FlightTable>,
    unavailable_message: String,
) {
    let outcome = tokio::select! {
        biased;
        _ = flight.token().cancelled() => None,
        outcome = run_pass(&flight, &request, &candidates, &unavailable_message) => Some(outcome),
    };

    let outcome = match outcome {
        Some(outcome) => {
            if outcome.state.is_success() {
                if let Some(provider_id) = &outcome.provider_id {
                    cache.put(request.cache_key(provider_id), outcome.links.clone());
                }
            }
            outcome
        }
        None => {
            tracing::info!("Resolution of {} cancelled", request.film.title);
            ResolutionOutcome {
                state: ResolutionState::Error("Resolution cancelled".to_string()),
                provider_id: None,
                links: Vec::new(),
                failures: Vec::new(),
                from_cache: false,
            }
        }
    };

    {
        let mut flights = flights.lock();
        if flights.get(&key).is_some_and(|f| Arc::ptr_eq(f, &flight)) {
            flights.remove(&key);
        }
    }

    flight.complete(outcome);
}

async fn run_pass(
    flight: &InFlight,
    request: &ResolveRequest,
    candidates: &[Candidate],
    unavailable_message: &str,
) -> ResolutionOutcome {
    let mut failures = Vec::new();

    for candidate in candidates {
        flight.publish(ResolutionState::fetching(&candidate.name));

        let item_id = match candidate.provider.resolve_id(&request.film).await {
            Ok(item_id) => item_id,
            Err(error) => {
                failures.push(record_failure(candidate, &error));
                continue;
            }
        };

        flight.publish(ResolutionState::extracting(&candidate.name));

        let (links, link_error) = collect_links(candidate, &item_id, request).await;

        if links.iter().any(MediaLink::is_stream) {
            if let Some(error) = &link_error {
                tracing::warn!(
                    "{} stopped early but produced stream links: {}",
                    candidate.name,
                    error
                );
            }

            let trusted = links.iter().any(|l| l.is_stream() && l.is_trusted());
            tracing::info!(
                "Resolved {} with {} links from {}",
                request.film.title,
                links.len(),
                candidate.name
            );

            return ResolutionOutcome {
                state: if trusted {
                    ResolutionState::success_with_trusted(&candidate.name)
                } else {
                    ResolutionState::success(&candidate.name)
                },
                provider_id: Some(candidate.id.clone()),
                links,
                failures,
                from_cache: false,
            };
        }

        let error = link_error.unwrap_or_else(|| ProviderError::NotFound {
            reason: "no stream links".to_string(),
        });
        failures.push(record_failure(candidate, &error));
    }

    let state = match failures.iter().rev().find(|f| f.unexpected) {
        Some(failure) => ResolutionState::Error(format!(
            "{} failed: {}",
            failure.provider_name, failure.reason
        )),
        None => ResolutionState::Unavailable(unavailable_message.to_string()),
    };
    tracing::info!("No provider resolved {}: {}", request.film.title, state);

    ResolutionOutcome {
        state,
        provider_id: None,
        links: Vec::new(),
        failures,
        from_cache: false,
    }
}

async fn collect_links(
    candidate: &Candidate,
    item_id: &str,
    request: &ResolveRequest,
) -> (Vec<MediaLink>, Option<ProviderError>) {
    let mut stream = candidate
        .provider
        .links(item_id, &request.film, request.episode.as_ref());
    let mut links = Vec::new();

    while let Some(item) = stream.next().await {
        match item {
            Ok(link) => links.push(link),
            Err(error) => return (links, Some(error)),
        }
    }

    (links, None)
}

fn record_failure(candidate: &Candidate, error: &ProviderError) -> ProviderFailure {
    if error.is_unexpected() {
        tracing::warn!("Provider {} failed: {}", candidate.name, error);
    } else {
        tracing::debug!("Provider {} has nothing: {}", candidate.name, error);
    }

    ProviderFailure {
        provider_id: candidate.id.clone(),
        provider_name: candidate.name.clone(),
        reason: error.to_string(),
        unexpected: error.is_unexpected(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::media::Flag;
    use crate::test_fixtures::{ScriptedProvider, registry_with};

    fn resolver(providers: &[Arc<ScriptedProvider>]) -> MediaLinkResolver {
        MediaLinkResolver::new(registry_with(providers), &ResolutionConfig::default())
    }

    fn movie() -> Film {
        Film::movie("film-1", "Heat")
    }

    fn stream_link() -> MediaLink {
        MediaLink::stream("1080p", "https://cdn.example/heat.m3u8")
    }

    #[tokio::test]
    async fn test_first_success_stops_pass() {
        let a = Arc::new(ScriptedProvider::with_links("a", vec![stream_link()]));
        let b = Arc::new(ScriptedProvider::with_links("b", vec![stream_link()]));
        let resolver = resolver(&[a.clone(), b.clone()]);

        let report = resolver.resolve(ResolveRequest::new(movie())).collect_final().await;

        assert_eq!(report.final_state(), Some(&ResolutionState::success("a")));
        assert_eq!(
            report.states,
            vec![
                ResolutionState::Idle,
                ResolutionState::fetching("a"),
                ResolutionState::extracting("a"),
                ResolutionState::success("a"),
            ]
        );
        assert_eq!(b.id_calls(), 0);
        assert_eq!(resolver.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failover_records_failures() {
        let a = Arc::new(ScriptedProvider::failing_id(
            "a",
            ProviderError::Network {
                reason: "timeout".to_string(),
            },
        ));
        let b = Arc::new(ScriptedProvider::empty("b"));
        let c = Arc::new(ScriptedProvider::with_links("c", vec![stream_link()]));
        let resolver = resolver(&[a.clone(), b.clone(), c.clone()]);

        let report = resolver.resolve(ResolveRequest::new(movie())).collect_final().await;
        let outcome = report.outcome.unwrap();

        assert!(outcome.state.is_success());
        assert_eq!(outcome.provider_id.as_deref(), Some("c"));
        let failed: Vec<&str> = outcome.failures.iter().map(|f| f.provider_id.as_str()).collect();
        assert_eq!(failed, ["a", "b"]);
        assert!(outcome.failures[0].unexpected);
        assert!(!outcome.failures[1].unexpected);
        assert_eq!((a.id_calls(), b.link_calls(), c.link_calls()), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_exhaustion_states() {
        let empty = resolver(&[
            Arc::new(ScriptedProvider::empty("a")),
            Arc::new(ScriptedProvider::empty("b")),
        ]);
        let report = empty.resolve(ResolveRequest::new(movie())).collect_final().await;
        assert_eq!(
            report.final_state(),
            Some(&ResolutionState::Unavailable(
                ResolutionConfig::default().unavailable_message
            ))
        );

        let broken = resolver(&[
            Arc::new(ScriptedProvider::failing_links(
                "a",
                Vec::new(),
                ProviderError::Extraction {
                    reason: "bad markup".to_string(),
                },
            )),
            Arc::new(ScriptedProvider::empty("b")),
        ]);
        let report = broken.resolve(ResolveRequest::new(movie())).collect_final().await;
        assert_eq!(
            report.final_state(),
            Some(&ResolutionState::Error(
                "a failed: Extraction failed: bad markup".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn test_subtitles_alone_are_not_success() {
        let subtitle = MediaLink::subtitle(
            "English",
            "https://subs.example/en.vtt",
            "en",
            crate::media::SubtitleSource::Online,
        );
        let resolver = resolver(&[Arc::new(ScriptedProvider::with_links("a", vec![subtitle]))]);

        let report = resolver.resolve(ResolveRequest::new(movie())).collect_final().await;

        assert!(matches!(report.final_state(), Some(ResolutionState::Unavailable(_))));
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_cache_hit_skips_providers() {
        let a = Arc::new(ScriptedProvider::with_links(
            "a",
            vec![stream_link().with_flag(Flag::trusted("Netflix"))],
        ));
        let resolver = resolver(&[a.clone()]);

        resolver.resolve(ResolveRequest::new(movie())).collect_final().await;
        let report = resolver.resolve(ResolveRequest::new(movie())).collect_final().await;

        assert_eq!(report.states, vec![ResolutionState::success_with_trusted("a")]);
        assert!(report.outcome.unwrap().from_cache);
        assert_eq!(a.id_calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_bypasses_cache() {
        let a = Arc::new(ScriptedProvider::with_links("a", vec![stream_link()]));
        let resolver = resolver(&[a.clone()]);

        resolver.resolve(ResolveRequest::new(movie())).collect_final().await;
        let report = resolver
            .resolve(ResolveRequest::new(movie()).refreshing())
            .collect_final()
            .await;

        assert!(!report.outcome.unwrap().from_cache);
        assert_eq!(a.id_calls(), 2);
        assert_eq!(resolver.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_preferred_provider_bypasses_preferences() {
        let a = Arc::new(ScriptedProvider::with_links("a", vec![stream_link()]));
        let b = Arc::new(ScriptedProvider::with_links("b", vec![stream_link()]));
        let resolver = resolver(&[a.clone(), b.clone()]);
        resolver.registry().toggle_usage(1).unwrap();

        let report = resolver
            .resolve(ResolveRequest::new(movie()).with_preferred_provider("b"))
            .collect_final()
            .await;

        assert_eq!(report.outcome.unwrap().provider_id.as_deref(), Some("b"));
        assert_eq!(a.id_calls(), 0);

        let missing = resolver
            .resolve(ResolveRequest::new(movie()).with_preferred_provider("zzz"))
            .collect_final()
            .await;
        assert!(matches!(missing.final_state(), Some(ResolutionState::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_pass() {
        let a = Arc::new(
            ScriptedProvider::with_links("a", vec![stream_link()]).delayed(Duration::from_millis(50)),
        );
        let resolver = resolver(&[a.clone()]);

        let first = resolver.resolve(ResolveRequest::new(movie()));
        let second = resolver.resolve(ResolveRequest::new(movie()));
        assert_eq!(resolver.in_flight(), 1);

        let (first, second) = tokio::join!(first.collect_final(), second.collect_final());

        assert!(first.final_state().is_some_and(ResolutionState::is_success));
        assert!(second.final_state().is_some_and(ResolutionState::is_success));
        assert_eq!(a.id_calls(), 1);
        assert_eq!(a.link_calls(), 1);
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_without_caching() {
        let a = Arc::new(ScriptedProvider::with_links("a", vec![stream_link()]).hanging());
        let resolver = resolver(&[a.clone()]);

        let mut stream = resolver.resolve(ResolveRequest::new(movie()));
        while let Some(state) = stream.next().await {
            if matches!(state, ResolutionState::Extracting(_)) {
                break;
            }
        }
        // Let the provider start producing links
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(stream);

        tokio::time::timeout(Duration::from_secs(1), async {
            while !a.stream_closed() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(resolver.cache().is_empty());
        assert_eq!(resolver.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all_terminates_subscribers() {
        let a = Arc::new(ScriptedProvider::with_links("a", vec![stream_link()]).hanging());
        let resolver = resolver(&[a]);

        let stream = resolver.resolve(ResolveRequest::new(movie()));
        resolver.cancel_all();

        let report = tokio::time::timeout(Duration::from_secs(1), stream.collect_final())
            .await
            .unwrap();
        assert_eq!(
            report.final_state(),
            Some(&ResolutionState::Error("Resolution cancelled".to_string()))
        );
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_episode_identity_separates_cache() {
        let a = Arc::new(ScriptedProvider::with_links("a", vec![stream_link()]));
        let resolver = resolver(&[a.clone()]);
        let show = Film::tv_show("show-1", "Severance");

        for episode in ["e1", "e2"] {
            resolver
                .resolve(ResolveRequest::new(show.clone()).with_episode(Episode::new(episode, 1, 1)))
                .collect_final()
                .await;
        }

        assert_eq!(a.id_calls(), 2);
        assert_eq!(resolver.cache().len(), 2);
        assert_eq!(resolver.invalidate("show-1", Some("e1")), 1);
    }
}
