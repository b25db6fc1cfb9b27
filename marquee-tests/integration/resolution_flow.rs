//! End-to-end resolution across registered providers.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use marquee_core::config::ResolutionConfig;
use marquee_core::test_fixtures::{ScriptedProvider, registry_with};
use marquee_core::{
    CacheKey, Episode, Film, Flag, MediaLink, MediaLinkResolver, ProviderError, ResolutionState,
    ResolveRequest,
};

fn resolver(providers: &[Arc<ScriptedProvider>]) -> MediaLinkResolver {
    MediaLinkResolver::new(registry_with(providers), &ResolutionConfig::default())
}

fn show() -> Film {
    Film::tv_show("show-7", "The Bear")
}

fn episode() -> Episode {
    Episode::new("show-7-s2e6", 2, 6)
}

fn trusted_stream() -> MediaLink {
    MediaLink::stream("4K", "https://cdn.example/bear/s2e6.m3u8").with_flag(Flag::trusted("Hulu"))
}

#[tokio::test]
async fn test_empty_provider_then_trusted_stream() {
    let a = Arc::new(ScriptedProvider::empty("a"));
    let b = Arc::new(ScriptedProvider::with_links("b", vec![trusted_stream()]));
    let resolver = resolver(&[a.clone(), b.clone()]);

    let report = resolver
        .resolve(ResolveRequest::new(show()).with_episode(episode()))
        .collect_final()
        .await;

    assert_eq!(
        report.final_state(),
        Some(&ResolutionState::success_with_trusted("b"))
    );
    let ranks: Vec<u8> = report.states.iter().map(ResolutionState::rank).collect();
    assert_eq!(ranks, [0, 1, 2, 1, 2, 6]);

    let cached = resolver
        .cache()
        .get(&CacheKey::new("b", "show-7", Some("show-7-s2e6")))
        .unwrap();
    assert_eq!(cached.links, vec![trusted_stream()]);
    assert!(
        resolver
            .cache()
            .get(&CacheKey::new("a", "show-7", Some("show-7-s2e6")))
            .is_none()
    );
}

#[tokio::test]
async fn test_kth_provider_success_attempts_all_before_it() {
    let failing: Vec<Arc<ScriptedProvider>> = (0..3)
        .map(|i| {
            Arc::new(ScriptedProvider::failing_id(
                &format!("p{i}"),
                ProviderError::Network {
                    reason: "connection refused".to_string(),
                },
            ))
        })
        .collect();
    let winner = Arc::new(ScriptedProvider::with_links("p3", vec![trusted_stream()]));
    let after = Arc::new(ScriptedProvider::with_links("p4", vec![trusted_stream()]));

    let mut providers = failing.clone();
    providers.push(winner.clone());
    providers.push(after.clone());
    let resolver = resolver(&providers);

    let report = resolver
        .resolve(ResolveRequest::new(show()).with_episode(episode()))
        .collect_final()
        .await;
    let outcome = report.outcome.unwrap();

    assert!(outcome.state.is_success());
    assert_eq!(outcome.provider_id.as_deref(), Some("p3"));
    assert_eq!(outcome.failures.len(), 3);
    for (i, provider) in failing.iter().enumerate() {
        assert_eq!(provider.id_calls(), 1);
        assert_eq!(outcome.failures[i].provider_id, format!("p{i}"));
        assert!(outcome.failures[i].reason.contains("connection refused"));
    }
    assert_eq!(winner.link_calls(), 1);
    assert_eq!(after.id_calls(), 0);
}

#[tokio::test]
async fn test_cached_key_never_calls_providers() {
    let a = Arc::new(ScriptedProvider::with_links("a", vec![trusted_stream()]));
    let resolver = resolver(&[a.clone()]);
    resolver
        .cache()
        .put(CacheKey::new("a", "show-7", Some("show-7-s2e6")), vec![trusted_stream()]);

    let report = resolver
        .resolve(ResolveRequest::new(show()).with_episode(episode()))
        .collect_final()
        .await;

    assert!(report.final_state().is_some_and(ResolutionState::is_success));
    assert_eq!(a.id_calls(), 0);
    assert_eq!(a.link_calls(), 0);
}

#[tokio::test]
async fn test_concurrent_resolves_share_one_pass() {
    let a = Arc::new(ScriptedProvider::empty("a").delayed(Duration::from_millis(30)));
    let b = Arc::new(
        ScriptedProvider::with_links("b", vec![trusted_stream()]).delayed(Duration::from_millis(30)),
    );
    let resolver = Arc::new(resolver(&[a.clone(), b.clone()]));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move {
                resolver
                    .resolve(ResolveRequest::new(show()).with_episode(episode()))
                    .collect_final()
                    .await
            })
        })
        .collect();

    for handle in handles {
        let report = handle.await.unwrap();
        assert!(report.final_state().is_some_and(ResolutionState::is_success));
    }

    assert_eq!(a.id_calls(), 1);
    assert_eq!(b.id_calls(), 1);
    assert_eq!(b.link_calls(), 1);
}

#[tokio::test]
async fn test_cancellation_closes_link_stream_without_caching() {
    let a = Arc::new(ScriptedProvider::with_links("a", vec![trusted_stream()]).hanging());
    let resolver = resolver(&[a.clone()]);

    let mut stream = resolver.resolve(ResolveRequest::new(show()).with_episode(episode()));
    while let Some(state) = stream.next().await {
        if matches!(state, ResolutionState::Extracting(_)) {
            break;
        }
    }
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

    // A later request starts a fresh pass instead of joining the cancelled one
    assert_eq!(resolver.in_flight(), 0);
    let again = resolver.resolve(ResolveRequest::new(show()).with_episode(episode()));
    assert_eq!(resolver.in_flight(), 1);
    drop(again);
    assert_eq!(resolver.in_flight(), 0);
}
