//! Built-in demo providers for the `resolve` command.
//!
//! Bundle loading is platform specific, so the CLI resolves against two
//! compiled-in providers: an archive that never carries anything and a
//! streaming catalog that answers every title with a trusted stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use marquee_core::provider::metadata::ProviderType;
use marquee_core::provider::{LinkStream, ProviderApi, ProviderRegistry, ProviderRegistryEntry};
use marquee_core::{
    Episode, Film, Flag, MediaLink, ProviderError, ProviderMetadata, RegistryError, SubtitleSource,
};

const LINK_DELAY: Duration = Duration::from_millis(150);

/// Lowercase, dash-separated identifier for a title.
pub fn slug(title: &str) -> String {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

/// Provider whose catalog is always empty.
struct EmptyArchive;

#[async_trait]
impl ProviderApi for EmptyArchive {
    async fn resolve_id(&self, film: &Film) -> Result<String, ProviderError> {
        tokio::time::sleep(LINK_DELAY).await;
        Err(ProviderError::NotFound {
            reason: format!("'{}' is not in the archive", film.title),
        })
    }

    fn links(&self, _id: &str, _film: &Film, _episode: Option<&Episode>) -> LinkStream {
        stream::empty().boxed()
    }
}

/// Provider answering every title with a trusted stream and a subtitle.
struct StreamingCatalog;

#[async_trait]
impl ProviderApi for StreamingCatalog {
    async fn resolve_id(&self, film: &Film) -> Result<String, ProviderError> {
        tokio::time::sleep(LINK_DELAY).await;
        Ok(slug(&film.title))
    }

    fn links(&self, id: &str, _film: &Film, episode: Option<&Episode>) -> LinkStream {
        let path = match episode {
            Some(episode) => format!("{id}/{}", episode.to_string().to_lowercase()),
            None => id.to_string(),
        };

        let links = vec![
            MediaLink::stream("1080p", format!("https://cdn.demo.invalid/{path}/master.m3u8"))
                .with_flag(Flag::Trusted {
                    provider_name: "Demo Streaming".to_string(),
                    rating: Some(4.5),
                    logo_url: None,
                }),
            MediaLink::subtitle(
                "English",
                format!("https://subs.demo.invalid/{path}/en.vtt"),
                "en",
                SubtitleSource::Online,
            ),
        ];

        stream::iter(links)
            .then(|link| async move {
                tokio::time::sleep(LINK_DELAY).await;
                Ok(link)
            })
            .boxed()
    }
}

fn metadata(id: &str, name: &str) -> ProviderMetadata {
    let mut metadata = ProviderMetadata::placeholder(name);
    metadata.id = id.to_string();
    metadata.version_name = "1.0.0".to_string();
    metadata.version_code = 1;
    metadata.provider_type = ProviderType::All;
    metadata
}

/// In-memory registry with the demo providers attached, archive first.
///
/// # Errors
/// - `RegistryError` - Registration failed
pub fn demo_registry() -> Result<Arc<ProviderRegistry>, RegistryError> {
    let registry = Arc::new(ProviderRegistry::in_memory());

    let providers: [(&str, &str, Arc<dyn ProviderApi>); 2] = [
        ("demo-archive", "Demo Archive", Arc::new(EmptyArchive)),
        ("demo-streaming", "Demo Streaming", Arc::new(StreamingCatalog)),
    ];

    for (id, name, provider) in providers {
        registry.add(ProviderRegistryEntry::new(metadata(id, name)))?;
        registry.attach(id, provider)?;
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use marquee_core::config::ResolutionConfig;
    use marquee_core::{MediaLinkResolver, ResolutionState, ResolveRequest};

    use super::*;

    #[test]
    fn test_slug() {
        assert_eq!(slug("The Grand Budapest Hotel"), "the-grand-budapest-hotel");
        assert_eq!(slug("  Alien: Romulus "), "alien-romulus");
    }

    #[tokio::test]
    async fn test_demo_resolution_falls_through_to_trusted_stream() {
        let resolver = MediaLinkResolver::new(demo_registry().unwrap(), &ResolutionConfig::default());

        let report = resolver
            .resolve(ResolveRequest::new(Film::movie("heat", "Heat")))
            .collect_final()
            .await;

        assert!(matches!(
            report.final_state(),
            Some(ResolutionState::SuccessWithTrustedProviders(_))
        ));
        let outcome = report.outcome.unwrap();
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.links.len(), 2);
    }
}
