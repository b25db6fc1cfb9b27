//! CLI command implementations

use std::sync::Arc;

use clap::Subcommand;
use futures::StreamExt;
use marquee_core::config::MarqueeConfig;
use marquee_core::provider::{JsonFileStore, ProviderManager, ProviderRegistry};
use marquee_core::{
    Episode, Film, HttpTransport, LinkKind, MediaLinkResolver, Repository, ResolveRequest, Result,
};

use crate::demo;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Validate a provider repository link
    ParseRepo {
        /// Repository URL, e.g. https://github.com/owner/name
        url: String,
    },
    /// List providers published by a repository
    Manifest {
        /// Repository URL
        url: String,
    },
    /// Install a provider from a repository
    Install {
        /// Repository URL
        url: String,
        /// Provider id from the repository manifest
        id: String,
    },
    /// Remove an installed provider
    Uninstall {
        /// Provider id
        id: String,
    },
    /// Install the newest version of an installed provider
    Update {
        /// Provider id
        id: String,
    },
    /// List installed providers in priority order
    List,
    /// Enable or disable the provider at a position
    Toggle {
        /// Zero-based position in the provider list
        index: usize,
    },
    /// Exchange the priority of two providers
    Swap {
        /// Zero-based position of the first provider
        from: usize,
        /// Zero-based position of the second provider
        to: usize,
    },
    /// Show which installed providers have newer versions
    Outdated {
        /// Repository URL
        url: String,
    },
    /// Resolve links for a title using the built-in demo providers
    Resolve {
        /// Title to resolve
        title: String,
        /// Season number, for TV shows
        #[arg(long, requires = "episode")]
        season: Option<u32>,
        /// Episode number, for TV shows
        #[arg(long, requires = "season")]
        episode: Option<u32>,
        /// Only try this provider
        #[arg(long)]
        provider: Option<String>,
        /// Ignore previously cached links
        #[arg(long)]
        refresh: bool,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands, config: MarqueeConfig) -> Result<()> {
    match command {
        Commands::ParseRepo { url } => parse_repository(&url),
        Commands::Manifest { url } => show_manifest(&config, &url).await,
        Commands::Install { url, id } => install_provider(&config, &url, &id).await,
        Commands::Uninstall { id } => uninstall_provider(&config, &id).await,
        Commands::Update { id } => update_provider(&config, &id).await,
        Commands::List => list_providers(&config),
        Commands::Toggle { index } => toggle_provider(&config, index),
        Commands::Swap { from, to } => swap_providers(&config, from, to),
        Commands::Outdated { url } => show_outdated(&config, &url).await,
        Commands::Resolve {
            title,
            season,
            episode,
            provider,
            refresh,
        } => resolve_links(&config, title, season.zip(episode), provider, refresh).await,
    }
}

fn load_registry(config: &MarqueeConfig) -> Result<Arc<ProviderRegistry>> {
    let store = JsonFileStore::new(config.storage.registry_file());
    Ok(Arc::new(ProviderRegistry::load(Arc::new(store))?))
}

fn build_manager(config: &MarqueeConfig) -> Result<ProviderManager> {
    let transport = HttpTransport::new(&config.network)?;
    Ok(ProviderManager::new(
        Arc::new(transport),
        load_registry(config)?,
        config,
    ))
}

/// Validate and describe a repository link
///
/// # Errors
/// - `MarqueeError::Repository` - Link is not a supported repository URL
pub fn parse_repository(url: &str) -> Result<()> {
    let repository = Repository::parse(url)?;

    println!("Repository: {repository}");
    println!("  Host: {}", repository.host().domain());
    println!("  URL: {}", repository.url());
    println!("  Raw links: {}", repository.raw_link_template());
    Ok(())
}

/// Print the providers a repository publishes
///
/// # Errors
/// - `MarqueeError::Repository` - Invalid repository link
/// - `MarqueeError::Manifest` - Manifest unreachable or malformed
pub async fn show_manifest(config: &MarqueeConfig, url: &str) -> Result<()> {
    let repository = Repository::parse(url)?;
    let manager = build_manager(config)?;
    let manifest = manager.fetcher().fetch_manifest(&repository).await?;

    println!("Providers in {repository}");
    println!("{:-<60}", "");
    if manifest.is_empty() {
        println!("No providers published.");
    }
    for provider in manifest.providers() {
        println!(
            "{:<24} v{:<10} ({}) {:?}",
            provider.id, provider.version_name, provider.version_code, provider.status
        );
    }
    Ok(())
}

/// Install a provider and register it
///
/// # Errors
/// - `MarqueeError::Manifest` - Provider not published by the repository
/// - `MarqueeError::Install` - Download failed
pub async fn install_provider(config: &MarqueeConfig, url: &str, id: &str) -> Result<()> {
    let repository = Repository::parse(url)?;
    let manager = build_manager(config)?;

    let entry = manager.install(&repository, id).await?;

    println!("Installed {} v{}", entry.metadata.name, entry.metadata.version_name);
    if let Some(path) = &entry.bundle_path {
        println!("  Bundle: {}", path.display());
    }
    Ok(())
}

/// Remove an installed provider
///
/// # Errors
/// - `MarqueeError::Registry` - Provider not installed
pub async fn uninstall_provider(config: &MarqueeConfig, id: &str) -> Result<()> {
    let manager = build_manager(config)?;
    let entry = manager.uninstall(id).await?;

    println!("Uninstalled {}", entry.metadata.name);
    Ok(())
}

/// Update an installed provider
///
/// # Errors
/// - `MarqueeError::Registry` - Provider not installed
/// - `MarqueeError::Manifest` / `MarqueeError::Install` - Update failed
pub async fn update_provider(config: &MarqueeConfig, id: &str) -> Result<()> {
    let manager = build_manager(config)?;
    let before = manager
        .registry()
        .get(id)
        .map(|e| e.installed_version_code);

    let entry = manager.update(id).await?;

    if before == Some(entry.installed_version_code) {
        println!("{} is already up to date", entry.metadata.name);
    } else {
        println!("Updated {} to v{}", entry.metadata.name, entry.metadata.version_name);
    }
    Ok(())
}

/// List installed providers
///
/// # Errors
/// - `MarqueeError::Registry` - Preference file unreadable
pub fn list_providers(config: &MarqueeConfig) -> Result<()> {
    let registry = load_registry(config)?;

    println!("Installed Providers");
    println!("{:-<60}", "");

    if registry.is_empty() {
        println!("No providers installed yet.");
        println!("Use 'marquee install <repository-url> <id>' to add one.");
        return Ok(());
    }

    for (index, entry) in registry.entries().iter().enumerate() {
        let state = match (entry.is_enabled, entry.is_in_maintenance) {
            (false, _) => "disabled",
            (true, true) => "maintenance",
            (true, false) => "enabled",
        };
        println!(
            "{index:>3}. {:<24} v{:<10} {state}",
            entry.metadata.name, entry.metadata.version_name
        );
    }
    Ok(())
}

/// Flip a provider between enabled and disabled
///
/// # Errors
/// - `MarqueeError::Registry` - Index out of range or save failed
pub fn toggle_provider(config: &MarqueeConfig, index: usize) -> Result<()> {
    let registry = load_registry(config)?;
    let enabled = registry.toggle_usage(index)?;

    let name = registry.entries()[index].metadata.name.clone();
    println!("{name} is now {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}

/// Exchange two providers' priority
///
/// # Errors
/// - `MarqueeError::Registry` - Index out of range or save failed
pub fn swap_providers(config: &MarqueeConfig, from: usize, to: usize) -> Result<()> {
    let registry = load_registry(config)?;
    registry.swap(from, to)?;

    println!("Swapped positions {from} and {to}");
    list_providers(config)
}

/// Report installed providers with newer versions available
///
/// # Errors
/// - `MarqueeError::Manifest` - Manifest unreachable or malformed
pub async fn show_outdated(config: &MarqueeConfig, url: &str) -> Result<()> {
    let repository = Repository::parse(url)?;
    let manager = build_manager(config)?;
    let updates = manager.check_updates(&repository).await?;

    println!("Provider Status for {repository}");
    println!("{:-<60}", "");
    for update in &updates {
        let installed = update
            .installed_version
            .map_or_else(|| "-".to_string(), |v| v.to_string());
        println!(
            "{:<24} installed {:<8} remote {:<8} {}",
            update.provider_id, installed, update.remote_version, update.status
        );
    }
    Ok(())
}

/// Resolve links against the demo providers, printing progress
///
/// # Errors
/// - `MarqueeError::Registry` - Demo providers could not be registered
pub async fn resolve_links(
    config: &MarqueeConfig,
    title: String,
    episode: Option<(u32, u32)>,
    provider: Option<String>,
    refresh: bool,
) -> Result<()> {
    let registry = demo::demo_registry()?;
    let resolver = MediaLinkResolver::new(registry, &config.resolution);

    let film_id = demo::slug(&title);
    let mut request = match episode {
        Some((season, number)) => {
            ResolveRequest::new(Film::tv_show(film_id.clone(), title)).with_episode(Episode::new(
                format!("{film_id}-s{season}e{number}"),
                season,
                number,
            ))
        }
        None => ResolveRequest::new(Film::movie(film_id, title)),
    };
    if let Some(provider) = provider {
        request = request.with_preferred_provider(provider);
    }
    if refresh {
        request = request.refreshing();
    }

    let mut stream = resolver.resolve(request);
    while let Some(state) = stream.next().await {
        println!("[{}] {}", state.rank(), state);
    }

    let Some(outcome) = stream.outcome() else {
        return Ok(());
    };

    for failure in &outcome.failures {
        println!("  skipped {}: {}", failure.provider_name, failure.reason);
    }
    for link in &outcome.links {
        match &link.kind {
            LinkKind::Stream => {
                let trusted = link
                    .trusted_provider()
                    .map(|p| format!(" (trusted: {p})"))
                    .unwrap_or_default();
                println!("  stream   {:<12} {}{trusted}", link.name, link.url);
            }
            LinkKind::Subtitle { language, .. } => {
                println!("  subtitle {:<12} {} [{language}]", link.name, link.url);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repository_command() {
        assert!(parse_repository("https://github.com/owner/repo").is_ok());
        assert!(parse_repository("https://example.com/owner/repo").is_err());
    }

    #[tokio::test]
    async fn test_resolve_command_with_demo_providers() {
        let config = MarqueeConfig::for_testing();

        let result = resolve_links(&config, "Heat".to_string(), None, None, false).await;

        assert!(result.is_ok());
    }
}
