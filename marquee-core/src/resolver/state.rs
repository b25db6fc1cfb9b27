//! Progress states of a media link resolution.

use std::fmt;

use serde::Serialize;

/// Progress of a resolution, each carrying a display message.
///
/// [`ResolutionState::rank`] orders the variants for UI transitions only;
/// control flow matches on variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "camelCase")]
pub enum ResolutionState {
    Idle,
    Fetching(String),
    Extracting(String),
    Error(String),
    Unavailable(String),
    Success(String),
    SuccessWithTrustedProviders(String),
}

impl ResolutionState {
    pub fn fetching(provider_name: &str) -> Self {
        ResolutionState::Fetching(format!("Fetching data from {provider_name}..."))
    }

    pub fn extracting(provider_name: &str) -> Self {
        ResolutionState::Extracting(format!("Extracting links from {provider_name}..."))
    }

    pub fn success(provider_name: &str) -> Self {
        ResolutionState::Success(format!("Links loaded from {provider_name}"))
    }

    pub fn success_with_trusted(provider_name: &str) -> Self {
        ResolutionState::SuccessWithTrustedProviders(format!(
            "Links loaded from {provider_name}, including trusted sources"
        ))
    }

    /// Ordinal used to pick UI transition direction.
    pub fn rank(&self) -> u8 {
        match self {
            ResolutionState::Idle => 0,
            ResolutionState::Fetching(_) => 1,
            ResolutionState::Extracting(_) => 2,
            ResolutionState::Error(_) => 3,
            ResolutionState::Unavailable(_) => 4,
            ResolutionState::Success(_) => 5,
            ResolutionState::SuccessWithTrustedProviders(_) => 6,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ResolutionState::Idle => "",
            ResolutionState::Fetching(message)
            | ResolutionState::Extracting(message)
            | ResolutionState::Error(message)
            | ResolutionState::Unavailable(message)
            | ResolutionState::Success(message)
            | ResolutionState::SuccessWithTrustedProviders(message) => message,
        }
    }

    /// Whether no further state follows.
    pub fn is_terminal(&self) -> bool {
        self.rank() >= 3
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ResolutionState::Success(_) | ResolutionState::SuccessWithTrustedProviders(_)
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ResolutionState::Error(_) | ResolutionState::Unavailable(_)
        )
    }
}

impl fmt::Display for ResolutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResolutionState::Idle => "idle",
            ResolutionState::Fetching(_) => "fetching",
            ResolutionState::Extracting(_) => "extracting",
            ResolutionState::Error(_) => "error",
            ResolutionState::Unavailable(_) => "unavailable",
            ResolutionState::Success(_) => "success",
            ResolutionState::SuccessWithTrustedProviders(_) => "success (trusted)",
        };

        if self.message().is_empty() {
            write!(f, "{label}")
        } else {
            write!(f, "{label}: {}", self.message())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_ordering() {
        let states = [
            ResolutionState::Idle,
            ResolutionState::fetching("A"),
            ResolutionState::extracting("A"),
            ResolutionState::Error("boom".to_string()),
            ResolutionState::Unavailable("none".to_string()),
            ResolutionState::success("A"),
            ResolutionState::success_with_trusted("A"),
        ];

        for (expected, state) in states.iter().enumerate() {
            assert_eq!(state.rank() as usize, expected);
        }
    }

    #[test]
    fn test_terminal_classification() {
        assert!(!ResolutionState::Idle.is_terminal());
        assert!(!ResolutionState::extracting("A").is_terminal());
        assert!(ResolutionState::Unavailable(String::new()).is_terminal());
        assert!(ResolutionState::Error(String::new()).is_error());
        assert!(ResolutionState::success_with_trusted("A").is_success());
        assert!(!ResolutionState::Error(String::new()).is_success());
    }

    #[test]
    fn test_display_includes_message() {
        assert_eq!(
            ResolutionState::fetching("Flixhq").to_string(),
            "fetching: Fetching data from Flixhq..."
        );
        assert_eq!(ResolutionState::Idle.to_string(), "idle");
    }
}
