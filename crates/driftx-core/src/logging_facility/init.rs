//! Global subscriber setup.

use serde::Deserialize;
use std::sync::Once;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Environment variable overriding a profile's default filter
pub const LOG_ENV: &str = "DRIFTX_LOG";

/// Output flavour selected by `logging.profile` in the engine config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Pretty output, `driftx=debug`
    #[default]
    Development,
    /// JSON lines, `driftx=info`
    Production,
    /// No output; tests install `init_test_capture()` instead
    Test,
}

impl Profile {
    pub fn default_directive(self) -> &'static str {
        match self {
            Profile::Development => "driftx=debug",
            Profile::Production => "driftx=info",
            Profile::Test => "off",
        }
    }

    fn filter(self) -> EnvFilter {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(self.default_directive()))
    }
}

static INIT: Once = Once::new();

/// Install the global subscriber for `profile`.
///
/// Only the first call in a process has any effect. A subscriber installed
/// elsewhere beforehand is left in place.
pub fn init(profile: Profile) {
    INIT.call_once(|| {
        let installed = match profile {
            Profile::Development => tracing_subscriber::fmt()
                .with_env_filter(profile.filter())
                .try_init()
                .is_ok(),
            Profile::Production => tracing_subscriber::fmt()
                .json()
                .with_env_filter(profile.filter())
                .try_init()
                .is_ok(),
            Profile::Test => tracing_subscriber::registry().try_init().is_ok(),
        };
        if !installed {
            tracing::debug!(?profile, "global subscriber already set; keeping it");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        init(Profile::Test);
        init(Profile::Production);
    }

    #[test]
    fn test_profiles_deserialize_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            profile: Profile,
        }
        let parsed: Wrapper = serde_json::from_str(r#"{"profile": "production"}"#).unwrap();
        assert_eq!(parsed.profile, Profile::Production);
        assert_eq!(Profile::default().default_directive(), "driftx=debug");
    }
}
