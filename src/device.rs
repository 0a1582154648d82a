//! Device and environment context capture.
//!
//! A [`DeviceSnapshot`] records static facts about the environment the
//! collector runs in. It is captured once per collector instance and stamped
//! onto every event; facts the host knows better than the library (user
//! agent, screen resolution, browser identity) are supplied as overrides.

use serde::{Deserialize, Serialize};

/// Static per-instance environment facts attached to events.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceSnapshot {
    /// User agent string supplied by the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// Operating system family (linux, macos, windows, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    /// Full OS name and version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,

    /// Browser name supplied by the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,

    /// Browser version supplied by the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_version: Option<String>,

    /// Screen resolution, e.g. `1920x1080`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_resolution: Option<String>,

    /// Locale, e.g. `en_US.UTF-8`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    /// Timezone identifier, e.g. `Europe/Berlin`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl DeviceSnapshot {
    /// Captures environment facts from the running system.
    ///
    /// Fields the library cannot observe (user agent, browser, resolution)
    /// are left unset for the host to fill via the `with_*` builders.
    pub fn capture() -> Self {
        Self {
            user_agent: None,
            platform: Some(std::env::consts::OS.to_string()),
            os_version: sysinfo::System::long_os_version(),
            browser: None,
            browser_version: None,
            screen_resolution: None,
            locale: std::env::var("LANG").ok(),
            timezone: std::env::var("TZ").ok(),
        }
    }

    /// Sets the user agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Sets browser name and version.
    pub fn with_browser(
        mut self,
        browser: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        self.browser = Some(browser.into());
        self.browser_version = Some(version.into());
        self
    }

    /// Sets the screen resolution.
    pub fn with_screen_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.screen_resolution = Some(resolution.into());
        self
    }

    /// Sets the locale.
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Sets the timezone.
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }
}
