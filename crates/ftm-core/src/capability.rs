//! Client platform classification and notification delivery rules.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Markers that identify an iOS browser in a user agent string.
const IOS_MARKERS: [&str; 3] = ["iPhone", "iPod", "iPad"];

/// Shown instead of a permission prompt on platforms that cannot notify
/// until the app is installed to the home screen.
pub const INSTALL_GUIDANCE: &str = "To receive notifications on this device: \
open the share menu, choose \"Add to Home Screen\", \
then launch the timer from the new home screen icon.";

/// What the surrounding environment looks like to the notification layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientEnvironment {
    pub user_agent: String,
    /// Running as an installed app rather than a browser tab.
    pub standalone: bool,
}

impl ClientEnvironment {
    pub fn new(user_agent: impl Into<String>, standalone: bool) -> Self {
        Self {
            user_agent: user_agent.into(),
            standalone,
        }
    }

    pub fn is_ios(&self) -> bool {
        IOS_MARKERS.iter().any(|m| self.user_agent.contains(m))
    }
}

/// Platform classes with different notification abilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformCapability {
    /// Installed app: background delivery with actions.
    Standalone,

    /// Ordinary tab: in-page notifications only.
    #[default]
    BrowserTab,

    /// Mobile browser that refuses notifications outside an installed app.
    UnsupportedMobile,
}

impl PlatformCapability {
    /// Classifies an environment. Standalone wins over the iOS check.
    pub fn detect(env: &ClientEnvironment) -> Self {
        if env.standalone {
            Self::Standalone
        } else if env.is_ios() {
            Self::UnsupportedMobile
        } else {
            Self::BrowserTab
        }
    }

    /// Whether a permission prompt may be shown at all.
    pub fn can_request_permission(&self) -> bool {
        !matches!(self, Self::UnsupportedMobile)
    }

    /// Resolves the delivery mechanism for a permission outcome.
    pub fn delivery(&self, permission: NotificationPermission) -> DeliveryMechanism {
        match (self, permission) {
            (Self::UnsupportedMobile, _) => DeliveryMechanism::InstallGuidance,
            (_, NotificationPermission::Denied | NotificationPermission::Unsupported) => {
                DeliveryMechanism::Disabled
            }
            (Self::Standalone, NotificationPermission::Granted) => DeliveryMechanism::Background {
                actions: NotificationAction::defaults(),
            },
            (Self::BrowserTab, NotificationPermission::Granted) => DeliveryMechanism::InPage,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::BrowserTab => "browser_tab",
            Self::UnsupportedMobile => "unsupported_mobile",
        }
    }
}

impl fmt::Display for PlatformCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for PlatformCapability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standalone" => Ok(Self::Standalone),
            "browser_tab" => Ok(Self::BrowserTab),
            "unsupported_mobile" => Ok(Self::UnsupportedMobile),
            other => Err(format!("unknown platform capability: {other}")),
        }
    }
}

/// Outcome of asking for notification permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPermission {
    Granted,
    Denied,
    #[default]
    Unsupported,
}

/// A button attached to a background notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub id: String,
    pub title: String,
}

impl NotificationAction {
    pub const OPEN: &'static str = "open";
    pub const DISMISS: &'static str = "close";

    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }

    /// Open the app / dismiss.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(Self::OPEN, "Open app"),
            Self::new(Self::DISMISS, "Dismiss"),
        ]
    }
}

/// How alerts reach the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryMechanism {
    Background { actions: Vec<NotificationAction> },
    InPage,
    InstallGuidance,
    Disabled,
}

impl DeliveryMechanism {
    pub fn delivers(&self) -> bool {
        matches!(self, Self::Background { .. } | Self::InPage)
    }
}
