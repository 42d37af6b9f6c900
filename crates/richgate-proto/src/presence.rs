//! Typed presence payloads.
//!
//! These are sent as the `d` field of a presence update and are embedded in
//! the identify payload so a fresh session starts with the last presence.

use serde::{Deserialize, Serialize};

/// Asset hosts that the gateway accepts in the short `mp:` form.
const MEDIA_PROXY_PREFIXES: [&str; 4] = [
    "https://cdn.discordapp.com/",
    "http://cdn.discordapp.com/",
    "https://media.discordapp.net/",
    "http://media.discordapp.net/",
];

/// Wire value of the `type` field on a link button.
const LINK_BUTTON_TYPE: &str = "2";

/// Online status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Online.
    #[default]
    Online,
    /// Idle.
    Idle,
    /// Do not disturb.
    Dnd,
    /// Invisible.
    Invisible,
    /// Offline.
    Offline,
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "idle" => Ok(Self::Idle),
            "dnd" => Ok(Self::Dnd),
            "invisible" => Ok(Self::Invisible),
            "offline" => Ok(Self::Offline),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// Activity type, serialized as its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ActivityKind {
    /// "Playing {name}".
    #[default]
    Playing = 0,
    /// "Streaming {details}".
    Streaming = 1,
    /// "Listening to {name}".
    Listening = 2,
    /// "Watching {name}".
    Watching = 3,
    /// Custom status.
    Custom = 4,
    /// "Competing in {name}".
    Competing = 5,
}

impl From<ActivityKind> for u8 {
    fn from(kind: ActivityKind) -> Self {
        kind as u8
    }
}

impl TryFrom<u8> for ActivityKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Playing),
            1 => Ok(Self::Streaming),
            2 => Ok(Self::Listening),
            3 => Ok(Self::Watching),
            4 => Ok(Self::Custom),
            5 => Ok(Self::Competing),
            other => Err(format!("unknown activity type: {other}")),
        }
    }
}

/// Unix timestamps bounding an activity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timestamps {
    /// Start, in seconds or milliseconds as the caller chooses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<u64>,
    /// End.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
}

/// Images and hover texts of an activity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Assets {
    /// Large image key or URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_image: Option<String>,
    /// Hover text of the large image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_text: Option<String>,
    /// Small image key or URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_image: Option<String>,
    /// Hover text of the small image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_text: Option<String>,
}

/// Link button shown under an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    /// Button label.
    pub label: String,
    /// Target URL.
    pub url: String,
    /// Button type; always `"2"` once shaped.
    #[serde(rename = "type", default = "link_button_type")]
    pub kind: String,
}

fn link_button_type() -> String {
    LINK_BUTTON_TYPE.to_string()
}

impl Button {
    /// Create a link button.
    #[must_use]
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
            kind: link_button_type(),
        }
    }
}

/// A single activity entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Activity {
    /// Activity name.
    pub name: String,
    /// Activity type.
    #[serde(rename = "type", default)]
    pub kind: ActivityKind,
    /// Application that owns the activity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    /// First line of detail text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Second line of detail text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Stream URL, for streaming activities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Start and end time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Timestamps>,
    /// Images.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets: Option<Assets>,
    /// Link buttons.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Button>,
}

impl Activity {
    /// Create an activity with a name and type.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ActivityKind) -> Self {
        Self {
            name: name.into(),
            kind,
            ..Self::default()
        }
    }

    /// Set the details line.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Set the state line.
    #[must_use]
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Set the assets.
    #[must_use]
    pub fn with_assets(mut self, assets: Assets) -> Self {
        self.assets = Some(assets);
        self
    }

    /// Set the start timestamp.
    #[must_use]
    pub fn with_start(mut self, start: u64) -> Self {
        self.timestamps.get_or_insert_with(Timestamps::default).start = Some(start);
        self
    }

    /// Add a link button.
    #[must_use]
    pub fn with_button(mut self, button: Button) -> Self {
        self.buttons.push(button);
        self
    }
}

/// Presence sent with a presence update.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Presence {
    /// Unix time in milliseconds since the client went idle.
    #[serde(default)]
    pub since: Option<u64>,
    /// Activities, in display order.
    #[serde(default)]
    pub activities: Vec<Activity>,
    /// Online status.
    #[serde(default)]
    pub status: Status,
    /// Whether the client is away from keyboard.
    #[serde(default)]
    pub afk: bool,
}

impl Presence {
    /// Create a presence with the given status and no activities.
    #[must_use]
    pub fn new(status: Status) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Append an activity.
    #[must_use]
    pub fn with_activity(mut self, activity: Activity) -> Self {
        self.activities.push(activity);
        self
    }

    /// Fill in `application_id` on activities that have none.
    #[must_use]
    pub fn with_application_id(mut self, application_id: &str) -> Self {
        for activity in &mut self.activities {
            if activity.application_id.is_none() {
                activity.application_id = Some(application_id.to_string());
            }
        }
        self
    }

    /// Rewrite asset URLs into media proxy form and normalize buttons.
    #[must_use]
    pub fn shaped(mut self) -> Self {
        for activity in &mut self.activities {
            if let Some(assets) = activity.assets.as_mut() {
                for image in [&mut assets.large_image, &mut assets.small_image]
                    .into_iter()
                    .flatten()
                {
                    *image = rewrite_asset_url(image);
                }
            }
            for button in &mut activity.buttons {
                button.kind = link_button_type();
            }
        }
        self
    }
}

/// Rewrite a CDN or media proxy URL into the `mp:` asset form.
///
/// URLs on other hosts and plain asset keys are returned unchanged.
#[must_use]
pub fn rewrite_asset_url(url: &str) -> String {
    MEDIA_PROXY_PREFIXES
        .iter()
        .find_map(|prefix| url.strip_prefix(prefix))
        .map_or_else(|| url.to_string(), |rest| format!("mp:{rest}"))
}
