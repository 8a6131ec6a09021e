mod camera;
mod climate;
mod light;
mod media_player;
mod room;
mod sensor;
mod stubs;

pub use camera::CameraDetail;
pub use climate::{ClimateDetail, HvacMode};
pub use light::LightDetail;
pub use media_player::{MediaPlayerDetail, PlaybackState};
pub use room::{Area, Room};
pub use sensor::{BinarySensorDetail, SensorDetail};
pub use stubs::{CoverDetail, DeviceDetail, FanDetail, GenericDetail, LockDetail, SwitchDetail};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{UnifiedError, UnifiedResult};
use crate::source::SourceKind;

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Light,
    Switch,
    Sensor,
    Climate,
    Cover,
    Camera,
    Lock,
    Fan,
    MediaPlayer,
    BinarySensor,
    Device,
    Generic,
}

impl Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Light => "light",
            Self::Switch => "switch",
            Self::Sensor => "sensor",
            Self::Climate => "climate",
            Self::Cover => "cover",
            Self::Camera => "camera",
            Self::Lock => "lock",
            Self::Fan => "fan",
            Self::MediaPlayer => "media_player",
            Self::BinarySensor => "binary_sensor",
            Self::Device => "device",
            Self::Generic => "generic",
        };
        f.write_str(name)
    }
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    On,
    Off,
    Open,
    Closed,
    Locked,
    Unlocked,
    Idle,
    Active,
    Unavailable,
    Unknown,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Dimmable,
    Colorable,
    Temperature,
    Humidity,
    Position,
    Volume,
    Brightness,
    Motion,
    Recording,
    Streaming,
    Notification,
    Battery,
    Connectivity,
}

/// Provenance and bookkeeping attached to every unified entity.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EntityMetadata {
    pub source: SourceKind,
    pub source_entity_id: String,
    pub last_synced: DateTime<Utc>,
    pub quality_score: f64,
    #[serde(default)]
    pub is_virtual: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub virtual_sources: Vec<SourceKind>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source_data: BTreeMap<String, Value>,
}

impl EntityMetadata {
    #[must_use]
    pub fn new(source: SourceKind, source_entity_id: impl Into<String>) -> Self {
        Self {
            source,
            source_entity_id: source_entity_id.into(),
            last_synced: Utc::now(),
            quality_score: 1.0,
            is_virtual: false,
            virtual_sources: Vec::new(),
            source_data: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_quality(mut self, score: f64) -> Self {
        self.quality_score = score.clamp(0.0, 1.0);
        self
    }
}

/// Type-refined payload of an entity. The `type` tag doubles as the
/// polymorphic discriminator for cache round-trips.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityDetail {
    Light(LightDetail),
    Switch(SwitchDetail),
    Sensor(SensorDetail),
    Climate(ClimateDetail),
    Cover(CoverDetail),
    Camera(CameraDetail),
    Lock(LockDetail),
    Fan(FanDetail),
    MediaPlayer(MediaPlayerDetail),
    BinarySensor(BinarySensorDetail),
    Device(DeviceDetail),
    Generic(GenericDetail),
}

impl EntityDetail {
    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        match self {
            Self::Light(_) => EntityType::Light,
            Self::Switch(_) => EntityType::Switch,
            Self::Sensor(_) => EntityType::Sensor,
            Self::Climate(_) => EntityType::Climate,
            Self::Cover(_) => EntityType::Cover,
            Self::Camera(_) => EntityType::Camera,
            Self::Lock(_) => EntityType::Lock,
            Self::Fan(_) => EntityType::Fan,
            Self::MediaPlayer(_) => EntityType::MediaPlayer,
            Self::BinarySensor(_) => EntityType::BinarySensor,
            Self::Device(_) => EntityType::Device,
            Self::Generic(_) => EntityType::Generic,
        }
    }
}

/// The unit of addressing: one device, sensor or composite as seen by the
/// unified layer, regardless of which upstream it came from.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub id: String,
    pub friendly_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub state: EntityState,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub capabilities: BTreeSet<Capability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub metadata: EntityMetadata,
    pub available: bool,
    pub last_updated: DateTime<Utc>,
    #[serde(flatten)]
    pub detail: EntityDetail,
}

impl Entity {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        friendly_name: impl Into<String>,
        state: EntityState,
        detail: EntityDetail,
        metadata: EntityMetadata,
    ) -> Self {
        Self {
            id: id.into(),
            friendly_name: friendly_name.into(),
            icon: None,
            state,
            attributes: BTreeMap::new(),
            capabilities: BTreeSet::new(),
            room_id: None,
            area_id: None,
            device_id: None,
            metadata,
            available: true,
            last_updated: Utc::now(),
            detail,
        }
    }

    #[must_use]
    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    #[must_use]
    pub fn with_capabilities(mut self, caps: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(caps);
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        self.detail.entity_type()
    }

    #[must_use]
    pub const fn source(&self) -> SourceKind {
        self.metadata.source
    }

    /// Unified action names this entity accepts, derived from its type.
    #[must_use]
    pub const fn available_actions(&self) -> &'static [&'static str] {
        match self.entity_type() {
            EntityType::Light => &[
                "turn_on",
                "turn_off",
                "toggle",
                "set_brightness",
                "set_color",
                "set_color_temp",
            ],
            EntityType::Switch => &["turn_on", "turn_off", "toggle"],
            EntityType::Climate => &["set_temperature", "set_hvac_mode"],
            EntityType::Cover => &["open", "close", "stop", "set_position"],
            EntityType::Camera => &["snapshot", "enable_recording", "disable_recording"],
            EntityType::Lock => &["lock", "unlock"],
            EntityType::Fan => &["turn_on", "turn_off", "set_speed", "oscillate"],
            EntityType::MediaPlayer => &["play", "pause", "stop", "set_volume", "mute"],
            EntityType::Sensor
            | EntityType::BinarySensor
            | EntityType::Device
            | EntityType::Generic => &[],
        }
    }

    #[must_use]
    pub fn supports_action(&self, name: &str) -> bool {
        self.available_actions().contains(&name)
    }

    /// Check the structural invariants every entity must satisfy before it
    /// enters a registry.
    pub fn validate(&self) -> UnifiedResult<()> {
        if !(0.0..=1.0).contains(&self.metadata.quality_score) {
            return Err(UnifiedError::InvalidQualityScore(
                self.metadata.quality_score,
            ));
        }
        if self.metadata.is_virtual && self.metadata.virtual_sources.is_empty() {
            return Err(UnifiedError::NoEntitiesProvided);
        }
        Ok(())
    }
}
