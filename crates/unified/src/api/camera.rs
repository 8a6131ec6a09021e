use serde::{Deserialize, Serialize};

/// Camera / doorbell entities. Snapshot and stream URLs are kept as opaque
/// strings; fetching them is the owning adapter's business.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CameraDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
    #[serde(default)]
    pub recording: bool,
    #[serde(default)]
    pub motion_detected: bool,
}
