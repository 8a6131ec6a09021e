use serde::{Deserialize, Serialize};

/// Type-refined fields for lights.
///
/// Brightness is a percentage in [0, 100]; color temperature is in mirek,
/// matching what most upstreams report natively.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct LightDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rgb_color: Option<[u8; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_temp: Option<u32>,
}

impl LightDetail {
    #[must_use]
    pub const fn with_brightness(mut self, brightness: f64) -> Self {
        self.brightness = Some(brightness);
        self
    }

    #[must_use]
    pub const fn with_rgb(mut self, rgb: [u8; 3]) -> Self {
        self.rgb_color = Some(rgb);
        self
    }

    #[must_use]
    pub const fn with_color_temp(mut self, mirek: u32) -> Self {
        self.color_temp = Some(mirek);
        self
    }
}
