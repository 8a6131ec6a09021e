use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::UnifiedError;

/// Provenance of an entity: which class of upstream it was synced from.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A general home-automation platform (the richest source of entities)
    HomeAutomation,
    /// Camera / doorbell cloud service
    CameraCloud,
    /// Embedded smart-relay devices on the local network
    SmartRelay,
    /// Power-management daemon (UPS, smart PDU)
    PowerDaemon,
    /// Network-device inventory (routers, access points, clients)
    NetworkInventory,
    /// Composite entities created by the conflict resolver
    Virtual,
}

impl SourceKind {
    pub const ALL: [Self; 6] = [
        Self::HomeAutomation,
        Self::CameraCloud,
        Self::SmartRelay,
        Self::PowerDaemon,
        Self::NetworkInventory,
        Self::Virtual,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HomeAutomation => "home_automation",
            Self::CameraCloud => "camera_cloud",
            Self::SmartRelay => "smart_relay",
            Self::PowerDaemon => "power_daemon",
            Self::NetworkInventory => "network_inventory",
            Self::Virtual => "virtual",
        }
    }
}

impl Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = UnifiedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "home_automation" => Ok(Self::HomeAutomation),
            "camera_cloud" => Ok(Self::CameraCloud),
            "smart_relay" => Ok(Self::SmartRelay),
            "power_daemon" => Ok(Self::PowerDaemon),
            "network_inventory" => Ok(Self::NetworkInventory),
            "virtual" => Ok(Self::Virtual),
            other => Err(UnifiedError::UnknownSourceKind(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SourceKind;

    #[test]
    fn roundtrip_all_kinds() {
        for kind in SourceKind::ALL {
            assert_eq!(kind.as_str().parse::<SourceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_rejected() {
        assert!("warp_core".parse::<SourceKind>().is_err());
    }
}
