//! Port to brand classification for discovered devices.

use crate::camera::CameraBrand;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Candidate ports in probe priority order.
pub const DEFAULT_PORTS: [u16; 4] = [8000, 34567, 37777, 554];

/// Brand inferred from the first open port of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceBrand {
    Hikvision,
    Dahua,
    #[serde(rename = "Dahua NVR")]
    DahuaNvr,
    #[serde(rename = "Generic RTSP")]
    GenericRtsp,
    Unknown,
}

const PORT_BRANDS: [(u16, DeviceBrand); 4] = [
    (8000, DeviceBrand::Hikvision),
    (34567, DeviceBrand::Dahua),
    (37777, DeviceBrand::DahuaNvr),
    (554, DeviceBrand::GenericRtsp),
];

impl DeviceBrand {
    /// Classify an open port. Ports outside the table are `Unknown`.
    pub fn from_port(port: u16) -> Self {
        PORT_BRANDS
            .iter()
            .find(|(p, _)| *p == port)
            .map(|(_, brand)| *brand)
            .unwrap_or(DeviceBrand::Unknown)
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeviceBrand::Hikvision => "Hikvision",
            DeviceBrand::Dahua => "Dahua",
            DeviceBrand::DahuaNvr => "Dahua NVR",
            DeviceBrand::GenericRtsp => "Generic RTSP",
            DeviceBrand::Unknown => "Unknown",
        }
    }

    /// Stream URL template family used when the device is confirmed as a camera.
    pub fn camera_brand(&self) -> CameraBrand {
        match self {
            DeviceBrand::Hikvision => CameraBrand::Hikvision,
            DeviceBrand::Dahua | DeviceBrand::DahuaNvr => CameraBrand::Dahua,
            DeviceBrand::GenericRtsp | DeviceBrand::Unknown => CameraBrand::Generic,
        }
    }
}

impl fmt::Display for DeviceBrand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_classification() {
        assert_eq!(DeviceBrand::from_port(8000), DeviceBrand::Hikvision);
        assert_eq!(DeviceBrand::from_port(34567), DeviceBrand::Dahua);
        assert_eq!(DeviceBrand::from_port(37777), DeviceBrand::DahuaNvr);
        assert_eq!(DeviceBrand::from_port(554), DeviceBrand::GenericRtsp);
        assert_eq!(DeviceBrand::from_port(80), DeviceBrand::Unknown);
    }

    #[test]
    fn test_labels_and_serde_names_agree() {
        for (_, brand) in PORT_BRANDS {
            let json = serde_json::to_string(&brand).unwrap();
            assert_eq!(json, format!("\"{}\"", brand.label()));
        }
    }

    #[test]
    fn test_camera_brand_mapping() {
        assert_eq!(DeviceBrand::DahuaNvr.camera_brand(), CameraBrand::Dahua);
        assert_eq!(DeviceBrand::GenericRtsp.camera_brand(), CameraBrand::Generic);
        assert_eq!(DeviceBrand::Unknown.camera_brand(), CameraBrand::Generic);
    }
}
