//! Camera brands and their RTSP URL templates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of supported camera brands.
///
/// Serialized as its display label. Unrecognized labels deserialize to
/// `Unknown`, which streams with the Generic template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CameraBrand {
    #[default]
    Generic,
    Hikvision,
    Dahua,
    Axis,
    TpLink,
    Reolink,
    Amcrest,
    Ezviz,
    Unknown,
}

impl CameraBrand {
    pub const ALL: [CameraBrand; 9] = [
        CameraBrand::Generic,
        CameraBrand::Hikvision,
        CameraBrand::Dahua,
        CameraBrand::Axis,
        CameraBrand::TpLink,
        CameraBrand::Reolink,
        CameraBrand::Amcrest,
        CameraBrand::Ezviz,
        CameraBrand::Unknown,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            CameraBrand::Generic => "Generic",
            CameraBrand::Hikvision => "Hikvision",
            CameraBrand::Dahua => "Dahua",
            CameraBrand::Axis => "Axis",
            CameraBrand::TpLink => "TP-Link",
            CameraBrand::Reolink => "Reolink",
            CameraBrand::Amcrest => "Amcrest",
            CameraBrand::Ezviz => "Ezviz",
            CameraBrand::Unknown => "Unknown",
        }
    }

    /// Parse a brand label, ignoring case, spaces, dashes and underscores.
    /// An empty label is `Generic`; anything unrecognized is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        let key: String = label
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .flat_map(char::to_lowercase)
            .collect();

        match key.as_str() {
            "" | "generic" | "genericrtsp" => CameraBrand::Generic,
            "hikvision" | "hik" => CameraBrand::Hikvision,
            "dahua" | "dahuanvr" => CameraBrand::Dahua,
            "axis" => CameraBrand::Axis,
            "tplink" | "tapo" => CameraBrand::TpLink,
            "reolink" => CameraBrand::Reolink,
            "amcrest" => CameraBrand::Amcrest,
            "ezviz" => CameraBrand::Ezviz,
            _ => CameraBrand::Unknown,
        }
    }

    /// Build the stream URL for this brand.
    ///
    /// Inputs are substituted verbatim, without percent-encoding. Reolink
    /// always uses port 554.
    pub fn rtsp_url(
        &self,
        username: &str,
        password: &str,
        ip: &str,
        port: u16,
        channel: u32,
    ) -> String {
        let base = format!("rtsp://{}:{}@{}:{}", username, password, ip, port);
        match self {
            CameraBrand::Generic | CameraBrand::Unknown => format!("{}/live", base),
            CameraBrand::Hikvision => format!("{}/Streaming/Channels/{}", base, channel),
            CameraBrand::Dahua | CameraBrand::Amcrest => {
                format!("{}/cam/realmonitor?channel={}&subtype=0", base, channel)
            }
            CameraBrand::Axis => format!("{}/axis-media/media.amp", base),
            CameraBrand::TpLink => format!("{}/stream1", base),
            CameraBrand::Reolink => format!(
                "rtsp://{}:{}@{}:554/h264Preview_01_main",
                username, password, ip
            ),
            CameraBrand::Ezviz => format!("{}/h264_stream", base),
        }
    }
}

impl fmt::Display for CameraBrand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<String> for CameraBrand {
    fn from(label: String) -> Self {
        CameraBrand::from_label(&label)
    }
}

impl From<CameraBrand> for String {
    fn from(brand: CameraBrand) -> Self {
        brand.label().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(brand: CameraBrand) -> String {
        brand.rtsp_url("admin", "x", "10.0.0.5", 8000, 2)
    }

    #[test]
    fn test_every_template() {
        assert_eq!(url(CameraBrand::Generic), "rtsp://admin:x@10.0.0.5:8000/live");
        assert_eq!(
            url(CameraBrand::Hikvision),
            "rtsp://admin:x@10.0.0.5:8000/Streaming/Channels/2"
        );
        assert_eq!(
            url(CameraBrand::Dahua),
            "rtsp://admin:x@10.0.0.5:8000/cam/realmonitor?channel=2&subtype=0"
        );
        assert_eq!(
            url(CameraBrand::Amcrest),
            "rtsp://admin:x@10.0.0.5:8000/cam/realmonitor?channel=2&subtype=0"
        );
        assert_eq!(
            url(CameraBrand::Axis),
            "rtsp://admin:x@10.0.0.5:8000/axis-media/media.amp"
        );
        assert_eq!(url(CameraBrand::TpLink), "rtsp://admin:x@10.0.0.5:8000/stream1");
        assert_eq!(
            url(CameraBrand::Reolink),
            "rtsp://admin:x@10.0.0.5:554/h264Preview_01_main"
        );
        assert_eq!(url(CameraBrand::Ezviz), "rtsp://admin:x@10.0.0.5:8000/h264_stream");
        assert_eq!(url(CameraBrand::Unknown), url(CameraBrand::Generic));
    }

    #[test]
    fn test_credentials_are_not_encoded() {
        let url = CameraBrand::Generic.rtsp_url("op", "p@ss:w/rd", "cam.local", 554, 1);
        assert_eq!(url, "rtsp://op:p@ss:w/rd@cam.local:554/live");
    }

    #[test]
    fn test_label_round_trip_and_aliases() {
        for brand in CameraBrand::ALL {
            assert_eq!(CameraBrand::from_label(brand.label()), brand);
        }
        assert_eq!(CameraBrand::from_label("tp-link"), CameraBrand::TpLink);
        assert_eq!(CameraBrand::from_label("TPLINK"), CameraBrand::TpLink);
        assert_eq!(CameraBrand::from_label("Dahua NVR"), CameraBrand::Dahua);
        assert_eq!(CameraBrand::from_label("Generic RTSP"), CameraBrand::Generic);
        assert_eq!(CameraBrand::from_label(""), CameraBrand::Generic);
        assert_eq!(CameraBrand::from_label("Vivotek"), CameraBrand::Unknown);
    }

    #[test]
    fn test_serde_uses_labels() {
        assert_eq!(
            serde_json::to_string(&CameraBrand::TpLink).unwrap(),
            "\"TP-Link\""
        );
        let brand: CameraBrand = serde_json::from_str("\"hikvision\"").unwrap();
        assert_eq!(brand, CameraBrand::Hikvision);
        let unknown: CameraBrand = serde_json::from_str("\"Foscam\"").unwrap();
        assert_eq!(unknown, CameraBrand::Unknown);
    }
}
