use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Desktop,
    Tablet,
    Mobile,
}

impl DeviceKind {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceKind::Desktop => "desktop",
            DeviceKind::Tablet => "tablet",
            DeviceKind::Mobile => "mobile",
        }
    }

    /// Name of the output sub-directory holding this device's images.
    pub fn dir_name(&self) -> &'static str {
        match self {
            DeviceKind::Desktop => "Desktop",
            DeviceKind::Tablet => "Tablet",
            DeviceKind::Mobile => "Mobile",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub is_mobile: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    pub kind: DeviceKind,
    pub user_agent: &'static str,
    pub viewport: Viewport,
}

const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const TABLET_UA: &str = "Mozilla/5.0 (iPad; CPU OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1";
const MOBILE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1";

// capture order
static CATALOG: [DeviceProfile; 3] = [
    DeviceProfile {
        kind: DeviceKind::Desktop,
        user_agent: DESKTOP_UA,
        viewport: Viewport {
            width: 1920,
            height: 1080,
            is_mobile: false,
        },
    },
    DeviceProfile {
        kind: DeviceKind::Tablet,
        user_agent: TABLET_UA,
        viewport: Viewport {
            width: 768,
            height: 1024,
            is_mobile: true,
        },
    },
    DeviceProfile {
        kind: DeviceKind::Mobile,
        user_agent: MOBILE_UA,
        viewport: Viewport {
            width: 390,
            height: 844,
            is_mobile: true,
        },
    },
];

pub fn catalog() -> &'static [DeviceProfile] {
    &CATALOG
}
