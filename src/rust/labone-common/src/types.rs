// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device_traits::DeviceTraits;

#[derive(Debug, Clone, Eq, PartialEq, Copy, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Mfli,
    Mfia,
    Uhfli,
    Uhfqa,
    Hdawg,
}

impl DeviceKind {
    /// Resolve the kind from the string under `/<dev>/features/devtype`.
    ///
    /// MF instruments report `MFLI` even when the impedance option is
    /// installed, so the option list decides between `Mfli` and `Mfia`.
    pub fn from_devtype(devtype: &str, options: &DeviceOptions) -> Option<Self> {
        let devtype = devtype.trim().to_uppercase();
        let kind = match devtype.as_str() {
            "MFLI" | "MFIA" if options.contains("IA") || devtype == "MFIA" => DeviceKind::Mfia,
            "MFLI" => DeviceKind::Mfli,
            "UHFLI" => DeviceKind::Uhfli,
            "UHFQA" => DeviceKind::Uhfqa,
            _ if devtype.starts_with("HDAWG") => DeviceKind::Hdawg,
            _ => return None,
        };
        Some(kind)
    }

    pub fn traits(&self) -> &'static DeviceTraits {
        DeviceTraits::from_device_kind(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Mfli => "MFLI",
            DeviceKind::Mfia => "MFIA",
            DeviceKind::Uhfli => "UHFLI",
            DeviceKind::Uhfqa => "UHFQA",
            DeviceKind::Hdawg => "HDAWG",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Installed options as reported under `/<dev>/features/options`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceOptions(Vec<String>);

impl DeviceOptions {
    /// Parse the newline separated option list.
    pub fn parse(raw: &str) -> Self {
        DeviceOptions(
            raw.split(['\n', ','])
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    pub fn contains(&self, option: &str) -> bool {
        let option = option.to_uppercase();
        self.0.iter().any(|o| *o == option)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_parse() {
        let options = DeviceOptions::parse("MD\nia\n\nPID\n");
        assert!(options.contains("IA"));
        assert!(options.contains("pid"));
        assert!(!options.contains("MF"));
        assert_eq!(options.iter().count(), 3);
    }

    #[test]
    fn test_kind_from_devtype() {
        let ia = DeviceOptions::parse("IA");
        let none = DeviceOptions::default();
        assert_eq!(DeviceKind::from_devtype("MFLI", &ia), Some(DeviceKind::Mfia));
        assert_eq!(DeviceKind::from_devtype("MFLI", &none), Some(DeviceKind::Mfli));
        assert_eq!(DeviceKind::from_devtype("mfia", &none), Some(DeviceKind::Mfia));
        assert_eq!(DeviceKind::from_devtype("HDAWG8", &none), Some(DeviceKind::Hdawg));
        assert_eq!(DeviceKind::from_devtype("uhfqa", &none), Some(DeviceKind::Uhfqa));
        assert_eq!(DeviceKind::from_devtype("SHFSG8", &none), None);
    }
}
