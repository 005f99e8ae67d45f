//! Media types carried by macOS VM image artifacts.

use std::fmt;

/// A supported artifact media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// The block-storage disk image.
    DiskImage,
    /// The auxiliary (nvram) image.
    AuxImage,
    /// The platform configuration payload. Internal use only.
    ConfigV1,
}

impl MediaType {
    /// Returns the wire form of the media type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DiskImage => "application/vnd.vzpod.disk.image.v1",
            Self::AuxImage => "application/vnd.vzpod.aux.image.v1",
            Self::ConfigV1 => "application/vnd.vzpod.config.v1+json",
        }
    }

    /// Returns the on-disk title for content of this media type.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::DiskImage => "disk.img",
            Self::AuxImage => "aux.img",
            Self::ConfigV1 => "config.json",
        }
    }

    /// Parses a wire media type into a known one.
    #[must_use]
    pub fn from_media_type(s: &str) -> Option<Self> {
        match s {
            "application/vnd.vzpod.disk.image.v1" => Some(Self::DiskImage),
            "application/vnd.vzpod.aux.image.v1" => Some(Self::AuxImage),
            "application/vnd.vzpod.config.v1+json" => Some(Self::ConfigV1),
            _ => None,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for MediaType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for MediaType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        Self::from_media_type(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unsupported media type: {s}")))
    }
}

/// Checks whether a wire media type is one the store accepts.
#[must_use]
pub fn is_media_type_supported(media_type: &str) -> bool {
    MediaType::from_media_type(media_type).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_titles() {
        assert_eq!(MediaType::DiskImage.title(), "disk.img");
        assert_eq!(MediaType::AuxImage.title(), "aux.img");
        assert_eq!(MediaType::ConfigV1.title(), "config.json");
    }

    #[test]
    fn test_round_trip() {
        for mt in [MediaType::DiskImage, MediaType::AuxImage, MediaType::ConfigV1] {
            assert_eq!(MediaType::from_media_type(mt.as_str()), Some(mt));
        }
    }

    #[test]
    fn test_unsupported() {
        assert!(!is_media_type_supported("application/vnd.oci.image.layer.v1.tar+gzip"));
        assert!(is_media_type_supported("application/vnd.vzpod.disk.image.v1"));
    }
}
