use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const PRESET_RESOLUTIONS: [&str; 8] = [
    "1920x1080",
    "2560x1440",
    "3840x2160",
    "1366x768",
    "2560x1600",
    "3024x1964",
    "3456x2234",
    "3440x1440",
];

/// `<width>x<height>` in canonical decimal form: no sign, no leading zeros,
/// neither side zero. What is accepted renders back unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid resolution '{0}', expected <width>x<height>")]
pub struct ParseResolutionError(pub String);

impl FromStr for Resolution {
    type Err = ParseResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseResolutionError(s.to_string());
        let (w, h) = s.split_once('x').ok_or_else(err)?;
        if !w.bytes().chain(h.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        // covers both a zero side and a zero-padded one
        if w.starts_with('0') || h.starts_with('0') {
            return Err(err());
        }
        let width: u32 = w.parse().map_err(|_| err())?;
        let height: u32 = h.parse().map_err(|_| err())?;
        Ok(Self { width, height })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Display icon identifiers understood by `hidpi.sh --configure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IconTag {
    Macbook,
    Macbookpro,
    Imac,
    Lg,
    Proxdr,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown display icon '{0}'")]
pub struct ParseIconError(pub String);

impl IconTag {
    pub const ALL: [IconTag; 5] = [
        IconTag::Macbook,
        IconTag::Macbookpro,
        IconTag::Imac,
        IconTag::Lg,
        IconTag::Proxdr,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IconTag::Macbook => "macbook",
            IconTag::Macbookpro => "macbookpro",
            IconTag::Imac => "imac",
            IconTag::Lg => "lg",
            IconTag::Proxdr => "proxdr",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            IconTag::Macbook => "MacBook",
            IconTag::Macbookpro => "MacBook Pro",
            IconTag::Imac => "iMac",
            IconTag::Lg => "LG Display",
            IconTag::Proxdr => "Pro Display XDR",
        }
    }
}

impl FromStr for IconTag {
    type Err = ParseIconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IconTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| ParseIconError(s.to_string()))
    }
}

impl fmt::Display for IconTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayConfiguration {
    pub resolution: Resolution,
    pub icon: IconTag,
    pub custom_name: String,
}

impl DisplayConfiguration {
    pub fn parse(
        resolution: &str,
        icon: &str,
        custom_name: Option<&str>,
    ) -> Result<Self, DisplayConfigError> {
        Ok(Self {
            resolution: resolution.parse()?,
            icon: icon.parse()?,
            custom_name: custom_name.unwrap_or_default().to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisplayConfigError {
    #[error(transparent)]
    Resolution(#[from] ParseResolutionError),
    #[error(transparent)]
    Icon(#[from] ParseIconError),
}
