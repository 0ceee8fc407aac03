//! Processing phases of the scene pipeline.

use std::fmt;
use std::str::FromStr;

use sea_orm::Iterable;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A named stage of the media-processing pipeline. Stored as a short string.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[sea_orm(string_value = "metadata")]
    Metadata,
    #[sea_orm(string_value = "thumbnail")]
    Thumbnail,
    #[sea_orm(string_value = "sprites")]
    Sprites,
    #[sea_orm(string_value = "animated_thumbnails")]
    AnimatedThumbnails,
    #[sea_orm(string_value = "fingerprint")]
    Fingerprint,
    #[sea_orm(string_value = "preview")]
    Preview,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Metadata => "metadata",
            Phase::Thumbnail => "thumbnail",
            Phase::Sprites => "sprites",
            Phase::AnimatedThumbnails => "animated_thumbnails",
            Phase::Fingerprint => "fingerprint",
            Phase::Preview => "preview",
        }
    }

    /// All phases in pipeline order.
    pub fn all() -> Vec<Phase> {
        Phase::iter().collect()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown phase name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown phase '{0}'")]
pub struct UnknownPhase(pub String);

impl FromStr for Phase {
    type Err = UnknownPhase;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Phase::iter()
            .find(|phase| phase.as_str() == normalized)
            .ok_or_else(|| UnknownPhase(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_dashed_aliases() {
        assert_eq!("thumbnail".parse::<Phase>(), Ok(Phase::Thumbnail));
        assert_eq!(
            "animated-thumbnails".parse::<Phase>(),
            Ok(Phase::AnimatedThumbnails)
        );
        assert_eq!(" Fingerprint ".parse::<Phase>(), Ok(Phase::Fingerprint));
        assert!("transcode".parse::<Phase>().is_err());
    }

    #[test]
    fn display_matches_stored_value() {
        for phase in Phase::all() {
            assert_eq!(phase.to_string(), phase.to_value());
        }
    }
}
