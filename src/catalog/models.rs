//! Track models.

use serde::{Deserialize, Serialize};

/// Processing state mirrored onto the track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackStatus {
    Processing,
    Completed,
    Failed,
}

impl TrackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A playable (or in-flight) audio asset.
///
/// Never carries key material.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: i64,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub duration_sec: Option<f64>,
    /// Object-store locator of the master playlist.
    pub manifest_locator: Option<String>,
    pub status: TrackStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields for a track created by the ingestion pipeline.
#[derive(Debug, Clone, Default)]
pub struct NewTrack {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub genre: Option<String>,
}

/// Administrative metadata edit. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPatch {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
}

impl TrackPatch {
    pub fn is_empty(&self) -> bool {
        *self == TrackPatch::default()
    }

    /// Applies every present field to `track`.
    ///
    /// Destructures the patch so that a new field fails to compile until it
    /// is wired in here.
    pub fn apply(self, track: &mut Track) {
        let TrackPatch {
            title,
            artist,
            album,
            genre,
        } = self;

        if let Some(title) = title {
            track.title = title;
        }
        if let Some(artist) = artist {
            track.artist = artist;
        }
        if let Some(album) = album {
            track.album = Some(album);
        }
        if let Some(genre) = genre {
            track.genre = Some(genre);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_track() -> Track {
        Track {
            id: 1,
            title: "Unknown".to_string(),
            artist: "Unknown Artist".to_string(),
            album: None,
            genre: None,
            duration_sec: Some(30.0),
            manifest_locator: None,
            status: TrackStatus::Completed,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_status_strings() {
        for status in [
            TrackStatus::Processing,
            TrackStatus::Completed,
            TrackStatus::Failed,
        ] {
            assert_eq!(TrackStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TrackStatus::parse("success"), None);
    }

    #[test]
    fn test_patch_applies_only_present_fields() {
        let mut track = make_track();
        let patch = TrackPatch {
            title: Some("Night Drive".to_string()),
            genre: Some("Electronic".to_string()),
            ..Default::default()
        };
        assert!(!patch.is_empty());

        patch.apply(&mut track);

        assert_eq!(track.title, "Night Drive");
        assert_eq!(track.artist, "Unknown Artist");
        assert_eq!(track.album, None);
        assert_eq!(track.genre, Some("Electronic".to_string()));
    }

    #[test]
    fn test_empty_patch() {
        let mut track = make_track();
        let patch = TrackPatch::default();
        assert!(patch.is_empty());
        patch.apply(&mut track);
        assert_eq!(track, make_track());
    }

    #[test]
    fn test_patch_deserializes_camel_case() {
        let patch: TrackPatch = serde_json::from_str(r#"{"artist": "Ada", "album": "Loops"}"#).unwrap();
        assert_eq!(patch.artist, Some("Ada".to_string()));
        assert_eq!(patch.album, Some("Loops".to_string()));
        assert_eq!(patch.title, None);
    }
}
