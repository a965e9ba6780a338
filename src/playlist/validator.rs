//! Rule-based playlist validation, configurable between a lenient
//! RFC-8216 baseline and Apple's stricter HLS authoring guidance. Spec
//! §4.12 "Validator".

use crate::playlist::model::{MasterPlaylist, MediaPlaylist, Playlist, PlaylistType};

/// Which rule set [`validate`] enforces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationProfile {
    /// RFC 8216 minimum requirements only.
    Rfc8216,
    /// Apple's HLS authoring guidelines, a superset of RFC 8216.
    AppleStrict,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub message: String,
}

impl ValidationIssue {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

/// Validates a [`Playlist`] and returns every issue found; an empty
/// vector means the playlist passed every enabled rule.
pub fn validate(playlist: &Playlist, profile: ValidationProfile) -> Vec<ValidationIssue> {
    match playlist {
        Playlist::Media(m) => validate_media(m, profile),
        Playlist::Master(m) => validate_master(m, profile),
    }
}

fn validate_media(playlist: &MediaPlaylist, profile: ValidationProfile) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if playlist.target_duration == 0 {
        issues.push(ValidationIssue::error("EXT-X-TARGETDURATION must be greater than 0"));
    }

    let tolerance = match profile {
        ValidationProfile::AppleStrict => 0.0,
        ValidationProfile::Rfc8216 => 0.5,
    };
    let max_allowed = playlist.target_duration as f64 + tolerance;
    for (i, segment) in playlist.segments.iter().enumerate() {
        if segment.duration < 0.0 {
            issues.push(ValidationIssue::error(format!(
                "segment {i} has a negative duration"
            )));
        } else if segment.duration > max_allowed {
            issues.push(ValidationIssue::error(format!(
                "segment {i} duration {:.3}s exceeds target duration {}s (tolerance {:.1}s)",
                segment.duration, playlist.target_duration, tolerance
            )));
        }
        if let Some(br) = &segment.byte_range {
            if br.offset.is_none() {
                let shares_uri_with_previous = i > 0
                    && playlist.segments[i - 1].byte_range.is_some()
                    && playlist.segments[i - 1].uri == segment.uri;
                if !shares_uri_with_previous {
                    issues.push(ValidationIssue::error(format!(
                        "segment {i}'s EXT-X-BYTERANGE has no explicit offset and cannot inherit \
                         one from the previous segment (no matching contiguous URI)"
                    )));
                }
            }
            let _ = br.length;
        }
    }

    let endlist_count = if playlist.ended { 1 } else { 0 };
    if matches!(playlist.playlist_type, Some(PlaylistType::Vod)) && endlist_count == 0 {
        issues.push(ValidationIssue::error(
            "VOD playlists must terminate with EXT-X-ENDLIST",
        ));
    }

    if profile == ValidationProfile::AppleStrict {
        if playlist.version == 0 {
            issues.push(ValidationIssue::warning("EXT-X-VERSION is missing"));
        }
        if playlist.part_inf.is_some() && playlist.server_control.is_none() {
            issues.push(ValidationIssue::warning(
                "EXT-X-PART-INF present without EXT-X-SERVER-CONTROL",
            ));
        }
    }

    issues
}

fn validate_master(playlist: &MasterPlaylist, profile: ValidationProfile) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if playlist.variants.is_empty() {
        issues.push(ValidationIssue::error(
            "master playlist must declare at least one EXT-X-STREAM-INF variant",
        ));
    }

    for (i, variant) in playlist.variants.iter().enumerate() {
        if variant.bandwidth == 0 {
            issues.push(ValidationIssue::error(format!(
                "variant {i} is missing BANDWIDTH"
            )));
        }
        if profile == ValidationProfile::AppleStrict {
            if variant.codecs.is_none() {
                issues.push(ValidationIssue::warning(format!(
                    "variant {i} is missing CODECS"
                )));
            }
            if variant.resolution.is_none() {
                issues.push(ValidationIssue::warning(format!(
                    "variant {i} is missing RESOLUTION"
                )));
            }
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::model::{MediaSegment, Variant};

    #[test]
    fn zero_target_duration_is_an_error() {
        let playlist = MediaPlaylist::default();
        let issues = validate(&Playlist::Media(playlist), ValidationProfile::Rfc8216);
        assert!(issues.iter().any(|i| i.severity == Severity::Error));
    }

    #[test]
    fn segment_duration_within_tolerance_is_accepted() {
        let mut playlist = MediaPlaylist {
            target_duration: 6,
            ..Default::default()
        };
        playlist.segments.push(MediaSegment::new(6.4, "seg0.ts"));
        playlist.ended = true;
        playlist.playlist_type = Some(PlaylistType::Vod);
        let issues = validate(&Playlist::Media(playlist.clone()), ValidationProfile::Rfc8216);
        assert!(issues.is_empty());

        let strict_issues = validate(&Playlist::Media(playlist), ValidationProfile::AppleStrict);
        assert!(strict_issues
            .iter()
            .any(|i| i.message.contains("exceeds target duration")));
    }

    #[test]
    fn vod_without_endlist_is_an_error() {
        let playlist = MediaPlaylist {
            target_duration: 6,
            playlist_type: Some(PlaylistType::Vod),
            ended: false,
            ..Default::default()
        };
        let issues = validate(&Playlist::Media(playlist), ValidationProfile::Rfc8216);
        assert!(issues
            .iter()
            .any(|i| i.message.contains("EXT-X-ENDLIST")));
    }

    #[test]
    fn byte_range_without_offset_is_an_error_without_a_contiguous_predecessor() {
        let mut playlist = MediaPlaylist {
            target_duration: 6,
            ..Default::default()
        };
        let mut segment = MediaSegment::new(6.0, "seg0.m4s");
        segment.byte_range = Some(crate::playlist::model::ByteRange {
            length: 1000,
            offset: None,
        });
        playlist.segments.push(segment);
        playlist.ended = true;
        let issues = validate(&Playlist::Media(playlist), ValidationProfile::Rfc8216);
        assert!(issues
            .iter()
            .any(|i| i.message.contains("no explicit offset")));
    }

    #[test]
    fn byte_range_without_offset_is_accepted_after_a_contiguous_same_uri_segment() {
        let mut playlist = MediaPlaylist {
            target_duration: 6,
            ..Default::default()
        };
        let mut first = MediaSegment::new(6.0, "segments.m4s");
        first.byte_range = Some(crate::playlist::model::ByteRange {
            length: 1000,
            offset: Some(0),
        });
        let mut second = MediaSegment::new(6.0, "segments.m4s");
        second.byte_range = Some(crate::playlist::model::ByteRange {
            length: 2000,
            offset: Some(1000),
        });
        playlist.segments.push(first);
        playlist.segments.push(second);
        playlist.ended = true;
        let issues = validate(&Playlist::Media(playlist), ValidationProfile::Rfc8216);
        assert!(!issues
            .iter()
            .any(|i| i.message.contains("no explicit offset")));
    }

    #[test]
    fn master_without_variants_is_an_error() {
        let issues = validate(&Playlist::Master(MasterPlaylist::default()), ValidationProfile::Rfc8216);
        assert!(issues.iter().any(|i| i.message.contains("one EXT-X-STREAM-INF")));
    }

    #[test]
    fn strict_profile_warns_on_missing_codecs_and_resolution() {
        let mut playlist = MasterPlaylist::default();
        playlist.variants.push(Variant {
            uri: "v0.m3u8".to_string(),
            bandwidth: 1_000_000,
            average_bandwidth: None,
            codecs: None,
            resolution: None,
            frame_rate: None,
            audio_group: None,
            video_group: None,
            subtitles_group: None,
        });
        let issues = validate(&Playlist::Master(playlist), ValidationProfile::AppleStrict);
        assert_eq!(issues.iter().filter(|i| i.severity == Severity::Warning).count(), 2);
    }
}
