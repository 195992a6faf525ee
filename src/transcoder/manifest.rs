//! HLS playlist writing and reading.

use std::fmt::Write;

pub const MASTER_PLAYLIST: &str = "master.m3u8";
pub const VARIANT_PLAYLIST: &str = "playlist.m3u8";
const AAC_LC_CODEC: &str = "mp4a.40.2";

/// One bitrate rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variant {
    pub bitrate_kbps: u32,
}

impl Variant {
    pub fn new(bitrate_kbps: u32) -> Self {
        Self { bitrate_kbps }
    }

    /// Directory name of the rendition, e.g. `128k`.
    pub fn label(&self) -> String {
        format!("{}k", self.bitrate_kbps)
    }

    /// Bits per second, as advertised in `BANDWIDTH`.
    pub fn bandwidth(&self) -> u64 {
        self.bitrate_kbps as u64 * 1000
    }

    /// Playlist path relative to the master playlist.
    pub fn playlist_path(&self) -> String {
        format!("{}/{}", self.label(), VARIANT_PLAYLIST)
    }
}

/// Master playlist listing `variants` in the given order.
pub fn render_master_playlist(variants: &[Variant]) -> String {
    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-INDEPENDENT-SEGMENTS\n");
    for variant in variants {
        let _ = writeln!(
            out,
            "#EXT-X-STREAM-INF:BANDWIDTH={},CODECS=\"{}\"",
            variant.bandwidth(),
            AAC_LC_CODEC
        );
        let _ = writeln!(out, "{}", variant.playlist_path());
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub duration_sec: f64,
    pub uri: String,
}

/// The parts of a variant playlist the pipeline cares about.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaPlaylist {
    pub target_duration: u32,
    pub media_sequence: u64,
    pub key_method: Option<String>,
    pub key_uri: Option<String>,
    /// Explicit IV; without one players derive it from the media sequence.
    pub key_iv: Option<String>,
    pub segments: Vec<Segment>,
    pub ended: bool,
}

impl MediaPlaylist {
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration_sec).sum()
    }

    /// VOD playlist in the form that gets published: only the tags listed
    /// here survive, whatever the encoder wrote.
    pub fn render(&self) -> String {
        let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
        let _ = writeln!(out, "#EXT-X-TARGETDURATION:{}", self.target_duration);
        let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", self.media_sequence);
        out.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");
        if let Some(uri) = &self.key_uri {
            let method = self.key_method.as_deref().unwrap_or("AES-128");
            let _ = write!(out, "#EXT-X-KEY:METHOD={},URI=\"{}\"", method, uri);
            if let Some(iv) = &self.key_iv {
                let _ = write!(out, ",IV={}", iv);
            }
            out.push('\n');
        }
        for segment in &self.segments {
            let _ = writeln!(out, "#EXTINF:{:.6},", segment.duration_sec);
            let _ = writeln!(out, "{}", segment.uri);
        }
        if self.ended {
            out.push_str("#EXT-X-ENDLIST\n");
        }
        out
    }
}

/// Reads `KEY=value` pairs of a tag, honoring quoted values.
fn parse_attributes(list: &str) -> Vec<(String, String)> {
    let mut attributes = Vec::new();
    let mut rest = list;
    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let name = rest[..eq].trim().to_string();
        rest = &rest[eq + 1..];

        let value;
        if let Some(stripped) = rest.strip_prefix('"') {
            let end = stripped.find('"').unwrap_or(stripped.len());
            value = stripped[..end].to_string();
            rest = stripped.get(end + 1..).unwrap_or("");
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            value = rest[..end].to_string();
            rest = &rest[end..];
        }
        rest = rest.strip_prefix(',').unwrap_or(rest);
        attributes.push((name, value));
    }
    attributes
}

pub fn parse_media_playlist(text: &str) -> Result<MediaPlaylist, String> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    if lines.next() != Some("#EXTM3U") {
        return Err("missing #EXTM3U header".to_string());
    }

    let mut playlist = MediaPlaylist::default();
    let mut pending_duration: Option<f64> = None;

    for line in lines {
        if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            playlist.target_duration = value
                .parse()
                .map_err(|_| format!("bad target duration: {}", value))?;
        } else if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            playlist.media_sequence = value
                .parse()
                .map_err(|_| format!("bad media sequence: {}", value))?;
        } else if let Some(list) = line.strip_prefix("#EXT-X-KEY:") {
            for (name, value) in parse_attributes(list) {
                match name.as_str() {
                    "METHOD" => playlist.key_method = Some(value),
                    "URI" => playlist.key_uri = Some(value),
                    "IV" => playlist.key_iv = Some(value),
                    _ => {}
                }
            }
        } else if let Some(value) = line.strip_prefix("#EXTINF:") {
            let duration = value.split(',').next().unwrap_or("");
            pending_duration = Some(
                duration
                    .parse()
                    .map_err(|_| format!("bad segment duration: {}", duration))?,
            );
        } else if line == "#EXT-X-ENDLIST" {
            playlist.ended = true;
        } else if line.starts_with('#') {
            continue;
        } else {
            let duration_sec = pending_duration
                .take()
                .ok_or_else(|| format!("segment without #EXTINF: {}", line))?;
            playlist.segments.push(Segment {
                duration_sec,
                uri: line.to_string(),
            });
        }
    }

    Ok(playlist)
}
