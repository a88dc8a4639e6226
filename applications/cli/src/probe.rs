//! Track facts read from audio files with Symphonia

use anyhow::{Context, Result};
use soul_transition::Track;
use std::path::Path;
use std::time::Duration;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Probed {
    pub duration_ms: Option<u64>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

/// Probe the container of `path` for its duration and tags
pub fn probe(path: &Path) -> Result<Probed> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mut probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("Failed to probe {}", path.display()))?;

    let mut info = Probed::default();

    if let Some(track) = probed.format.default_track() {
        let params = &track.codec_params;
        if let (Some(time_base), Some(n_frames)) = (params.time_base, params.n_frames) {
            let time = time_base.calc_time(n_frames);
            info.duration_ms = Some(time.seconds * 1000 + (time.frac * 1000.0).round() as u64);
        }
    }

    // Tags ahead of the container first, then the container's own
    if let Some(log) = probed.metadata.get() {
        if let Some(revision) = log.current() {
            read_tags(revision, &mut info);
        }
    }
    if let Some(revision) = probed.format.metadata().current() {
        read_tags(revision, &mut info);
    }

    Ok(info)
}

fn read_tags(revision: &MetadataRevision, info: &mut Probed) {
    for tag in revision.tags() {
        let value = tag.value.to_string();
        if value.trim().is_empty() {
            continue;
        }
        match tag.std_key {
            Some(StandardTagKey::TrackTitle) => info.title = Some(value),
            Some(StandardTagKey::Artist) => info.artist = Some(value),
            Some(StandardTagKey::Album) => info.album = Some(value),
            _ => {}
        }
    }
}

/// Build a playlist entry for `path`
///
/// Files the probe cannot read still play; they get `fallback_ms` as their
/// duration and the file name as their title.
pub fn track_for(path: &Path, fallback_ms: u64) -> Track {
    let locator = path.display().to_string();
    let mut track = Track::new(locator.clone(), locator);

    let info = match probe(path) {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!("{:#}; assuming {} ms", e, fallback_ms);
            Probed::default()
        }
    };

    track.title = info.title.unwrap_or_else(|| {
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string()
    });
    if let Some(artist) = info.artist {
        track.artist = artist;
    }
    track.album = info.album;
    track.duration = Some(Duration::from_millis(
        info.duration_ms.unwrap_or(fallback_ms),
    ));
    track
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Silent 16-bit mono PCM
    fn wav_bytes(sample_rate: u32, frames: u32) -> Vec<u8> {
        let data_len = frames * 2;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        bytes.resize(bytes.len() + data_len as usize, 0);
        bytes
    }

    fn temp_file(suffix: &str, contents: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents).unwrap();
        file
    }

    #[test]
    fn test_probes_wav_duration() {
        let file = temp_file(".wav", &wav_bytes(8_000, 12_000));

        let info = probe(file.path()).unwrap();

        assert_eq!(info.duration_ms, Some(1_500));
    }

    #[test]
    fn test_unreadable_file_falls_back() {
        let file = temp_file(".flac", b"definitely not audio");

        assert!(probe(file.path()).is_err());

        let track = track_for(file.path(), 90_000);
        assert_eq!(track.duration, Some(Duration::from_millis(90_000)));
        assert_eq!(track.locator, file.path().display().to_string());
        assert!(!track.title.is_empty());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(probe(&dir.path().join("gone.mp3")).is_err());
    }
}
