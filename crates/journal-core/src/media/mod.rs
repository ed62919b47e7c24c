//! Local media files: intake into the media directory, MIME inference,
//! image ratio probing and voice recording summaries.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{ImageItem, VideoItem, VoiceRecord};
use crate::util::unix_timestamp_millis;

/// Number of points in a voice record's waveform.
pub const VOLUME_SAMPLE_COUNT: usize = 32;

/// MIME type inferred from a file name. Unknown extensions map to
/// `application/octet-stream`.
#[must_use]
pub fn mime_type_for(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Width divided by height of an image file.
pub fn probe_image_ratio(path: &Path) -> Result<f64> {
    let (width, height) = image::image_dimensions(path).map_err(|error| {
        Error::InvalidInput(format!(
            "Failed to read image dimensions of {}: {error}",
            path.display()
        ))
    })?;
    if height == 0 {
        return Err(Error::InvalidInput(format!(
            "Image {} has zero height",
            path.display()
        )));
    }
    Ok(f64::from(width) / f64::from(height))
}

/// Duration and waveform of a WAV recording.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSummary {
    pub duration_ms: i64,
    /// Peak amplitude per bucket, scaled so the loudest bucket is 1.0.
    pub volume_samples: Vec<f32>,
}

/// Summarize a WAV recording into `sample_count` volume buckets.
pub fn summarize_voice_recording(path: &Path, sample_count: usize) -> Result<VoiceSummary> {
    if sample_count == 0 {
        return Err(Error::InvalidInput(
            "Voice summary sample count must be greater than zero".to_string(),
        ));
    }

    let mut reader = hound::WavReader::open(path).map_err(|error| {
        Error::InvalidInput(format!("Failed to open WAV {}: {error}", path.display()))
    })?;
    let spec = reader.spec();
    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(Error::InvalidInput(format!(
            "WAV {} declares no channels or sample rate",
            path.display()
        )));
    }

    let amplitudes: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|sample| sample.map(f32::abs))
            .collect::<std::result::Result<_, _>>(),
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let full_scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|value| (value as f32 / full_scale).abs()))
                .collect::<std::result::Result<_, _>>()
        }
    }
    .map_err(|error| {
        Error::InvalidInput(format!("Failed to decode WAV {}: {error}", path.display()))
    })?;

    let channels = usize::from(spec.channels);
    let frames: Vec<f32> = amplitudes
        .chunks(channels)
        .map(|frame| frame.iter().copied().fold(0.0, f32::max))
        .collect();

    let duration_ms = (frames.len() as u128)
        .saturating_mul(1_000)
        .saturating_div(u128::from(spec.sample_rate));

    Ok(VoiceSummary {
        duration_ms: i64::try_from(duration_ms).unwrap_or(i64::MAX),
        volume_samples: bucket_peaks(&frames, sample_count),
    })
}

fn bucket_peaks(frames: &[f32], sample_count: usize) -> Vec<f32> {
    if frames.is_empty() {
        return vec![0.0; sample_count];
    }

    let peaks: Vec<f32> = (0..sample_count)
        .map(|bucket| {
            let start = bucket * frames.len() / sample_count;
            let end = ((bucket + 1) * frames.len() / sample_count).max(start + 1);
            frames[start.min(frames.len() - 1)..end.min(frames.len())]
                .iter()
                .copied()
                .fold(0.0, f32::max)
        })
        .collect();

    let loudest = peaks.iter().copied().fold(0.0, f32::max);
    if loudest <= f32::EPSILON {
        return peaks;
    }
    peaks.into_iter().map(|peak| peak / loudest).collect()
}

/// Directory holding every media file referenced by notes.
///
/// Files are stored under their item id, which is also the remote object
/// name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaLibrary {
    root: PathBuf,
}

impl MediaLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path for an item id.
    pub fn path_for(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\']);
        if !valid {
            return Err(Error::InvalidInput(format!("Invalid media id: {id:?}")));
        }
        Ok(self.root.join(id))
    }

    /// Copy an image into the library.
    pub async fn import_image(&self, source: &Path) -> Result<ImageItem> {
        let probe_path = source.to_path_buf();
        let ratio = tokio::task::spawn_blocking(move || probe_image_ratio(&probe_path))
            .await
            .map_err(|error| Error::Storage(format!("Image probe task failed: {error}")))??;

        let (id, path) = self.copy_in(source).await?;
        Ok(ImageItem {
            id,
            uri: path.to_string_lossy().into_owned(),
            ratio,
            added_date: unix_timestamp_millis(),
        })
    }

    /// Copy a video into the library. Dimensions and length are supplied by
    /// the caller.
    pub async fn import_video(&self, source: &Path, ratio: f64, duration_ms: i64) -> Result<VideoItem> {
        let (id, path) = self.copy_in(source).await?;
        Ok(VideoItem {
            id,
            uri: path.to_string_lossy().into_owned(),
            ratio,
            added_date: unix_timestamp_millis(),
            duration_ms,
        })
    }

    /// Copy a WAV recording into the library and summarize it.
    pub async fn import_voice(&self, source: &Path) -> Result<VoiceRecord> {
        let summary_path = source.to_path_buf();
        let summary = tokio::task::spawn_blocking(move || {
            summarize_voice_recording(&summary_path, VOLUME_SAMPLE_COUNT)
        })
        .await
        .map_err(|error| Error::Storage(format!("Voice summary task failed: {error}")))??;

        let (id, path) = self.copy_in(source).await?;
        Ok(VoiceRecord {
            id,
            uri: path.to_string_lossy().into_owned(),
            duration_ms: summary.duration_ms,
            volume_samples: summary.volume_samples,
        })
    }

    /// Remove a file from the library. Missing files are ignored.
    pub async fn remove(&self, id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(id)?).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn copy_in(&self, source: &Path) -> Result<(String, PathBuf)> {
        let id = new_media_id(source);
        let target = self.path_for(&id)?;
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::copy(source, &target).await.map_err(|error| {
            Error::Storage(format!(
                "Failed to copy {} into media library: {error}",
                source.display()
            ))
        })?;
        tracing::debug!("Imported {} as {id}", source.display());
        Ok((id, target))
    }
}

/// Fresh time-ordered id keeping the source extension.
fn new_media_id(source: &Path) -> String {
    let stem = Uuid::now_v7().to_string();
    match source
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase)
    {
        Some(extension) if !extension.is_empty() => format!("{stem}.{extension}"),
        _ => stem,
    }
}
