// Integration tests for WAV loading and the file capture backend
//
// Fixtures are written to a temp dir with hound, so the tests need no checked-in audio.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tutor_live::audio::{AudioBackend, AudioFile, CaptureConfig, FileBackend};
use tutor_live::LiveError;

fn write_wav(dir: &Path, name: &str, sample_rate: u32, channels: u16, samples: &[i16]) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for &sample in samples {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
    path
}

#[test]
fn test_audio_file_open() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_wav(dir.path(), "tone.wav", 16000, 1, &vec![1000; 8000]);

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.sample_rate, 16000);
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.samples.len(), 8000);
    assert!((audio.duration_seconds - 0.5).abs() < 1e-9);
    assert!(audio.path.contains("tone.wav"));

    Ok(())
}

#[test]
fn test_audio_file_nonexistent() {
    let path = PathBuf::from("/nonexistent/path/to/audio.wav");
    let result = AudioFile::open(&path);

    assert!(result.is_err(), "Opening nonexistent file should fail");
}

#[test]
fn test_stereo_48k_to_mono_16k() -> Result<()> {
    let dir = TempDir::new()?;
    // Interleaved L/R pairs; each mono sample is the average of its pair
    let samples: Vec<i16> = (0..12).flat_map(|i| [i * 100, i * 100 + 50]).collect();
    let path = write_wav(dir.path(), "stereo.wav", 48000, 2, &samples);

    let audio = AudioFile::open(&path)?;
    let mono = audio.to_mono(16000)?;

    // 12 stereo frames decimated by 3
    assert_eq!(mono, vec![25, 325, 625, 925]);

    Ok(())
}

#[test]
fn test_to_mono_rejects_non_integer_ratio() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_wav(dir.path(), "cd.wav", 44100, 1, &vec![0; 441]);

    let audio = AudioFile::open(&path)?;

    assert!(audio.to_mono(16000).is_err());
    assert!(audio.to_mono(44100).is_ok());

    Ok(())
}

#[tokio::test]
async fn test_file_backend_delivers_blocks_in_order() -> Result<()> {
    let dir = TempDir::new()?;
    let samples: Vec<i16> = (0..800).map(|i| i as i16).collect();
    let path = write_wav(dir.path(), "speech.wav", 16000, 1, &samples);

    let config = CaptureConfig {
        block_size: 160,
        ..CaptureConfig::default()
    };
    let mut backend = FileBackend::new(path, config);

    backend.acquire().await?;
    let mut rx = backend.start().await?;

    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        frames.push(frame);
    }

    assert_eq!(frames.len(), 5);
    assert!(frames.iter().all(|f| f.samples.len() == 160));
    assert!(frames.iter().all(|f| f.sample_rate == 16000 && f.channels == 1));
    assert_eq!(frames[0].samples[0], 0);
    assert_eq!(frames[4].samples[159], 799);
    assert_eq!(frames[1].timestamp_ms, 10);

    backend.stop().await?;
    assert!(!backend.is_capturing());

    Ok(())
}

#[tokio::test]
async fn test_file_backend_missing_file_is_device_error() {
    let mut backend = FileBackend::new(
        PathBuf::from("/nonexistent/input.wav"),
        CaptureConfig::default(),
    );

    let result = backend.acquire().await;

    assert!(matches!(result, Err(LiveError::DeviceUnavailable(_))));
}

#[tokio::test]
async fn test_file_backend_requires_acquire() {
    let mut backend = FileBackend::new(PathBuf::from("unused.wav"), CaptureConfig::default());

    assert!(backend.start().await.is_err());
}
