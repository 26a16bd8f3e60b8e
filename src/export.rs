//! WAV file export
//!
//! Renders a subsong offline through the same pull path a live host uses and
//! writes 16-bit stereo PCM with `hound`.

use crate::replayer::SidPlayer;
use crate::{Result, SidError};
use std::path::Path;

/// Stereo frames rendered per chunk
const FRAMES_PER_CHUNK: usize = 4096;

/// Render `seconds` of `subsong` to a 16-bit stereo WAV file.
///
/// The player must have a song loaded. Playback is (re)started from the
/// subsong's init routine. Returns the number of stereo frames written.
///
/// # Examples
///
/// ```no_run
/// use sidplay::export::render_wav;
/// use sidplay::SidPlayer;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let data = std::fs::read("song.sid")?;
/// let mut player = SidPlayer::new();
/// player.load(&data)?;
/// render_wav(&mut player, 0, 30.0, 44_100, "song.wav")?;
/// # Ok(())
/// # }
/// ```
pub fn render_wav<P: AsRef<Path>>(
    player: &mut SidPlayer,
    subsong: u8,
    seconds: f32,
    sample_rate: u32,
    output_path: P,
) -> Result<usize> {
    player.stop();
    player.select_subsong(subsong)?;
    player.start()?;

    let total_frames = (seconds.max(0.0) as f64 * sample_rate as f64).round() as usize;
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(output_path.as_ref(), spec)
        .map_err(|e| SidError::AudioFile(format!("Failed to create WAV file: {}", e)))?;

    let mut buffer = vec![0.0f32; FRAMES_PER_CHUNK * 2];
    let mut written = 0;
    while written < total_frames {
        let frames = (total_frames - written).min(FRAMES_PER_CHUNK);
        let chunk = &mut buffer[..frames * 2];
        player.render_interleaved(chunk, sample_rate);
        for &sample in chunk.iter() {
            writer
                .write_sample(to_i16(sample))
                .map_err(|e| SidError::AudioFile(format!("Failed to write sample: {}", e)))?;
        }
        written += frames;
    }

    writer
        .finalize()
        .map_err(|e| SidError::AudioFile(format!("Failed to finalize WAV file: {}", e)))?;

    log::info!(
        "Wrote {} frames ({:.1}s) to {}",
        written,
        written as f64 / sample_rate.max(1) as f64,
        output_path.as_ref().display()
    );
    Ok(written)
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_i16_clamps() {
        assert_eq!(to_i16(0.0), 0);
        assert_eq!(to_i16(1.0), i16::MAX);
        assert_eq!(to_i16(2.0), i16::MAX);
        assert_eq!(to_i16(-1.0), -i16::MAX);
    }

    #[test]
    fn test_render_requires_song() {
        let mut player = SidPlayer::new();
        let path = std::env::temp_dir().join("sidplay-export-no-song.wav");
        assert!(matches!(
            render_wav(&mut player, 0, 1.0, 44_100, &path),
            Err(SidError::NoSongLoaded)
        ));
    }
}
