//! Quality-profile rendition transcoding.

use std::path::Path;
use tokio::sync::watch;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use snode_models::encoding::{
    DEFAULT_AUDIO_CODEC, DEFAULT_CRF, DEFAULT_PRESET, DEFAULT_VIDEO_CODEC, FASTSTART_FLAGS,
    OUTPUT_FORMAT,
};
use snode_models::QualityProfile;

/// Transcode the input into one rendition at the given quality profile.
///
/// Stage-local completion (0-100) is published on `progress` as FFmpeg
/// reports output time; `duration_ms` is the probed input duration. The
/// watch channel carries the latest value only, which is all the consumer
/// needs for monotone progress mapping.
pub async fn transcode_rendition(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    profile: &QualityProfile,
    duration_ms: i64,
    progress: watch::Sender<f64>,
) -> MediaResult<()> {
    let cmd = build_rendition_command(input.as_ref(), output.as_ref(), profile);

    FfmpegRunner::new()
        .run_with_progress(&cmd, move |p| {
            progress.send_replace(p.percentage(duration_ms));
        })
        .await
}

fn build_rendition_command(input: &Path, output: &Path, profile: &QualityProfile) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .video_codec(DEFAULT_VIDEO_CODEC)
        .audio_codec(DEFAULT_AUDIO_CODEC)
        .size(profile.resolution())
        .video_bitrate(profile.video_bitrate.as_str())
        .audio_bitrate(profile.audio_bitrate.as_str())
        .preset(DEFAULT_PRESET)
        .crf(DEFAULT_CRF)
        .format(OUTPUT_FORMAT)
        .movflags(FASTSTART_FLAGS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use snode_models::quality::default_profiles;

    #[test]
    fn rendition_command_carries_profile_settings() {
        let profile = &default_profiles()[1]; // 720p
        let cmd = build_rendition_command(Path::new("in.mp4"), Path::new("720p.mp4"), profile);
        let args = cmd.build_args();

        for expected in [
            "libx264", "aac", "1280x720", "2500k", "192k", "medium", "23", "mp4", "+faststart",
        ] {
            assert!(
                args.contains(&expected.to_string()),
                "missing {expected} in {args:?}"
            );
        }
    }
}
