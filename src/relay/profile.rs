use serde::{Deserialize, Serialize};

/// A named codec/quality configuration passed through to the relay engine.
///
/// The primary profile stream-copies video; degraded profiles force a
/// re-encode at lower resolution and bitrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayProfile {
    pub name: String,
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default)]
    pub video_bitrate: Option<String>,
    /// Upper bound on output height; sources smaller than this are not upscaled.
    #[serde(default)]
    pub max_height: Option<u32>,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    #[serde(default)]
    pub threads: Option<u32>,
    /// Appended verbatim after the generated output options.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_video_codec() -> String {
    "copy".to_string()
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_audio_bitrate() -> String {
    "128k".to_string()
}

impl RelayProfile {
    /// Stream-copy video, AAC audio.
    pub fn primary() -> Self {
        Self {
            name: "primary".to_string(),
            video_codec: default_video_codec(),
            video_bitrate: None,
            max_height: None,
            preset: None,
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
            threads: None,
            extra_args: Vec::new(),
        }
    }

    /// Forced x264 re-encode at 720p / 2500k on two threads.
    pub fn degraded() -> Self {
        Self {
            name: "degraded-1".to_string(),
            video_codec: "libx264".to_string(),
            video_bitrate: Some("2500k".to_string()),
            max_height: Some(720),
            preset: Some("veryfast".to_string()),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
            threads: Some(2),
            extra_args: Vec::new(),
        }
    }

    pub fn is_stream_copy(&self) -> bool {
        self.video_codec == "copy"
    }

    /// Output options for this profile, excluding the container and destination.
    pub fn output_args(&self) -> Vec<String> {
        let mut args = vec!["-c:v".to_string(), self.video_codec.clone()];

        if !self.is_stream_copy() {
            if let Some(ref preset) = self.preset {
                args.extend(["-preset".to_string(), preset.clone()]);
            }
            if let Some(ref bitrate) = self.video_bitrate {
                args.extend([
                    "-b:v".to_string(),
                    bitrate.clone(),
                    "-maxrate".to_string(),
                    bitrate.clone(),
                ]);
            }
            if let Some(height) = self.max_height {
                args.extend(["-vf".to_string(), format!("scale=-2:'min({height},ih)'")]);
            }
            // RTMP ingest expects 4:2:0 and a regular keyframe interval.
            args.extend([
                "-pix_fmt".to_string(),
                "yuv420p".to_string(),
                "-g".to_string(),
                "60".to_string(),
            ]);
        }

        args.extend([
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-b:a".to_string(),
            self.audio_bitrate.clone(),
            "-ar".to_string(),
            "44100".to_string(),
        ]);

        if let Some(threads) = self.threads {
            args.extend(["-threads".to_string(), threads.to_string()]);
        }

        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Primary then one degraded retry.
pub fn default_profiles() -> Vec<RelayProfile> {
    vec![RelayProfile::primary(), RelayProfile::degraded()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_copies_video() {
        let args = RelayProfile::primary().output_args();
        assert_eq!(&args[..2], ["-c:v", "copy"]);
        assert!(!args.contains(&"-vf".to_string()));
        assert!(args.windows(2).any(|w| w == ["-c:a", "aac"]));
        assert!(args.windows(2).any(|w| w == ["-b:a", "128k"]));
    }

    #[test]
    fn degraded_reencodes_and_limits_threads() {
        let args = RelayProfile::degraded().output_args();
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-b:v", "2500k"]));
        assert!(args.windows(2).any(|w| w == ["-threads", "2"]));
        assert!(args.contains(&"scale=-2:'min(720,ih)'".to_string()));
    }

    #[test]
    fn copy_profile_ignores_encoder_options() {
        let profile = RelayProfile {
            video_bitrate: Some("1000k".into()),
            max_height: Some(480),
            ..RelayProfile::primary()
        };
        let args = profile.output_args();
        assert!(!args.contains(&"-b:v".to_string()));
        assert!(!args.contains(&"-vf".to_string()));
    }

    #[test]
    fn extra_args_are_appended_last() {
        let profile = RelayProfile {
            extra_args: vec!["-flvflags".into(), "no_duration_filesize".into()],
            ..RelayProfile::primary()
        };
        let args = profile.output_args();
        assert_eq!(&args[args.len() - 2..], ["-flvflags", "no_duration_filesize"]);
    }
}
