//! Capture options and the ffmpeg argument builder.
//!
//! `capture_args` is a pure function of its inputs; the supervisor derives a
//! fresh `TranscodeOptions` from settings for every attempt.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HwAccel {
    Auto,
    Nvidia,
    Intel,
    Amd,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    #[default]
    Mp4,
    Mkv,
    Avi,
    Ts,
}

impl Container {
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Mkv => "mkv",
            Container::Avi => "avi",
            Container::Ts => "ts",
        }
    }

    fn mux_flags(&self) -> &'static [&'static str] {
        match self {
            Container::Mp4 => &["-movflags", "+faststart"],
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    Copy,
    H264,
    H265,
    Vp9,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    #[default]
    Copy,
    Aac,
    Mp3,
    Opus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Tcp,
    Udp,
    Http,
}

impl Transport {
    fn flag(&self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
            Transport::Http => "http",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeOptions {
    pub ffmpeg: PathBuf,
    pub hwaccel: HwAccel,
    pub container: Container,
    pub video: VideoCodec,
    pub audio: AudioCodec,
    pub transport: Transport,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            hwaccel: HwAccel::default(),
            container: Container::default(),
            video: VideoCodec::default(),
            audio: AudioCodec::default(),
            transport: Transport::default(),
        }
    }
}

impl TranscodeOptions {
    /// Argument vector for one capture run. Order is part of the contract:
    /// hwaccel input flags, transport, input, codecs, duration, mux flags,
    /// overwrite, output.
    pub fn capture_args(&self, url: &str, out: &Path, duration_secs: u64) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        args.extend(self.hwaccel_input_flags().iter().map(|s| s.to_string()));
        args.push("-rtsp_transport".into());
        args.push(self.transport.flag().into());
        args.push("-rtsp_flags".into());
        args.push("prefer_tcp".into());
        args.push("-i".into());
        args.push(url.into());
        args.push("-c:v".into());
        args.push(self.video_encoder().into());
        args.push("-c:a".into());
        args.push(self.audio_encoder().into());
        args.push("-t".into());
        args.push(duration_secs.to_string());
        args.extend(self.container.mux_flags().iter().map(|s| s.to_string()));
        args.push("-y".into());
        args.push(out.to_string_lossy().into_owned());
        args
    }

    /// Argument vector for the concat-demuxer stitch run.
    pub fn concat_args(&self, list_file: &Path, dest: &Path) -> Vec<String> {
        vec![
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            list_file.to_string_lossy().into_owned(),
            "-c".into(),
            "copy".into(),
            "-y".into(),
            dest.to_string_lossy().into_owned(),
        ]
    }

    /// Argument vector for a single-frame snapshot.
    pub fn snapshot_args(&self, url: &str, out: &Path) -> Vec<String> {
        vec![
            "-rtsp_transport".into(),
            self.transport.flag().into(),
            "-i".into(),
            url.into(),
            "-frames:v".into(),
            "1".into(),
            "-y".into(),
            out.to_string_lossy().into_owned(),
        ]
    }

    fn hwaccel_input_flags(&self) -> &'static [&'static str] {
        match self.hwaccel {
            HwAccel::Nvidia => &["-hwaccel", "cuda", "-hwaccel_output_format", "cuda"],
            HwAccel::Intel => &["-hwaccel", "qsv", "-hwaccel_output_format", "qsv"],
            HwAccel::Amd => &["-hwaccel", "amf"],
            HwAccel::Auto => &["-hwaccel", "auto"],
            HwAccel::None => &[],
        }
    }

    fn video_encoder(&self) -> &'static str {
        match (self.video, self.hwaccel) {
            (VideoCodec::Copy, _) => "copy",
            (VideoCodec::H264, HwAccel::Nvidia) => "h264_nvenc",
            (VideoCodec::H264, HwAccel::Intel) => "h264_qsv",
            (VideoCodec::H264, HwAccel::Amd) => "h264_amf",
            (VideoCodec::H264, _) => "libx264",
            (VideoCodec::H265, HwAccel::Nvidia) => "hevc_nvenc",
            (VideoCodec::H265, HwAccel::Intel) => "hevc_qsv",
            (VideoCodec::H265, HwAccel::Amd) => "hevc_amf",
            (VideoCodec::H265, _) => "libx265",
            (VideoCodec::Vp9, HwAccel::Intel) => "vp9_qsv",
            (VideoCodec::Vp9, _) => "libvpx-vp9",
        }
    }

    fn audio_encoder(&self) -> &'static str {
        match self.audio {
            AudioCodec::Copy => "copy",
            AudioCodec::Aac => "aac",
            AudioCodec::Mp3 => "libmp3lame",
            AudioCodec::Opus => "libopus",
        }
    }
}
