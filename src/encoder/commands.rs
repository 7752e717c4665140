use std::path::Path;

use crate::config::FfmpegConfig;
use crate::job::OutputSettings;

/// Engine invocation: binary, argument list and a label for logs and errors.
#[derive(Debug, Clone)]
pub struct EngineCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl EngineCommand {
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    pub fn video_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:v").arg(codec)
    }

    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    pub fn copy_video(self) -> Self {
        self.video_codec("copy")
    }

    pub fn copy_audio(self) -> Self {
        self.audio_codec("copy")
    }

    pub fn video_filter<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-vf").arg(filter)
    }

    pub fn frame_rate(self, fps: u32) -> Self {
        self.arg("-r").arg(fps.to_string())
    }

    /// Machine-readable progress on stdout instead of the stats line on stderr.
    pub fn progress_to_stdout(self) -> Self {
        self.arg("-progress").arg("pipe:1").arg("-nostats")
    }

    /// Full command line, for debug logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.binary_path.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Builds the engine invocations for each request shape.
#[derive(Debug, Clone)]
pub struct EngineCommandBuilder {
    binary_path: String,
    threads: u32,
    preset: String,
    crf: u32,
    hls_segment_duration: u32,
}

impl EngineCommandBuilder {
    pub fn new(config: &FfmpegConfig) -> Self {
        Self {
            binary_path: config.binary_path.clone(),
            threads: config.threads,
            preset: config.preset.clone(),
            crf: config.crf,
            hls_segment_duration: config.hls_segment_duration,
        }
    }

    fn base(&self, description: String) -> EngineCommand {
        let cmd = EngineCommand::new(&self.binary_path, description)
            .overwrite()
            .arg("-hide_banner");
        if self.threads > 0 {
            cmd.arg("-threads").arg(self.threads.to_string())
        } else {
            cmd
        }
    }

    /// H.264/AAC encode scaled to the target height.
    fn encode(&self, cmd: EngineCommand, settings: &OutputSettings) -> EngineCommand {
        cmd.video_filter(format!("scale=-2:{}", settings.resolution))
            .frame_rate(settings.fps)
            .video_codec("libx264")
            .arg("-preset").arg(self.preset.clone())
            .arg("-crf").arg(self.crf.to_string())
            .arg("-pix_fmt").arg("yuv420p")
            .audio_codec("aac")
    }

    /// One input to one progressive mp4.
    pub fn video<P: AsRef<Path>>(&self, input: P, output: P, settings: &OutputSettings) -> EngineCommand {
        let cmd = self
            .base(format!("Web video transcoding ({}p)", settings.resolution))
            .input(input);

        self.encode(cmd, settings)
            .arg("-movflags").arg("+faststart")
            .progress_to_stdout()
            .output(output)
    }

    /// One input to a VOD playlist backed by a single fragmented mp4.
    pub fn hls<P: AsRef<Path>>(
        &self,
        input: P,
        playlist: P,
        segment_file: P,
        copy_codecs: bool,
        settings: &OutputSettings,
    ) -> EngineCommand {
        let cmd = self
            .base(format!("HLS transcoding ({}p)", settings.resolution))
            .input(input);

        let cmd = if copy_codecs {
            cmd.copy_video().copy_audio()
        } else {
            self.encode(cmd, settings)
        };

        cmd.arg("-f").arg("hls")
            .arg("-hls_time").arg(self.hls_segment_duration.to_string())
            .arg("-hls_list_size").arg("0")
            .arg("-hls_playlist_type").arg("vod")
            .arg("-hls_segment_type").arg("fmp4")
            .arg("-hls_flags").arg("single_file")
            .arg("-hls_segment_filename")
            .arg(segment_file.as_ref().to_string_lossy().to_string())
            .progress_to_stdout()
            .output(playlist)
    }

    /// Audio track plus a looped still image to one mp4.
    pub fn merge_audio<P: AsRef<Path>>(
        &self,
        audio: P,
        preview: P,
        output: P,
        settings: &OutputSettings,
    ) -> EngineCommand {
        let cmd = self
            .base(format!("Audio merge transcoding ({}p)", settings.resolution))
            .arg("-loop").arg("1")
            .input(preview)
            .input(audio)
            .arg("-tune").arg("stillimage");

        self.encode(cmd, settings)
            .arg("-shortest")
            .arg("-movflags").arg("+faststart")
            .progress_to_stdout()
            .output(output)
    }
}

/// `ffprobe` call printing the container duration in seconds.
pub fn probe_duration_command<P: AsRef<Path>>(probe_path: &str, input: P) -> EngineCommand {
    EngineCommand::new(probe_path, "Duration probe")
        .arg("-v").arg("error")
        .arg("-show_entries").arg("format=duration")
        .arg("-of").arg("default=noprint_wrappers=1:nokey=1")
        .output(input)
}
