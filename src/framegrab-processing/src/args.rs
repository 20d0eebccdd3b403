//! ffmpeg argument composition for frame extraction

use framegrab_db::{ExtractMode, KeyframeMode, OutputFormat};
use std::path::{Path, PathBuf};

/// Offset added to the stored cursor so a resumed run does not re-emit the last frame
pub const RESUME_EPSILON_SEC: f64 = 0.001;

/// Default scene-change threshold for KEYFRAME+SCENE
pub const DEFAULT_SCENE_THRESHOLD: f64 = 0.3;

/// Default sampling rate when an FPS plan carries no rate
pub const DEFAULT_FPS: f64 = 1.0;

/// Name of the file holding frame `seq`
pub fn frame_file_name(seq: i64, format: OutputFormat) -> String {
    format!("frame_{:06}.{}", seq, format.extension())
}

/// Absolute start of a run: the configured start, or just past the resume cursor
pub fn resume_start_sec(start_sec: Option<f64>, cursor_out_time_sec: Option<f64>) -> f64 {
    let start = start_sec.filter(|v| v.is_finite() && *v > 0.0).unwrap_or(0.0);
    match cursor_out_time_sec {
        Some(cursor) if cursor.is_finite() && cursor + RESUME_EPSILON_SEC > start => {
            cursor + RESUME_EPSILON_SEC
        }
        _ => start,
    }
}

/// One extractor invocation
#[derive(Debug, Clone)]
pub struct ExtractPlan {
    pub input: PathBuf,
    /// Directory receiving `frame_%06d.<ext>` files
    pub frames_dir: PathBuf,
    /// Absolute seek position; `-ss` is only emitted when positive
    pub start_sec: f64,
    /// Effective end limit; `-t` is emitted when set and past `start_sec`
    pub end_sec: Option<f64>,
    pub mode: ExtractMode,
    pub keyframe_mode: Option<KeyframeMode>,
    pub scene_threshold: Option<f64>,
    pub fps: Option<f64>,
    pub frames_remaining: i64,
    pub output_format: OutputFormat,
    pub jpg_quality: Option<u32>,
    /// Sequence number of the first file written
    pub start_number: i64,
}

impl ExtractPlan {
    /// Output path pattern handed to ffmpeg
    pub fn output_pattern(&self) -> PathBuf {
        self.frames_dir
            .join(format!("frame_%06d.{}", self.output_format.extension()))
    }

    /// Path of the file ffmpeg writes for `seq`
    pub fn frame_path(&self, seq: i64) -> PathBuf {
        self.frames_dir.join(frame_file_name(seq, self.output_format))
    }

    /// Video filter and vsync method for the sampling mode
    fn filter_and_vsync(&self) -> (Option<String>, &'static str) {
        match self.mode {
            ExtractMode::Keyframe => match self.keyframe_mode.unwrap_or(KeyframeMode::Iframe) {
                KeyframeMode::Scene => {
                    let threshold = self
                        .scene_threshold
                        .filter(|t| (0.0..=1.0).contains(t))
                        .unwrap_or(DEFAULT_SCENE_THRESHOLD);
                    (Some(format!("select='gt(scene\\,{:.3})'", threshold)), "vfr")
                }
                KeyframeMode::Iframe => (Some("select='eq(pict_type\\,I)'".to_string()), "vfr"),
            },
            ExtractMode::Fps => {
                let fps = self.fps.filter(|f| *f > 0.0).unwrap_or(DEFAULT_FPS);
                (Some(format!("fps={:.3}", fps)), "vfr")
            }
            ExtractMode::All => (None, "0"),
        }
    }

    /// Full argv (without the program name)
    pub fn to_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-progress".into(),
            "pipe:1".into(),
            "-stats_period".into(),
            "1".into(),
        ];

        if self.start_sec > 0.0 {
            args.push("-ss".into());
            args.push(format!("{:.3}", self.start_sec));
        }

        args.push("-i".into());
        args.push(path_arg(&self.input));

        if let Some(end) = self.end_sec.filter(|e| *e > 0.0) {
            let duration = end - self.start_sec;
            if duration > 0.0 {
                args.push("-t".into());
                args.push(format!("{:.3}", duration));
            }
        }

        args.push("-an".into());

        let (filter, vsync) = self.filter_and_vsync();
        if let Some(filter) = filter {
            args.push("-vf".into());
            args.push(filter);
        }
        args.push("-vsync".into());
        args.push(vsync.into());

        args.push("-frames:v".into());
        args.push(self.frames_remaining.to_string());

        if self.output_format == OutputFormat::Jpg {
            if let Some(q) = self.jpg_quality.filter(|q| *q > 0) {
                args.push("-q:v".into());
                args.push(q.to_string());
            }
        }

        args.push("-start_number".into());
        args.push(self.start_number.to_string());

        args.push(path_arg(&self.output_pattern()));
        args
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(mode: ExtractMode) -> ExtractPlan {
        ExtractPlan {
            input: PathBuf::from("/in/clip.mp4"),
            frames_dir: PathBuf::from("/up/extract/t1/frames"),
            start_sec: 0.0,
            end_sec: None,
            mode,
            keyframe_mode: None,
            scene_threshold: None,
            fps: None,
            frames_remaining: 2,
            output_format: OutputFormat::Jpg,
            jpg_quality: None,
            start_number: 1,
        }
    }

    #[test]
    fn test_all_mode_args() {
        let args = plan(ExtractMode::All).to_args();
        assert_eq!(
            args,
            vec![
                "-hide_banner", "-nostdin", "-progress", "pipe:1", "-stats_period", "1",
                "-i", "/in/clip.mp4", "-an", "-vsync", "0", "-frames:v", "2",
                "-start_number", "1", "/up/extract/t1/frames/frame_%06d.jpg",
            ]
        );
    }

    #[test]
    fn test_seek_and_duration() {
        let mut p = plan(ExtractMode::All);
        p.start_sec = 1.5;
        p.end_sec = Some(4.0);
        let args = p.to_args();

        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < input);
        assert_eq!(args[ss + 1], "1.500");

        let t = args.iter().position(|a| a == "-t").unwrap();
        assert!(t > input);
        assert_eq!(args[t + 1], "2.500");
    }

    #[test]
    fn test_no_duration_past_end() {
        let mut p = plan(ExtractMode::All);
        p.start_sec = 5.0;
        p.end_sec = Some(4.0);
        assert!(!p.to_args().contains(&"-t".to_string()));
    }

    #[test]
    fn test_keyframe_filters() {
        let mut p = plan(ExtractMode::Keyframe);
        let args = p.to_args();
        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(args[vf + 1], "select='eq(pict_type\\,I)'");
        assert_eq!(args[vf + 2], "-vsync");
        assert_eq!(args[vf + 3], "vfr");

        p.keyframe_mode = Some(KeyframeMode::Scene);
        p.scene_threshold = Some(0.45);
        let args = p.to_args();
        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(args[vf + 1], "select='gt(scene\\,0.450)'");
    }

    #[test]
    fn test_fps_filter() {
        let mut p = plan(ExtractMode::Fps);
        p.fps = Some(5.0);
        let args = p.to_args();
        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(args[vf + 1], "fps=5.000");
    }

    #[test]
    fn test_quality_only_for_jpg() {
        let mut p = plan(ExtractMode::All);
        p.jpg_quality = Some(3);
        let args = p.to_args();
        let q = args.iter().position(|a| a == "-q:v").unwrap();
        assert_eq!(args[q + 1], "3");

        p.output_format = OutputFormat::Png;
        let args = p.to_args();
        assert!(!args.contains(&"-q:v".to_string()));
        assert_eq!(args.last().unwrap(), "/up/extract/t1/frames/frame_%06d.png");
    }

    #[test]
    fn test_resume_start_sec() {
        assert_eq!(resume_start_sec(None, None), 0.0);
        assert_eq!(resume_start_sec(Some(2.0), None), 2.0);
        assert!((resume_start_sec(Some(2.0), Some(5.0)) - 5.001).abs() < 1e-9);
        assert_eq!(resume_start_sec(Some(8.0), Some(5.0)), 8.0);
        assert!((resume_start_sec(None, Some(0.0)) - 0.001).abs() < 1e-9);
    }

    #[test]
    fn test_frame_file_name() {
        assert_eq!(frame_file_name(3, OutputFormat::Jpg), "frame_000003.jpg");
        assert_eq!(frame_file_name(1234567, OutputFormat::Png), "frame_1234567.png");
    }
}
