//! External services the pipeline depends on: camera capture, captioning,
//! speech and tone playback.
//!
//! Each has a shell-command implementation driven by a template and a
//! log-only fallback used when no command is configured.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use fusion_core::BeepLevel;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::assist::config::CollaboratorArgs;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("capture command did not produce {}", .0.display())]
    MissingImage(PathBuf),
}

/// Image written by a capture collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageHandle {
    pub path: PathBuf,
    /// Created by the pipeline and removed once captioned.
    pub temporary: bool,
}

impl ImageHandle {
    pub fn temporary(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temporary: true,
        }
    }

    /// A path the pipeline does not own; never deleted.
    pub fn external(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temporary: false,
        }
    }

    /// Delete a temporary image. Missing files are ignored.
    pub fn discard(&self) {
        if self.temporary {
            remove_image(&self.path);
        }
    }
}

fn remove_image(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(image = %path.display(), "removed captured image"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(image = %path.display(), "failed to remove captured image: {err}"),
    }
}

pub trait FrameCapture: Send {
    fn capture(&mut self) -> Result<ImageHandle, CollaboratorError>;
}

pub trait Captioner: Send {
    fn caption(&mut self, image: &ImageHandle) -> Result<String, CollaboratorError>;
}

/// Blocks until the utterance has finished playing.
pub trait SpeechSink: Send {
    fn speak(&mut self, text: &str) -> Result<(), CollaboratorError>;
}

/// Blocks until the tone has finished playing.
pub trait TonePlayer: Send {
    fn play(&mut self, tone: Tone) -> Result<(), CollaboratorError>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tone {
    pub frequency_hz: u32,
    pub duration: Duration,
}

/// Tone played for each beep level.
pub fn tone_for(level: BeepLevel) -> Tone {
    let (frequency_hz, millis) = match level {
        BeepLevel::Far => (440, 150),
        BeepLevel::Mid => (660, 150),
        BeepLevel::Near => (880, 100),
        BeepLevel::Close => (1200, 500),
        BeepLevel::Mismatch => (300, 300),
    };
    Tone {
        frequency_hz,
        duration: Duration::from_millis(millis),
    }
}

const CAPTION_PREFIXES: [&str; 3] = ["a photo of", "the photo of", "an image of"];

/// Trim a caption and drop dataset boilerplate; `None` if nothing remains.
pub fn clean_caption(raw: &str) -> Option<String> {
    let mut text = raw.trim();
    for prefix in CAPTION_PREFIXES {
        if text.len() >= prefix.len()
            && text.is_char_boundary(prefix.len())
            && text[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            text = text[prefix.len()..].trim_start();
            break;
        }
    }
    (!text.is_empty()).then(|| text.to_string())
}

/// A `sh -c` template with `{name}` placeholders.
#[derive(Clone, Debug)]
pub struct ShellTemplate {
    template: String,
}

impl ShellTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Substitute placeholders; values are single-quoted for the shell.
    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        vars.iter().fold(self.template.clone(), |acc, (name, value)| {
            acc.replace(&format!("{{{name}}}"), &shell_quote(value))
        })
    }

    /// Run the rendered command, feeding `stdin` if given, and return stdout.
    pub fn run(&self, vars: &[(&str, &str)], stdin: Option<&str>) -> Result<String, CollaboratorError> {
        let command = self.render(vars);
        debug!(%command, "running collaborator command");
        let spawn_err = |source| CollaboratorError::Spawn {
            command: command.clone(),
            source,
        };

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        if let (Some(text), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(text.as_bytes()).map_err(spawn_err)?;
        }
        let output = child.wait_with_output().map_err(spawn_err)?;
        if !output.status.success() {
            return Err(CollaboratorError::Failed {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Runs the capture template with `{output}` set to a fresh image path.
pub struct CommandCapture {
    template: ShellTemplate,
    dir: PathBuf,
    counter: AtomicU64,
}

impl CommandCapture {
    pub fn new(template: ShellTemplate, dir: impl Into<PathBuf>) -> Self {
        Self {
            template,
            dir: dir.into(),
            counter: AtomicU64::new(0),
        }
    }

    fn next_path(&self) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        self.dir
            .join(format!("vision-assist-{}-{n}.jpg", std::process::id()))
    }
}

impl FrameCapture for CommandCapture {
    fn capture(&mut self) -> Result<ImageHandle, CollaboratorError> {
        let path = self.next_path();
        if let Err(err) = self
            .template
            .run(&[("output", &path.to_string_lossy())], None)
        {
            remove_image(&path);
            return Err(err);
        }
        if !path.exists() {
            return Err(CollaboratorError::MissingImage(path));
        }
        Ok(ImageHandle::temporary(path))
    }
}

/// Runs the caption template with `{image}`; stdout is the caption.
pub struct CommandCaptioner {
    template: ShellTemplate,
}

impl CommandCaptioner {
    pub fn new(template: ShellTemplate) -> Self {
        Self { template }
    }
}

impl Captioner for CommandCaptioner {
    fn caption(&mut self, image: &ImageHandle) -> Result<String, CollaboratorError> {
        self.template
            .run(&[("image", &image.path.to_string_lossy())], None)
    }
}

/// Pipes the text to the speech template's stdin.
pub struct CommandSpeech {
    template: ShellTemplate,
}

impl CommandSpeech {
    pub fn new(template: ShellTemplate) -> Self {
        Self { template }
    }
}

impl SpeechSink for CommandSpeech {
    fn speak(&mut self, text: &str) -> Result<(), CollaboratorError> {
        self.template.run(&[], Some(text)).map(drop)
    }
}

pub struct CommandTone {
    template: ShellTemplate,
}

impl CommandTone {
    pub fn new(template: ShellTemplate) -> Self {
        Self { template }
    }
}

impl TonePlayer for CommandTone {
    fn play(&mut self, tone: Tone) -> Result<(), CollaboratorError> {
        let freq = tone.frequency_hz.to_string();
        let duration = format!("{:.3}", tone.duration.as_secs_f32());
        self.template
            .run(&[("freq", &freq), ("duration", &duration)], None)
            .map(drop)
    }
}

/// Log-only capture: reports the request and hands back a placeholder image.
pub struct LogCapture;

impl FrameCapture for LogCapture {
    fn capture(&mut self) -> Result<ImageHandle, CollaboratorError> {
        info!("capture requested (no --capture-cmd configured)");
        Ok(ImageHandle::external("unconfigured-capture"))
    }
}

/// Log-only captioner: yields an empty caption, which is never spoken.
pub struct LogCaptioner;

impl Captioner for LogCaptioner {
    fn caption(&mut self, image: &ImageHandle) -> Result<String, CollaboratorError> {
        info!(image = %image.path.display(), "caption requested (no --caption-cmd configured)");
        Ok(String::new())
    }
}

pub struct LogSpeech;

impl SpeechSink for LogSpeech {
    fn speak(&mut self, text: &str) -> Result<(), CollaboratorError> {
        info!("say: {text}");
        Ok(())
    }
}

pub struct LogTone;

impl TonePlayer for LogTone {
    fn play(&mut self, tone: Tone) -> Result<(), CollaboratorError> {
        debug!(
            frequency_hz = tone.frequency_hz,
            duration_ms = tone.duration.as_millis() as u64,
            "beep"
        );
        Ok(())
    }
}

/// The four collaborators handed to the orchestrator.
pub struct Collaborators {
    pub capture: Box<dyn FrameCapture>,
    pub captioner: Box<dyn Captioner>,
    pub speech: Box<dyn SpeechSink>,
    pub tone: Box<dyn TonePlayer>,
}

impl Collaborators {
    /// Command-backed collaborators where a template is configured, log-only otherwise.
    pub fn from_args(args: &CollaboratorArgs, capture_dir: &Path) -> Self {
        let capture: Box<dyn FrameCapture> = match &args.capture_cmd {
            Some(cmd) => Box::new(CommandCapture::new(ShellTemplate::new(cmd), capture_dir)),
            None => Box::new(LogCapture),
        };
        let captioner: Box<dyn Captioner> = match &args.caption_cmd {
            Some(cmd) => Box::new(CommandCaptioner::new(ShellTemplate::new(cmd))),
            None => Box::new(LogCaptioner),
        };
        let speech: Box<dyn SpeechSink> = match &args.speech_cmd {
            Some(cmd) => Box::new(CommandSpeech::new(ShellTemplate::new(cmd))),
            None => Box::new(LogSpeech),
        };
        let tone: Box<dyn TonePlayer> = match &args.tone_cmd {
            Some(cmd) => Box::new(CommandTone::new(ShellTemplate::new(cmd))),
            None => Box::new(LogTone),
        };
        Self {
            capture,
            captioner,
            speech,
            tone,
        }
    }

    pub fn log_only() -> Self {
        Self::from_args(&CollaboratorArgs::default(), Path::new("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_caption_boilerplate() {
        assert_eq!(
            clean_caption("  A photo of a door with a sign \n"),
            Some("a door with a sign".into())
        );
        assert_eq!(clean_caption("an image of stairs"), Some("stairs".into()));
        assert_eq!(clean_caption("The photo of"), None);
        assert_eq!(clean_caption("   "), None);
        assert_eq!(clean_caption("photography studio"), Some("photography studio".into()));
    }

    #[test]
    fn tone_table_matches_levels() {
        assert_eq!(tone_for(BeepLevel::Far).frequency_hz, 440);
        assert_eq!(tone_for(BeepLevel::Close).duration, Duration::from_millis(500));
        assert_eq!(tone_for(BeepLevel::Mismatch).frequency_hz, 300);
    }

    #[test]
    fn templates_quote_substituted_values() {
        let template = ShellTemplate::new("caption --file {image}");
        assert_eq!(
            template.render(&[("image", "/tmp/it's.jpg")]),
            r"caption --file '/tmp/it'\''s.jpg'"
        );
    }

    #[test]
    fn command_collaborators_run_through_the_shell() {
        let dir = tempfile::tempdir().unwrap();
        let mut capture = CommandCapture::new(ShellTemplate::new("printf jpeg > {output}"), dir.path());
        let image = capture.capture().unwrap();
        assert!(image.path.starts_with(dir.path()));

        let mut captioner = CommandCaptioner::new(ShellTemplate::new("echo 'a photo of' $(cat {image})"));
        let caption = captioner.caption(&image).unwrap();
        assert_eq!(clean_caption(&caption), Some("jpeg".into()));

        let spoken = dir.path().join("spoken.txt");
        let mut speech = CommandSpeech::new(ShellTemplate::new(format!(
            "cat > '{}'",
            spoken.display()
        )));
        speech.speak("hello there").unwrap();
        assert_eq!(std::fs::read_to_string(&spoken).unwrap(), "hello there");
    }

    #[test]
    fn failures_carry_the_exit_status() {
        let mut tone = CommandTone::new(ShellTemplate::new("echo boom >&2; exit 3"));
        match tone.play(tone_for(BeepLevel::Near)) {
            Err(CollaboratorError::Failed { stderr, .. }) => assert_eq!(stderr, "boom"),
            other => panic!("unexpected result {other:?}"),
        }

        let dir = tempfile::tempdir().unwrap();
        let mut capture = CommandCapture::new(ShellTemplate::new("true"), dir.path());
        assert!(matches!(
            capture.capture(),
            Err(CollaboratorError::MissingImage(_))
        ));
    }

    #[test]
    fn failed_capture_leaves_no_partial_image() {
        let dir = tempfile::tempdir().unwrap();
        let mut capture =
            CommandCapture::new(ShellTemplate::new("printf half > {output}; exit 1"), dir.path());
        assert!(matches!(
            capture.capture(),
            Err(CollaboratorError::Failed { .. })
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn only_temporary_images_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kept.jpg");
        std::fs::write(&path, b"jpeg").unwrap();

        ImageHandle::external(&path).discard();
        assert!(path.exists());
        ImageHandle::temporary(&path).discard();
        assert!(!path.exists());
        ImageHandle::temporary(&path).discard();
    }
}
