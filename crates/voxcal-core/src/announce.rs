use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::config::Config;

pub trait SpeechAnnouncer {
    fn speak(&self, text: &str) -> anyhow::Result<()>;
}

pub trait SoundPlayer {
    fn play(&self, path: &Path) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechSettings {
    pub language: String,
    pub pitch: f32,
    pub rate: f32,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            pitch: 1.0,
            rate: 1.0,
        }
    }
}

impl SpeechSettings {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let mut settings = Self::default();
        if let Some(language) = cfg.get("speech.language") {
            settings.language = language;
        }
        if let Some(pitch) = cfg.get("speech.pitch") {
            settings.pitch = pitch
                .parse()
                .with_context(|| format!("invalid speech.pitch: {pitch}"))?;
        }
        if let Some(rate) = cfg.get("speech.rate") {
            settings.rate = rate
                .parse()
                .with_context(|| format!("invalid speech.rate: {rate}"))?;
        }
        Ok(settings)
    }
}

/// Speaks through an espeak-compatible program (`-v`, `-p`, `-s`).
#[derive(Debug, Clone)]
pub struct CommandAnnouncer {
    program: Option<String>,
    settings: SpeechSettings,
}

impl CommandAnnouncer {
    pub fn new(program: Option<String>, settings: SpeechSettings) -> Self {
        Self { program, settings }
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let program = command_setting(cfg, "speech.command", "espeak");
        let settings = SpeechSettings::from_config(cfg)?;
        debug!(?program, ?settings, "initialized speech announcer");
        Ok(Self::new(program, settings))
    }

    fn args(&self, text: &str) -> Vec<String> {
        // espeak pitch is 0..=99 around 50, speed is words per minute around 175.
        let pitch = (50.0 * self.settings.pitch).round().clamp(0.0, 99.0) as u32;
        let speed = (175.0 * self.settings.rate).round().max(80.0) as u32;
        vec![
            "-v".to_string(),
            self.settings.language.to_ascii_lowercase(),
            "-p".to_string(),
            pitch.to_string(),
            "-s".to_string(),
            speed.to_string(),
            text.to_string(),
        ]
    }
}

impl SpeechAnnouncer for CommandAnnouncer {
    #[instrument(skip(self))]
    fn speak(&self, text: &str) -> anyhow::Result<()> {
        let Some(program) = self.program.as_deref() else {
            debug!("speech disabled; skipping");
            return Ok(());
        };
        run_command(program, &self.args(text))
    }
}

/// Plays a local file through an external player such as `aplay`.
#[derive(Debug, Clone)]
pub struct CommandSoundPlayer {
    program: Option<String>,
}

impl CommandSoundPlayer {
    pub fn new(program: Option<String>) -> Self {
        Self { program }
    }

    pub fn from_config(cfg: &Config) -> Self {
        let program = command_setting(cfg, "sound.command", "aplay");
        debug!(?program, "initialized sound player");
        Self::new(program)
    }
}

impl SoundPlayer for CommandSoundPlayer {
    #[instrument(skip(self), fields(path = %path.display()))]
    fn play(&self, path: &Path) -> anyhow::Result<()> {
        let Some(program) = self.program.as_deref() else {
            debug!("sound playback disabled; skipping");
            return Ok(());
        };
        if !path.is_file() {
            return Err(anyhow!("sound file does not exist: {}", path.display()));
        }
        run_command(program, &[path.to_string_lossy().to_string()])
    }
}

fn command_setting(cfg: &Config, key: &str, default: &str) -> Option<String> {
    let value = cfg.get(key).unwrap_or_else(|| default.to_string());
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "off" | "none" | "false" | "0" => None,
        _ => Some(value.trim().to_string()),
    }
}

fn run_command(program: &str, args: &[String]) -> anyhow::Result<()> {
    info!(program, "running external command");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .with_context(|| format!("failed to run {program}"))?;

    if !output.status.success() {
        return Err(anyhow!(
            "{program} failed with status {}",
            output
                .status
                .code()
                .map(|code| code.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        ));
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stderr.is_empty() {
        warn!(program, stderr = %stderr, "command wrote stderr");
    }

    Ok(())
}
