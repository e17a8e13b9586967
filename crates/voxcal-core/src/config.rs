use std::collections::BTreeMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  warn
};

const RC_ENV_VAR: &str = "VOXCALRC";
const RC_FILE_NAME: &str = ".voxcalrc";

/// Every key VoxCal reads, with its default.
const SETTINGS: [(&str, &str); 8] = [
  ("data.location", "~/.voxcal"),
  ("color", "on"),
  ("speech.command", "espeak"),
  ("speech.language", "en-US"),
  ("speech.pitch", "1.0"),
  ("speech.rate", "1.0"),
  ("sound.command", "aplay"),
  ("snooze.replace_chain", "off")
];

#[derive(Debug, Clone)]
pub struct Config {
  map:    BTreeMap<String, String>,
  source: Option<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    Self {
      map:    SETTINGS
        .iter()
        .map(|(k, v)| {
          (k.to_string(), v.to_string())
        })
        .collect(),
      source: None
    }
  }
}

impl Config {
  /// Defaults overlaid with the rc file, if any. An explicit `rc_override`
  /// must exist; the implicit `~/.voxcalrc` may not.
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let Some(path) = rc_path(rc_override)
    else {
      debug!("no voxcalrc; using defaults");
      return Ok(cfg);
    };

    info!(rc = %path.display(), "loading voxcalrc");
    let text = fs::read_to_string(&path)
      .with_context(|| {
        format!(
          "failed to read {}",
          path.display()
        )
      })?;
    for (key, value) in
      parse_rc(&text, &path)?
    {
      cfg.set(key, value);
    }
    cfg.source = Some(path);

    Ok(cfg)
  }

  /// `rc.` prefixed keys from the command line win over the file.
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.set(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  /// Missing keys read as `false`; anything that is not a recognised
  /// boolean word is an error.
  pub fn get_bool(
    &self,
    key: &str
  ) -> anyhow::Result<bool> {
    match self.map.get(key) {
      | None => Ok(false),
      | Some(raw) => {
        parse_bool(raw).ok_or_else(|| {
          anyhow!(
            "{key} must be on or off, \
             got {raw:?}"
          )
        })
      }
    }
  }

  /// Sorted by key.
  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  pub fn source(
    &self
  ) -> Option<&Path> {
    self.source.as_deref()
  }

  fn set(
    &mut self,
    key: String,
    value: String
  ) {
    if !SETTINGS
      .iter()
      .any(|(known, _)| *known == key)
    {
      warn!(key = %key, "unknown setting; ignored by voxcal");
    }
    self.map.insert(key, value);
  }
}

/// `key = value` lines; `#` starts a comment anywhere on a line.
fn parse_rc(
  text: &str,
  origin: &Path
) -> anyhow::Result<Vec<(String, String)>>
{
  let mut pairs = Vec::new();
  for (idx, raw_line) in
    text.lines().enumerate()
  {
    let line = raw_line
      .split_once('#')
      .map_or(raw_line, |(before, _)| {
        before
      })
      .trim();
    if line.is_empty() {
      continue;
    }

    let (k, v) =
      line.split_once('=').ok_or_else(
        || {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            origin.display(),
            idx + 1,
            raw_line
          )
        }
      )?;
    let key = k.trim();
    if key.is_empty() {
      return Err(anyhow!(
        "missing key at {}:{}",
        origin.display(),
        idx + 1
      ));
    }
    pairs.push((
      key.to_string(),
      v.trim().to_string()
    ));
  }
  Ok(pairs)
}

/// `--rc-file`, then `$VOXCALRC` (`/dev/null` disables the rc file), then
/// `~/.voxcalrc` when it exists.
fn rc_path(
  rc_override: Option<&Path>
) -> Option<PathBuf> {
  if let Some(path) = rc_override {
    return Some(expand_tilde(path));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return None;
    }
    return Some(expand_tilde(
      Path::new(&rc_env)
    ));
  }

  dirs::home_dir()
    .map(|home| home.join(RC_FILE_NAME))
    .filter(|candidate| {
      candidate.exists()
    })
}

/// `--data` wins over `data.location`. The directory is created when
/// missing.
#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = match (
    override_dir,
    cfg.get("data.location")
  ) {
    | (Some(path), _) => {
      path.to_path_buf()
    }
    | (None, Some(location)) => {
      expand_tilde(Path::new(&location))
    }
    | (None, None) => {
      dirs::home_dir()
        .map(|home| home.join(".voxcal"))
        .ok_or_else(|| {
          anyhow!(
            "cannot determine home \
             directory"
          )
        })?
    }
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> Option<bool> {
  match s
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    | "1" | "y" | "yes" | "on"
    | "true" => Some(true),
    | "0" | "n" | "no" | "off"
    | "false" => Some(false),
    | _ => None
  }
}
