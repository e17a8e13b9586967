use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str =
  "voxcal-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "VOXCAL_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "VOXCAL_TIME_CONFIG";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

/// Zone used to read and print wall-clock times. Resolved once per process.
pub fn local_timezone() -> &'static Tz {
  static LOCAL_TZ: OnceLock<Tz> =
    OnceLock::new();
  LOCAL_TZ.get_or_init(
    resolve_local_timezone
  )
}

#[must_use]
pub fn to_local_date(
  dt: DateTime<Utc>
) -> NaiveDate {
  dt.with_timezone(local_timezone())
    .date_naive()
}

/// `Mon, Mar 2, 2026`
#[must_use]
pub fn format_local_date(
  dt: DateTime<Utc>
) -> String {
  dt.with_timezone(local_timezone())
    .format("%a, %b %-d, %Y")
    .to_string()
}

/// `9:05 AM`
#[must_use]
pub fn format_local_time(
  dt: DateTime<Utc>
) -> String {
  dt.with_timezone(local_timezone())
    .format("%-I:%M %p")
    .to_string()
}

fn resolve_local_timezone() -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) =
      parse_timezone(&raw, TIMEZONE_ENV_VAR)
  {
    return tz;
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  tracing::debug!(
    "no timezone configured; using UTC"
  );
  chrono_tz::UTC
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &PathBuf
) -> Option<Tz> {
  if !path.exists() {
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured local timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

fn local_to_utc(
  local_naive: NaiveDateTime,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  match local_timezone()
    .from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      Ok(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        context,
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      Ok(first.min(second).with_timezone(&Utc))
    }
    | LocalResult::None => {
      Err(anyhow!(
        "local time does not exist \
         in the configured \
         timezone: {context}"
      ))
    }
  }
}

fn local_midnight(
  date: NaiveDate,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  let midnight = date
    .and_hms_opt(0, 0, 0)
    .ok_or_else(|| {
      anyhow!(
        "failed to construct \
         midnight for {context}"
      )
    })?;
  local_to_utc(midnight, context)
}

/// Parses the date expressions accepted by `--start` and `--end`.
#[tracing::instrument(skip(now), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  now: DateTime<Utc>
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();
  let local_today = now
    .with_timezone(local_timezone())
    .date_naive();

  match lower.as_str() {
    | "now" => return Ok(now),
    | "today" => {
      return local_midnight(
        local_today,
        "today"
      );
    }
    | "tomorrow" => {
      return local_midnight(
        local_today + Duration::days(1),
        "tomorrow"
      );
    }
    | _ => {}
  }

  if let Some(target) =
    parse_weekday_name(&lower)
  {
    return local_midnight(
      next_weekday_date(
        local_today,
        target
      ),
      "weekday"
    );
  }

  if let Some((hour, minute)) =
    parse_clock_time(token)
  {
    let local_now = now
      .with_timezone(local_timezone())
      .naive_local();
    let mut candidate = local_today
      .and_hms_opt(hour, minute, 0)
      .ok_or_else(|| {
        anyhow!(
          "invalid clock time: {token}"
        )
      })?;
    if candidate <= local_now {
      candidate += Duration::days(1);
    }
    return local_to_utc(
      candidate,
      "clock-time"
    );
  }

  if let Some(caps) = relative_re()?
    .captures(token)
  {
    let num: i64 = caps["num"]
      .parse()
      .context(
        "invalid relative number"
      )?;
    let duration = match &caps["unit"]
    {
      | "d" => Duration::try_days(num),
      | "h" => Duration::try_hours(num),
      | _ => Duration::try_minutes(num)
    };
    let shifted =
      duration.and_then(|duration| {
        if &caps["sign"] == "-" {
          now.checked_sub_signed(
            duration
          )
        } else {
          now.checked_add_signed(
            duration
          )
        }
      });

    return shifted.ok_or_else(|| {
      anyhow!(
        "relative offset out of \
         range: {token}"
      )
    });
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  for fmt in
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
  {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return local_to_utc(ndt, fmt);
    }
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return local_midnight(
      date, "date"
    );
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     now/today/tomorrow, weekday \
     names (e.g. monday), clock \
     times (e.g. 3:30pm or 15:30), \
     +Nd/+Nh/+Nm, RFC3339, \
     YYYY-MM-DD, YYYY-MM-DDTHH:MM, \
     YYYY-MM-DD HH:MM"
  })
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thurs" => {
      Some(Weekday::Thu)
    }
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

/// Always strictly after `from`, so naming today's weekday means next week.
fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = i64::from(
    from.weekday().num_days_from_monday()
  );
  let target_idx = i64::from(
    target.num_days_from_monday()
  );
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from + Duration::days(delta)
}

fn relative_re()
-> anyhow::Result<&'static Regex> {
  static RELATIVE_RE: OnceLock<
    Option<Regex>
  > = OnceLock::new();
  RELATIVE_RE
    .get_or_init(|| {
      Regex::new(
        r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dhm])$"
      )
      .ok()
    })
    .as_ref()
    .ok_or_else(|| {
      anyhow!(
        "internal regex compile \
         failure"
      )
    })
}

fn clock_re() -> Option<&'static Regex>
{
  static CLOCK_RE: OnceLock<
    Option<Regex>
  > = OnceLock::new();
  CLOCK_RE
    .get_or_init(|| {
      Regex::new(
        r"(?i)^(?P<hour>\d{1,2}):(?P<minute>\d{2})\s*(?P<ampm>[ap]m)?$"
      )
      .ok()
    })
    .as_ref()
}

fn parse_clock_time(
  token: &str
) -> Option<(u32, u32)> {
  let captures =
    clock_re()?.captures(token.trim())?;

  let raw_hour: u32 =
    captures["hour"].parse().ok()?;
  let minute: u32 =
    captures["minute"].parse().ok()?;
  if minute > 59 {
    return None;
  }

  let Some(ampm) = captures.name("ampm")
  else {
    return (raw_hour <= 23)
      .then_some((raw_hour, minute));
  };

  if raw_hour == 0 || raw_hour > 12 {
    return None;
  }
  let pm = ampm
    .as_str()
    .eq_ignore_ascii_case("pm");
  let hour = match (raw_hour, pm) {
    | (12, false) => 0,
    | (12, true) => 12,
    | (h, false) => h,
    | (h, true) => h + 12
  };
  Some((hour, minute))
}
