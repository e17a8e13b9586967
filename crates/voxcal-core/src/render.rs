use std::io::{self, IsTerminal, Write};

use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::{format_local_date, format_local_time};
use crate::event::{Alarm, Event};
use crate::ledger::AlarmState;
use crate::notify::ScheduledNotification;

const SHORT_ID_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            color: cfg.get_bool("color")?,
        })
    }

    #[tracing::instrument(skip_all)]
    pub fn print_event_table(
        &self,
        rows: &[(Event, AlarmState)],
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if rows.is_empty() {
            writeln!(out, "No events.")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Date".to_string(),
            "Time".to_string(),
            "Title".to_string(),
            "Reminder".to_string(),
            "Alarm".to_string(),
        ];

        let table = rows
            .iter()
            .map(|(event, state)| {
                let time = if event.is_all_day {
                    "all day".to_string()
                } else {
                    format_local_time(event.start_date)
                };
                let date = format_local_date(event.start_date);
                let date = if event.end_date < now {
                    self.paint(&date, "90")
                } else {
                    date
                };
                vec![
                    self.paint(short_id(&event.id), "33"),
                    date,
                    time,
                    event.title.clone(),
                    event.reminder_type.as_str().to_string(),
                    self.paint_state(*state),
                ]
            })
            .collect();

        write_table(&mut out, headers, table)?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(id = %event.id))]
    pub fn print_event_info(
        &self,
        event: &Event,
        state: AlarmState,
        alarms: &[Alarm],
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id        {}", event.id)?;
        writeln!(out, "title     {}", event.title)?;
        writeln!(
            out,
            "start     {} {}",
            format_local_date(event.start_date),
            format_local_time(event.start_date)
        )?;
        writeln!(
            out,
            "end       {} {}",
            format_local_date(event.end_date),
            format_local_time(event.end_date)
        )?;
        if event.is_all_day {
            writeln!(out, "all-day   yes")?;
        }
        if let Some(notes) = &event.notes {
            writeln!(out, "notes     {notes}")?;
        }
        writeln!(out, "reminder  {}", event.reminder_type.as_str())?;
        if let Some(sound) = &event.sound {
            writeln!(out, "sound     {sound}")?;
        }
        writeln!(out, "alarm     {}", self.paint_state(state))?;

        for alarm in alarms {
            writeln!(
                out,
                "  {:<9} {} {}",
                alarm.label,
                format_local_time(alarm.time),
                short_id(&alarm.id)
            )?;
        }

        Ok(())
    }

    #[tracing::instrument(skip_all)]
    pub fn print_alarm_table(&self, alarms: &[Alarm], events: &[Event]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if alarms.is_empty() {
            writeln!(out, "No alarms set.")?;
            return Ok(());
        }

        let headers = vec![
            "Alarm".to_string(),
            "Event".to_string(),
            "Fires".to_string(),
            "Label".to_string(),
            "Title".to_string(),
        ];
        let rows = alarms
            .iter()
            .map(|alarm| {
                let title = events
                    .iter()
                    .find(|e| e.id == alarm.event_id)
                    .map(|e| e.title.clone())
                    .unwrap_or_else(|| self.paint("(deleted)", "31"));
                vec![
                    short_id(&alarm.id).to_string(),
                    self.paint(short_id(&alarm.event_id), "33"),
                    format!(
                        "{} {}",
                        format_local_date(alarm.time),
                        format_local_time(alarm.time)
                    ),
                    alarm.label.clone(),
                    title,
                ]
            })
            .collect();

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    pub fn print_notifications(&self, delivered: &[ScheduledNotification]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if delivered.is_empty() {
            writeln!(out, "Nothing due.")?;
            return Ok(());
        }
        for notification in delivered {
            let request = &notification.request;
            writeln!(
                out,
                "{} {}",
                self.paint(&format_local_time(request.fire_at), "36"),
                self.paint(&request.title, "1")
            )?;
            if !request.body.is_empty() {
                writeln!(out, "    {}", request.body)?;
            }
            writeln!(
                out,
                "    voxcal ack {}",
                short_id(&request.data.event_id)
            )?;
        }
        Ok(())
    }

    fn paint_state(&self, state: AlarmState) -> String {
        let code = match state {
            AlarmState::Scheduled { .. } => "32",
            AlarmState::Expired => "31",
            AlarmState::None => "90",
            AlarmState::Acknowledged | AlarmState::Cancelled => "0",
        };
        self.paint(&state.to_string(), code)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|h| UnicodeWidthStr::width(h.as_str()))
        .collect();

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, width) in headers.iter().zip(&widths) {
        write!(writer, "{header:width$} ", width = *width)?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(&widths) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_pads_to_visible_width() {
        let mut buf = Vec::new();
        write_table(
            &mut buf,
            vec!["ID".to_string(), "Title".to_string()],
            vec![vec!["\x1b[33mabc\x1b[0m".to_string(), "Standup".to_string()]],
        )
        .expect("write table");
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ID  Title   ");
        assert_eq!(lines[1], "--- ------- ");
        assert_eq!(strip_ansi(lines[2]), "abc Standup ");
    }

    #[test]
    fn short_ids_never_split_short_strings() {
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id("0123456789"), "01234567");
    }
}
