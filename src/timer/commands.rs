//! Line-oriented command surface used by the host binary, plus an observer
//! that mirrors tracker callbacks as JSON event lines.

use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use serde_json::{json, Value};

use crate::{
    models::{FieldValue, Session, StudentInfo, SuspiciousActivity, TrackingMode},
    tracker::{ClipboardAction, TrackerObserver},
};

use super::{TrackerHandle, WindowDimensions, WindowSize};

#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    Activity,
    Blur,
    Focus,
    Visibility { hidden: bool },
    Resize(WindowSize),
    Window(WindowDimensions),
    Fullscreen(bool),
    Clipboard(ClipboardAction),
    Mode(TrackingMode),
    SessionStart,
    SessionEnd,
    Reset,
    Increment { key: String, amount: f64 },
    Set { key: String, raw: String },
    Student(StudentInfo),
    Link,
    Status,
    Answer(bool),
    Quit,
}

impl HostCommand {
    /// Commands that may wait on a confirmation and so must not block the
    /// input loop.
    pub fn may_need_confirmation(&self) -> bool {
        matches!(self, HostCommand::Mode(_) | HostCommand::Reset)
    }
}

fn parse_number<T: FromStr>(raw: Option<&str>, what: &str) -> Result<T> {
    raw.ok_or_else(|| anyhow!("missing {what}"))?
        .parse()
        .map_err(|_| anyhow!("invalid {what}"))
}

impl FromStr for HostCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let Some(verb) = parts.next() else {
            bail!("empty command");
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "activity" => HostCommand::Activity,
            "blur" => HostCommand::Blur,
            "focus" => HostCommand::Focus,
            "hidden" => HostCommand::Visibility { hidden: true },
            "shown" => HostCommand::Visibility { hidden: false },
            "resize" => HostCommand::Resize(WindowSize::new(
                parse_number(parts.next(), "width")?,
                parse_number(parts.next(), "height")?,
            )),
            "window" => HostCommand::Window(WindowDimensions {
                outer_width: parse_number(parts.next(), "outer width")?,
                outer_height: parse_number(parts.next(), "outer height")?,
                inner_width: parse_number(parts.next(), "inner width")?,
                inner_height: parse_number(parts.next(), "inner height")?,
            }),
            "fullscreen" => match parts.next() {
                Some("on") => HostCommand::Fullscreen(true),
                Some("off") => HostCommand::Fullscreen(false),
                _ => bail!("usage: fullscreen on|off"),
            },
            "copy" => HostCommand::Clipboard(ClipboardAction::Copy),
            "paste" => HostCommand::Clipboard(ClipboardAction::Paste),
            "mode" => HostCommand::Mode(
                parts
                    .next()
                    .ok_or_else(|| anyhow!("usage: mode normal|classroom|verification"))?
                    .parse()?,
            ),
            "session" => match parts.next() {
                Some("start") => HostCommand::SessionStart,
                Some("end") => HostCommand::SessionEnd,
                _ => bail!("usage: session start|end"),
            },
            "reset" => HostCommand::Reset,
            "inc" => {
                let key = parts.next().context("usage: inc KEY [AMOUNT]")?;
                let amount = match parts.next() {
                    Some(raw) => parse_number(Some(raw), "amount")?,
                    None => 1.0,
                };
                HostCommand::Increment {
                    key: key.to_string(),
                    amount,
                }
            }
            "set" => {
                let key = parts.next().context("usage: set KEY VALUE")?;
                let raw = parts.collect::<Vec<_>>().join(" ");
                if raw.is_empty() {
                    bail!("usage: set KEY VALUE");
                }
                HostCommand::Set {
                    key: key.to_string(),
                    raw,
                }
            }
            "student" => {
                let (Some(first), Some(last), Some(class)) =
                    (parts.next(), parts.next(), parts.next())
                else {
                    bail!("usage: student FIRST LAST CLASS");
                };
                HostCommand::Student(StudentInfo::new(first, last, class))
            }
            "link" => HostCommand::Link,
            "status" => HostCommand::Status,
            "yes" | "y" => HostCommand::Answer(true),
            "no" | "n" => HostCommand::Answer(false),
            "quit" | "exit" => HostCommand::Quit,
            other => bail!("unknown command '{other}'"),
        };

        Ok(command)
    }
}

/// Runs one command against a tracker and returns a JSON reply.
/// `Answer` and `Quit` belong to the input loop and are rejected here.
pub async fn dispatch(handle: &TrackerHandle, command: HostCommand) -> Result<Value> {
    let reply = match command {
        HostCommand::Activity => {
            handle.register_activity().await;
            json!({ "ok": true })
        }
        HostCommand::Blur => json!({ "counted": handle.focus_lost().await }),
        HostCommand::Focus => json!({ "lostSecs": handle.focus_gained().await }),
        HostCommand::Visibility { hidden } => {
            handle.visibility_changed(hidden).await;
            json!({ "hidden": hidden })
        }
        HostCommand::Resize(size) => json!({ "suspicious": handle.window_resized(size).await }),
        HostCommand::Window(dims) => {
            json!({ "devtoolsOpened": handle.observe_window_dimensions(dims).await })
        }
        HostCommand::Fullscreen(on) => {
            handle.fullscreen_changed(on).await;
            json!({ "fullscreen": on })
        }
        HostCommand::Clipboard(action) => {
            json!({ "recorded": handle.clipboard_used(action).await })
        }
        HostCommand::Mode(target) => {
            let outcome = handle.set_mode(target).await?;
            json!({ "outcome": format!("{outcome:?}"), "mode": handle.mode().await })
        }
        HostCommand::SessionStart => json!({ "sessionId": handle.start_session().await }),
        HostCommand::SessionEnd => json!({ "link": handle.end_session().await? }),
        HostCommand::Reset => json!({ "reset": handle.reset().await }),
        HostCommand::Increment { key, amount } => {
            json!({ "key": key, "value": handle.increment_field(&key, amount).await })
        }
        HostCommand::Set { key, raw } => {
            json!({ "key": key, "accepted": handle.set_field_input(&key, &raw).await })
        }
        HostCommand::Student(info) => json!({ "saved": handle.save_student_info(info).await }),
        HostCommand::Link => json!({ "link": handle.certificate_link().await? }),
        HostCommand::Status => serde_json::to_value(handle.status().await)?,
        HostCommand::Answer(_) | HostCommand::Quit => {
            bail!("command is handled by the input loop")
        }
    };

    Ok(reply)
}

/// Prints every tracker callback as a one-line JSON event on stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleObserver;

impl ConsoleObserver {
    fn emit(&self, event: &str, payload: impl Serialize) {
        println!("{}", json!({ "event": event, "payload": payload }));
    }
}

impl TrackerObserver for ConsoleObserver {
    fn on_timer_tick(&self, elapsed_secs: u64) {
        self.emit("timer-tick", json!({ "elapsedSecs": elapsed_secs }));
    }

    fn on_field_update(&self, key: &str, value: &FieldValue) {
        self.emit("field-updated", json!({ "key": key, "value": value }));
    }

    fn on_reset(&self) {
        self.emit("reset", json!({}));
    }

    fn on_session_start(&self, session: &Session) {
        self.emit("session-started", session);
    }

    fn on_session_end(&self, session: &Session) {
        self.emit("session-ended", session);
    }

    fn on_mode_change(&self, from: TrackingMode, to: TrackingMode) {
        self.emit("mode-changed", json!({ "from": from, "to": to }));
    }

    fn on_focus_lost(&self, count: u64) {
        self.emit("focus-lost", json!({ "count": count }));
    }

    fn on_focus_restored(&self, lost_secs: u64) {
        self.emit("focus-restored", json!({ "lostSecs": lost_secs }));
    }

    fn on_suspicious_activity(&self, activity: &SuspiciousActivity) {
        self.emit("suspicious-activity", activity);
    }

    fn on_warning(&self, message: &str) {
        self.emit("warning", json!({ "message": message }));
    }

    fn on_storage_error(&self, error: &anyhow::Error) {
        self.emit("storage-error", json!({ "error": format!("{error:#}") }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signals() {
        assert_eq!("blur".parse::<HostCommand>().unwrap(), HostCommand::Blur);
        assert_eq!(
            "resize 1024 768".parse::<HostCommand>().unwrap(),
            HostCommand::Resize(WindowSize::new(1024, 768))
        );
        assert_eq!(
            "fullscreen off".parse::<HostCommand>().unwrap(),
            HostCommand::Fullscreen(false)
        );
        assert_eq!(
            "MODE Verification".parse::<HostCommand>().unwrap(),
            HostCommand::Mode(TrackingMode::Verification)
        );
    }

    #[test]
    fn parses_field_updates() {
        assert_eq!(
            "inc ex".parse::<HostCommand>().unwrap(),
            HostCommand::Increment {
                key: "ex".into(),
                amount: 1.0
            }
        );
        assert_eq!(
            "set notes due parole".parse::<HostCommand>().unwrap(),
            HostCommand::Set {
                key: "notes".into(),
                raw: "due parole".into()
            }
        );
        assert_eq!(
            "set notes 42".parse::<HostCommand>().unwrap(),
            HostCommand::Set {
                key: "notes".into(),
                raw: "42".into()
            }
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!("".parse::<HostCommand>().is_err());
        assert!("resize 10".parse::<HostCommand>().is_err());
        assert!("mode party".parse::<HostCommand>().is_err());
        assert!("student Ada".parse::<HostCommand>().is_err());
        assert!("teleport".parse::<HostCommand>().is_err());
    }

    #[test]
    fn only_mode_and_reset_may_wait_on_the_user() {
        assert!(HostCommand::Reset.may_need_confirmation());
        assert!(HostCommand::Mode(TrackingMode::Normal).may_need_confirmation());
        assert!(!HostCommand::Blur.may_need_confirmation());
    }
}
