//! Operator event injection: the command type shared by the stdin console
//! and the dashboard WebSocket, plus the interactive line parser.
//!
//! Malformed commands are rejected before they reach the generator; a bad
//! parameter never mutates simulation state.

use std::fmt;

use serde::Deserialize;

// ---------------------------------------------------------------------------
// Command types
// ---------------------------------------------------------------------------

/// Sensor that can be forced into (or out of) a fault state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Chlorine,
    Flow,
    Turbidity,
}

impl SensorKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chlorine" => Some(Self::Chlorine),
            "flow" => Some(Self::Flow),
            "turbidity" => Some(Self::Turbidity),
            _ => None,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chlorine => write!(f, "chlorine"),
            Self::Flow => write!(f, "flow"),
            Self::Turbidity => write!(f, "turbidity"),
        }
    }
}

/// A scenario command. The wire shape matches the dashboard JSON:
/// `{"action": "rain", "peak": 400}`, `{"action": "fault", "sensor": "flow"}`,
/// `{"action": "set_coil", "coil": 0, "value": 1}`, ...
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    Rain {
        #[serde(default = "default_rain_peak")]
        peak: f64,
        #[serde(default = "default_rain_duration")]
        duration_hours: f64,
    },
    DoseOn,
    DoseOff,
    Fault {
        #[serde(default = "default_fault_sensor")]
        sensor: SensorKind,
    },
    Clear {
        #[serde(default = "default_fault_sensor")]
        sensor: SensorKind,
    },
    Glitch,
    SetCoil {
        coil: usize,
        value: u8,
    },
}

fn default_rain_peak() -> f64 {
    400.0
}

fn default_rain_duration() -> f64 {
    6.0
}

fn default_fault_sensor() -> SensorKind {
    SensorKind::Chlorine
}

impl Command {
    /// Parameter range check, applied on every ingress path before the
    /// command touches any state.
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            Command::Rain {
                peak,
                duration_hours,
            } => {
                if !peak.is_finite() || peak <= 0.0 {
                    return Err(format!("rain peak must be positive, got {peak}"));
                }
                if !duration_hours.is_finite() || duration_hours <= 0.0 {
                    return Err(format!(
                        "rain duration must be positive, got {duration_hours}"
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Short human-readable form for the dashboard event log.
    pub fn describe(&self) -> String {
        match self {
            Command::Rain {
                peak,
                duration_hours,
            } => format!("rain event: peak={peak:.0} NTU, duration={duration_hours:.1}h"),
            Command::DoseOn => "chlorine dosing enabled".to_string(),
            Command::DoseOff => "chlorine dosing disabled".to_string(),
            Command::Fault { sensor } => format!("fault injected: {sensor}"),
            Command::Clear { sensor } => format!("fault cleared: {sensor}"),
            Command::Glitch => "data glitch injected (30 sim-seconds)".to_string(),
            Command::SetCoil { coil, value } => format!("coil {coil} set {value}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Interactive stdin commands
// ---------------------------------------------------------------------------

/// What a console line asks for. `Status` and `Help` are answered locally;
/// `Inject` goes down the injection channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Inject(Command),
    Status,
    Help,
}

pub const HELP: &str =
    "Commands: rain [ntu], dose on/off, fault <sensor>, clear <sensor>, glitch, status, help";

/// Parse one interactive line. `Ok(None)` means a blank line; `Err` carries
/// the message to print back at the console.
pub fn parse_console_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let lower = line.trim().to_lowercase();
    let mut parts = lower.split_whitespace();
    let Some(cmd) = parts.next() else {
        return Ok(None);
    };

    let parsed = match cmd {
        "rain" => {
            let peak = match parts.next() {
                Some(raw) => raw
                    .parse::<f64>()
                    .map_err(|_| format!("invalid rain peak '{raw}'"))?,
                None => default_rain_peak(),
            };
            let command = Command::Rain {
                peak,
                duration_hours: default_rain_duration(),
            };
            command.validate()?;
            ConsoleCommand::Inject(command)
        }
        "dose" => match parts.next() {
            Some("off") => ConsoleCommand::Inject(Command::DoseOff),
            _ => ConsoleCommand::Inject(Command::DoseOn),
        },
        "fault" | "clear" => {
            let sensor = match parts.next() {
                Some(name) => {
                    SensorKind::parse(name).ok_or_else(|| format!("unknown sensor '{name}'"))?
                }
                None => default_fault_sensor(),
            };
            if cmd == "fault" {
                ConsoleCommand::Inject(Command::Fault { sensor })
            } else {
                ConsoleCommand::Inject(Command::Clear { sensor })
            }
        }
        "glitch" => ConsoleCommand::Inject(Command::Glitch),
        "status" => ConsoleCommand::Status,
        "help" => ConsoleCommand::Help,
        other => {
            return Err(format!("Unknown command: {other}. Type 'help' for commands."));
        }
    };

    Ok(Some(parsed))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- Console parser -----------------------------------------------------

    #[test]
    fn blank_line_is_none() {
        assert_eq!(parse_console_line(""), Ok(None));
        assert_eq!(parse_console_line("   \t "), Ok(None));
    }

    #[test]
    fn rain_defaults() {
        let cmd = parse_console_line("rain").unwrap().unwrap();
        assert_eq!(
            cmd,
            ConsoleCommand::Inject(Command::Rain {
                peak: 400.0,
                duration_hours: 6.0
            })
        );
    }

    #[test]
    fn rain_with_peak() {
        let cmd = parse_console_line("rain 900").unwrap().unwrap();
        assert_eq!(
            cmd,
            ConsoleCommand::Inject(Command::Rain {
                peak: 900.0,
                duration_hours: 6.0
            })
        );
    }

    #[test]
    fn rain_with_garbage_peak_is_rejected() {
        assert!(parse_console_line("rain heavy").is_err());
    }

    #[test]
    fn rain_with_negative_peak_is_rejected() {
        assert!(parse_console_line("rain -5").is_err());
    }

    #[test]
    fn dose_on_off() {
        assert_eq!(
            parse_console_line("dose off").unwrap().unwrap(),
            ConsoleCommand::Inject(Command::DoseOff)
        );
        assert_eq!(
            parse_console_line("dose on").unwrap().unwrap(),
            ConsoleCommand::Inject(Command::DoseOn)
        );
        // Bare "dose" re-enables, same as the original console.
        assert_eq!(
            parse_console_line("dose").unwrap().unwrap(),
            ConsoleCommand::Inject(Command::DoseOn)
        );
    }

    #[test]
    fn fault_defaults_to_chlorine() {
        assert_eq!(
            parse_console_line("fault").unwrap().unwrap(),
            ConsoleCommand::Inject(Command::Fault {
                sensor: SensorKind::Chlorine
            })
        );
    }

    #[test]
    fn fault_and_clear_named_sensor() {
        assert_eq!(
            parse_console_line("fault flow").unwrap().unwrap(),
            ConsoleCommand::Inject(Command::Fault {
                sensor: SensorKind::Flow
            })
        );
        assert_eq!(
            parse_console_line("clear turbidity").unwrap().unwrap(),
            ConsoleCommand::Inject(Command::Clear {
                sensor: SensorKind::Turbidity
            })
        );
    }

    #[test]
    fn unknown_sensor_is_rejected() {
        assert!(parse_console_line("fault ph").is_err());
    }

    #[test]
    fn case_insensitive_and_padded() {
        assert_eq!(
            parse_console_line("  GLITCH  ").unwrap().unwrap(),
            ConsoleCommand::Inject(Command::Glitch)
        );
        assert_eq!(
            parse_console_line("Fault FLOW").unwrap().unwrap(),
            ConsoleCommand::Inject(Command::Fault {
                sensor: SensorKind::Flow
            })
        );
    }

    #[test]
    fn status_and_help() {
        assert_eq!(
            parse_console_line("status").unwrap().unwrap(),
            ConsoleCommand::Status
        );
        assert_eq!(
            parse_console_line("help").unwrap().unwrap(),
            ConsoleCommand::Help
        );
    }

    #[test]
    fn unknown_command_mentions_help() {
        let err = parse_console_line("frobnicate").unwrap_err();
        assert!(err.contains("help"));
    }

    // -- JSON wire shape ----------------------------------------------------

    #[test]
    fn rain_json_with_defaults() {
        let cmd: Command = serde_json::from_str(r#"{"action":"rain"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Rain {
                peak: 400.0,
                duration_hours: 6.0
            }
        );
    }

    #[test]
    fn rain_json_with_peak() {
        let cmd: Command = serde_json::from_str(r#"{"action":"rain","peak":750}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Rain {
                peak: 750.0,
                duration_hours: 6.0
            }
        );
    }

    #[test]
    fn fault_json() {
        let cmd: Command = serde_json::from_str(r#"{"action":"fault","sensor":"flow"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Fault {
                sensor: SensorKind::Flow
            }
        );
    }

    #[test]
    fn set_coil_json() {
        let cmd: Command =
            serde_json::from_str(r#"{"action":"set_coil","coil":4,"value":1}"#).unwrap();
        assert_eq!(cmd, Command::SetCoil { coil: 4, value: 1 });
    }

    #[test]
    fn unknown_action_fails() {
        assert!(serde_json::from_str::<Command>(r#"{"action":"explode"}"#).is_err());
    }

    #[test]
    fn validate_rejects_nonfinite_rain() {
        let cmd: Command =
            serde_json::from_str(r#"{"action":"rain","peak":null}"#).map_or_else(
                |_| Command::Rain {
                    peak: f64::NAN,
                    duration_hours: 6.0,
                },
                |c| c,
            );
        assert!(cmd.validate().is_err());
    }
}
