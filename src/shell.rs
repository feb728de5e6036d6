//! Interactive command shell.

use crate::error::Result;
use crossbeam_channel::Receiver;
use dp564_protocol::{ChangeOrigin, DeviceEvent, Dp564Client, Dp564Error, StatusSnapshot};
use log::debug;
use std::io::{BufRead, Write};
use std::thread::{self, JoinHandle};

const HELP: &str = "\
--- DP564 Remote ---
Commands:
  volume <dB>      - Set volume from -95.0 to 0.0
  source <name>    - Set source (aes1, aes2, optical, streaming)
  dim / dim on / dim off - Toggle or set DIM state
  status           - Show current device state
  status json      - Show current device state as JSON
  help             - Show this list
  q / quit         - Exit";

/// One line of user input
#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    Volume(f32),
    Source(String),
    ToggleDim,
    Dim(bool),
    Status,
    StatusJson,
    Help,
    Quit,
    Empty,
    /// Recognised command with missing or malformed arguments
    Usage(&'static str),
    Invalid,
}

impl ShellCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.to_lowercase();
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return ShellCommand::Empty;
        };
        let argument = words.next();

        match (command, argument) {
            ("q" | "quit", _) => ShellCommand::Quit,
            ("help", _) => ShellCommand::Help,
            ("dim", Some("on")) => ShellCommand::Dim(true),
            ("dim", Some("off")) => ShellCommand::Dim(false),
            ("dim", _) => ShellCommand::ToggleDim,
            ("volume", Some(value)) => match value.parse::<f32>() {
                Ok(db) => ShellCommand::Volume(db),
                Err(_) => ShellCommand::Usage("Invalid volume value."),
            },
            ("volume", None) => {
                ShellCommand::Usage("Please specify a volume level (e.g., 'volume -20.5').")
            }
            ("source", Some(name)) => ShellCommand::Source(name.to_string()),
            ("source", None) => {
                ShellCommand::Usage("Please specify a source name (e.g., 'source aes1').")
            }
            ("status", Some("json")) => ShellCommand::StatusJson,
            ("status", _) => ShellCommand::Status,
            _ => ShellCommand::Invalid,
        }
    }
}

/// Whether the shell keeps reading after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Shell<'a> {
    client: &'a Dp564Client,
}

impl<'a> Shell<'a> {
    pub fn new(client: &'a Dp564Client) -> Self {
        Self { client }
    }

    /// Read commands until quit, end of input, or loss of the session.
    /// Always disconnects before returning.
    pub fn run<R: BufRead, W: Write>(&self, input: R, mut output: W) -> Result<()> {
        let result = self.read_loop(input, &mut output);
        self.client.disconnect();
        writeln!(output, "Disconnected.")?;
        result
    }

    fn read_loop<R: BufRead, W: Write>(&self, input: R, output: &mut W) -> Result<()> {
        writeln!(output, "{}", HELP)?;
        let mut lines = input.lines();

        while self.client.is_connected() {
            write!(output, "\nCommand > ")?;
            output.flush()?;

            let Some(line) = lines.next() else {
                debug!("End of input");
                break;
            };
            let command = ShellCommand::parse(&line?);
            if self.execute(command, output)? == Flow::Quit {
                break;
            }
        }

        if !self.client.is_connected() {
            writeln!(output, "Session ended: {}", describe_session(&self.client.status()))?;
        }
        Ok(())
    }

    pub fn execute<W: Write>(&self, command: ShellCommand, output: &mut W) -> Result<Flow> {
        match command {
            ShellCommand::Quit => return Ok(Flow::Quit),
            ShellCommand::Empty => {}
            ShellCommand::Help => writeln!(output, "{}", HELP)?,
            ShellCommand::Usage(message) => writeln!(output, "{}", message)?,
            ShellCommand::Invalid => writeln!(output, "Invalid command.")?,
            ShellCommand::Status => write!(output, "{}", render_status(&self.client.status()))?,
            ShellCommand::StatusJson => writeln!(
                output,
                "{}",
                serde_json::to_string_pretty(&self.client.status())?
            )?,
            ShellCommand::Volume(db) => {
                let result = self.client.set_volume_db(db);
                return report(output, &format!("Volume change to {:.1} dB", db), result);
            }
            ShellCommand::Source(name) => {
                let result = self.client.set_source_name(&name);
                return report(output, &format!("Source change to {}", name), result);
            }
            ShellCommand::Dim(on) => {
                let result = self.client.set_dim(on);
                return report(output, &format!("DIM state change to {}", on_off(on)), result);
            }
            ShellCommand::ToggleDim => match self.client.toggle_dim() {
                Ok(on) => writeln!(output, "DIM state change to {} acknowledged.", on_off(on))?,
                Err(e) => return report(output, "DIM toggle", Err(e)),
            },
        }
        Ok(Flow::Continue)
    }
}

/// Print the outcome of a command. A failure that ended the session stops the shell.
fn report<W: Write>(
    output: &mut W,
    action: &str,
    result: std::result::Result<(), Dp564Error>,
) -> Result<Flow> {
    match result {
        Ok(()) => writeln!(output, "{} acknowledged.", action)?,
        Err(e @ (Dp564Error::CommandRejected(_) | Dp564Error::CommandBusy)) => {
            writeln!(output, "{}", e)?
        }
        Err(e) if e.is_fatal() => {
            writeln!(output, "Warning: {} failed: {}", action, e)?;
            return Ok(Flow::Quit);
        }
        Err(e) => writeln!(output, "Warning: {} failed: {}", action, e)?,
    }
    Ok(Flow::Continue)
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

fn describe_session(status: &StatusSnapshot) -> String {
    match &status.failure {
        Some(reason) => reason.clone(),
        None => status.connection.to_string(),
    }
}

/// Human-readable device state; values the device has not reported yet are marked.
pub fn render_status(status: &StatusSnapshot) -> String {
    let device = &status.device;
    let mark = |confirmed: bool| if confirmed { "" } else { " (unconfirmed)" };

    let mut text = String::new();
    text.push_str(&format!(
        "  - Current Volume: {:.1} dB{}\n",
        device.volume_db,
        mark(device.confirmed.volume)
    ));
    text.push_str(&format!(
        "  - Current Source: {}{}\n",
        device.source,
        mark(device.confirmed.source)
    ));
    text.push_str(&format!(
        "  - DIM State: {}{}\n",
        on_off(device.dim),
        mark(device.confirmed.dim)
    ));
    text.push_str(&format!("  - Connection: {}\n", status.connection));
    if let Some(reason) = &status.failure {
        text.push_str(&format!("  - Last failure: {}\n", reason));
    }
    text
}

/// Print changes the device makes on its own while the shell waits for input.
pub fn spawn_event_printer(events: Receiver<DeviceEvent>) -> JoinHandle<()> {
    thread::spawn(move || {
        for event in events {
            match event {
                DeviceEvent::VolumeChanged {
                    db,
                    origin: ChangeOrigin::Device,
                } => println!("\n[Device] Volume updated by device to: {:.1} dB", db),
                DeviceEvent::ConnectionLost(reason) => {
                    println!("\n[Device] Connection lost: {}", reason)
                }
                // Command results are reported by the shell itself
                _ => {}
            }
        }
        debug!("Event printer stopped");
    })
}
