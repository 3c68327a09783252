//! Command-line interface and REPL
//!
//! The REPL stands in for the footswitch surface: it reads commands on a plain thread
//! (rustyline blocks) and drives the controller through its handle. Notifications are
//! rendered here as well.

use anyhow::Result;
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::runtime::Handle;
use tracing::debug;

use patch_gw::controller::ControllerHandle;
use patch_gw::drivers::ports;
use patch_gw::events::{FailbackChoice, Notification, Severity};
use patch_gw::midi::{Command, Patch, PatchEntry, TEST_PATCH_LABEL};
use patch_gw::mode::{ConnectionMode, DeviceRole};

/// One parsed REPL line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Lock(bool),
    Override(bool),
    Debug(bool),
    Mode {
        mode: ConnectionMode,
        device: Option<String>,
    },
    Patch(PatchEntry),
    Answer(FailbackChoice),
    Status,
    Ports,
    Help,
    Quit,
}

const HELP: &str = "\
Commands:
  patch <label> <prog1> <prog2> [ch:cc:val ...]   send a patch
  test <prog1> <prog2> [ch:cc:val ...]            send a diagnostic patch (marks CH1 with pc 126)
  lock on|off                                     lock automatic mode switching
  override on|off                                 route CH1 through CH2 in HYBRID
  mode bt|usb|hybrid|custom [device]              switch mode (relaunches)
  answer usb|hybrid|stay                          answer a failback prompt
  debug on|off                                    verbose logging from next launch
  status                                          show controller state
  ports                                           list MIDI ports
  quit";

fn parse_switch(arg: Option<&str>) -> std::result::Result<bool, String> {
    match arg.map(|a| a.to_ascii_lowercase()).as_deref() {
        Some("on") | Some("true") | Some("1") => Ok(true),
        Some("off") | Some("false") | Some("0") => Ok(false),
        _ => Err("expected on|off".to_string()),
    }
}

fn parse_u8(name: &str, value: &str) -> std::result::Result<u8, String> {
    value
        .parse::<u8>()
        .map_err(|_| format!("{} must be a number 0-127, got '{}'", name, value))
}

fn parse_control(token: &str) -> std::result::Result<(u8, u8, u8), String> {
    let parts: Vec<&str> = token.split(':').collect();
    match parts.as_slice() {
        [ch, cc, val] => Ok((
            parse_u8("channel", ch)?,
            parse_u8("controller", cc)?,
            parse_u8("value", val)?,
        )),
        _ => Err(format!("expected ch:cc:val, got '{}'", token)),
    }
}

fn parse_entry<'a>(
    label: String,
    mut words: impl Iterator<Item = &'a str>,
) -> std::result::Result<PatchEntry, String> {
    let program1 = parse_u8("prog1", words.next().ok_or("expected prog1")?)?;
    let program2 = parse_u8("prog2", words.next().ok_or("expected prog2")?)?;
    let controls = words.map(parse_control).collect::<std::result::Result<_, _>>()?;
    Ok(PatchEntry {
        label,
        program1,
        program2,
        controls,
    })
}

pub fn parse_line(line: &str) -> std::result::Result<ReplCommand, String> {
    let mut words = line.split_whitespace();
    let Some(keyword) = words.next() else {
        return Err("empty command".to_string());
    };

    match keyword.to_ascii_lowercase().as_str() {
        "lock" => Ok(ReplCommand::Lock(parse_switch(words.next())?)),
        "override" => Ok(ReplCommand::Override(parse_switch(words.next())?)),
        "debug" => Ok(ReplCommand::Debug(parse_switch(words.next())?)),
        "mode" => {
            let mode = words
                .next()
                .ok_or("expected a mode")?
                .parse::<ConnectionMode>()?;
            let rest: Vec<&str> = words.collect();
            let device = (!rest.is_empty()).then(|| rest.join(" "));
            if mode == ConnectionMode::Custom && device.is_none() {
                return Err("custom mode needs a device name".to_string());
            }
            Ok(ReplCommand::Mode { mode, device })
        },
        "patch" => {
            let label = words.next().ok_or("expected a label")?.to_string();
            Ok(ReplCommand::Patch(parse_entry(label, words)?))
        },
        "test" => Ok(ReplCommand::Patch(parse_entry(TEST_PATCH_LABEL.to_string(), words)?)),
        "answer" => match words.next().map(|w| w.to_ascii_lowercase()).as_deref() {
            Some("usb") => Ok(ReplCommand::Answer(FailbackChoice::UsbDirect)),
            Some("hybrid") => Ok(ReplCommand::Answer(FailbackChoice::Hybrid)),
            Some("stay") | Some("bt") => Ok(ReplCommand::Answer(FailbackChoice::Stay)),
            _ => Err("expected usb|hybrid|stay".to_string()),
        },
        "status" => Ok(ReplCommand::Status),
        "ports" => Ok(ReplCommand::Ports),
        "help" | "?" => Ok(ReplCommand::Help),
        "quit" | "exit" => Ok(ReplCommand::Quit),
        other => Err(format!("unknown command '{}' (try 'help')", other)),
    }
}

/// Blocking REPL loop; returns when the user quits or stdin closes.
pub fn run_repl(controller: ControllerHandle, prefix: Vec<Command>, runtime: Handle) -> Result<()> {
    let mut rl = DefaultEditor::new()?;

    loop {
        let line = match rl.readline("patch-gw> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line);

        let command = match parse_line(line) {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e.red());
                continue;
            },
        };
        debug!(?command, "REPL command");

        let outcome = match command {
            ReplCommand::Quit => break,
            ReplCommand::Help => {
                println!("{}", HELP);
                Ok(())
            },
            ReplCommand::Lock(on) => controller.set_lock(on),
            ReplCommand::Override(on) => controller.set_override(on),
            ReplCommand::Debug(on) => {
                println!("Debug logging {} from the next launch", if on { "on" } else { "off" });
                controller.set_debug(on)
            },
            ReplCommand::Mode { mode, device } => controller.set_mode(mode, device),
            ReplCommand::Answer(choice) => controller.answer_failback(choice),
            ReplCommand::Patch(entry) => match Patch::from_entry(&entry, &prefix) {
                Ok(patch) => runtime.block_on(controller.send_patch(patch)),
                Err(e) => Err(e),
            },
            ReplCommand::Status => runtime
                .block_on(controller.snapshot())
                .map(|snapshot| print_status(&snapshot)),
            ReplCommand::Ports => {
                if let Err(e) = ports::print_ports() {
                    println!("{}", format!("Could not list ports: {}", e).red());
                }
                Ok(())
            },
        };

        if let Err(e) = outcome {
            println!("{}", e.to_string().red());
            if matches!(e, patch_gw::Error::ControllerGone) {
                break;
            }
        }
    }

    Ok(())
}

fn print_status(snapshot: &patch_gw::controller::ControllerSnapshot) {
    println!("{}", "=== Patch GW ===".bold().cyan());
    match &snapshot.last_status {
        Some(status) => println!("  Route:    {}", status.route.green()),
        None => println!("  Mode:     {} (no device check yet)", snapshot.mode.to_string().green()),
    }
    println!(
        "  Devices:  BT '{}', CH1 '{}', CH2 '{}'",
        snapshot.bindings.device(DeviceRole::Bluetooth),
        snapshot.bindings.device(DeviceRole::Channel1),
        snapshot.bindings.device(DeviceRole::Channel2)
    );
    if let Some(status) = &snapshot.last_status {
        println!(
            "  Present:  BT {} | CH1 {} | CH2 {}",
            yes_no(status.bluetooth_present),
            yes_no(status.ch1_present),
            yes_no(status.ch2_present)
        );
    }
    println!(
        "  Lock: {}  Override: {}  Debug: {}",
        yes_no(snapshot.locked),
        yes_no(snapshot.ch1_override),
        yes_no(snapshot.debug_enabled)
    );
    if snapshot.declined {
        println!("  USB switch declined for this session");
    }
    if snapshot.awaiting_failback {
        println!("  {}", "Waiting for failback answer (answer usb|hybrid|stay)".yellow());
    }
    if snapshot.patch_in_flight {
        println!("  Patch in flight");
    }
    if snapshot.sending || snapshot.receiving {
        println!(
            "  Traffic:  {}{}",
            if snapshot.sending { "sending " } else { "" },
            if snapshot.receiving { "receiving" } else { "" }
        );
    }
}

fn yes_no(value: bool) -> ColoredString {
    if value {
        "yes".green()
    } else {
        "no".red()
    }
}

/// Print one notification. `last_status` suppresses repeated identical status lines.
pub fn render_notification(notification: &Notification, last_status: &mut Option<String>) {
    match notification {
        Notification::Toast { message, severity } => {
            let text = match severity {
                Severity::Info => message.normal(),
                Severity::Success => message.green(),
                Severity::Warning => message.yellow(),
                Severity::Error => message.red().bold(),
            };
            println!("{}", text);
        },
        Notification::StatusUpdate(status) => {
            let line = status.to_string();
            if last_status.as_deref() != Some(line.as_str()) {
                println!("{}", line.cyan());
                *last_status = Some(line);
            }
        },
        Notification::FailoverPrompt { from, missing } => {
            println!(
                "{}",
                format!(
                    "{} lost ({}). Switching to Bluetooth.",
                    missing.join(", "),
                    from
                )
                .red()
                .bold()
            );
        },
        Notification::FailbackPrompt { available } => {
            println!(
                "{}",
                format!(
                    "USB devices stable ({}). Switch back? answer usb | hybrid | stay",
                    available.join(", ")
                )
                .yellow()
                .bold()
            );
        },
        Notification::Activity(direction) => debug!(?direction, "MIDI activity"),
        Notification::PatchStarted { label } => println!("{} {}", "->".dimmed(), label),
        Notification::PatchCompleted { label } => {
            println!("{} {}", "ok".green().dimmed(), label.dimmed())
        },
        Notification::BluetoothLost { device } => {
            println!(
                "{}",
                format!("Bluetooth device '{}' is gone. Check the bridge.", device).red()
            );
        },
        Notification::RestartRequested { mode } => {
            println!("{}", format!("Restarting in {} mode...", mode).bold());
        },
    }
}
