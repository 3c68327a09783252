//! Native MIDI port discovery via midir
//!
//! Alternative enumeration backend for systems without `sendmidi`, and the listing
//! behind `--list-ports`.

use async_trait::async_trait;
use midir::{MidiInput, MidiOutput};
use std::collections::BTreeSet;

use super::DeviceEnumerator;
use crate::error::EnumerationError;

const CLIENT_NAME: &str = "Patch-GW-Discovery";

/// Information about a MIDI port
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub index: usize,
    pub name: String,
    pub is_virtual: bool,
}

fn looks_virtual(name: &str) -> bool {
    name.contains("Virtual") || name.contains("loopMIDI") || name.contains("IAC")
}

/// Discover output ports
pub fn discover_output_ports() -> Result<Vec<PortInfo>, EnumerationError> {
    let midi_out =
        MidiOutput::new(CLIENT_NAME).map_err(|e| EnumerationError::Backend(e.to_string()))?;

    let mut port_infos = Vec::new();
    for (index, port) in midi_out.ports().iter().enumerate() {
        if let Ok(name) = midi_out.port_name(port) {
            port_infos.push(PortInfo {
                index,
                is_virtual: looks_virtual(&name),
                name,
            });
        }
    }

    Ok(port_infos)
}

/// Discover input ports
pub fn discover_input_ports() -> Result<Vec<PortInfo>, EnumerationError> {
    let midi_in =
        MidiInput::new(CLIENT_NAME).map_err(|e| EnumerationError::Backend(e.to_string()))?;

    let mut port_infos = Vec::new();
    for (index, port) in midi_in.ports().iter().enumerate() {
        if let Ok(name) = midi_in.port_name(port) {
            port_infos.push(PortInfo {
                index,
                is_virtual: looks_virtual(&name),
                name,
            });
        }
    }

    Ok(port_infos)
}

/// Print every port to stdout
pub fn print_ports() -> Result<(), EnumerationError> {
    let outputs = discover_output_ports()?;
    let inputs = discover_input_ports()?;

    println!("MIDI output ports:");
    for port in &outputs {
        println!(
            "  [{}] {}{}",
            port.index,
            port.name,
            if port.is_virtual { " (virtual)" } else { "" }
        );
    }
    println!("MIDI input ports:");
    for port in &inputs {
        println!(
            "  [{}] {}{}",
            port.index,
            port.name,
            if port.is_virtual { " (virtual)" } else { "" }
        );
    }

    Ok(())
}

/// Enumerates output port names.
///
/// midir port listing is synchronous, so each call runs on the blocking pool.
#[derive(Debug, Default, Clone)]
pub struct MidirEnumerator;

#[async_trait]
impl DeviceEnumerator for MidirEnumerator {
    fn name(&self) -> &str {
        "midir"
    }

    async fn enumerate(&self) -> Result<BTreeSet<String>, EnumerationError> {
        let ports = tokio::task::spawn_blocking(discover_output_ports)
            .await
            .map_err(|e| EnumerationError::Backend(e.to_string()))??;

        Ok(ports.into_iter().map(|p| p.name).collect())
    }
}
