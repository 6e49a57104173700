//! Special devices bypass the gate-level solver.
//!
//! A special device is an ordinary [`Device`](crate::device::Device) shell —
//! pins, ports, connections — whose behavior is supplied by a
//! [`SpecialDevice`] implementation instead of internal components. The core
//! only depends on this interface: `update` runs once per simulation tick
//! before any clock ticks (letting asynchronous inputs arrive), `solve` runs
//! at the start of the shell's solve, ahead of the regular fixed-point loop.

use std::path::Path;

use crate::error::{SimError, SimLog};
use crate::pin::{Pin, PinKind};

/// Behavior hook for devices that skip gate-level simulation.
pub trait SpecialDevice: Send + std::fmt::Debug {
    /// Called once per simulation tick, before any clock ticks.
    fn update(&mut self, pins: &mut PinAccess<'_>);

    /// Called at the start of the owning device's solve.
    fn solve(&mut self, pins: &mut PinAccess<'_>);
}

/// Checked view of the owning shell's pins, applying the device `Set`
/// semantics: output changes are buffered for the parent's next sub-tick,
/// input changes flag the shell for a re-solve, asserting `all_stop` logs
/// the fatal error.
pub struct PinAccess<'a> {
    pins: &'a mut [Pin],
    queued_for_propagation: &'a mut bool,
    full_name: &'a str,
    log: &'a SimLog,
    dirty_in: bool,
    dirty_out: bool,
}

impl<'a> PinAccess<'a> {
    pub(crate) fn new(
        pins: &'a mut [Pin],
        queued_for_propagation: &'a mut bool,
        full_name: &'a str,
        log: &'a SimLog,
    ) -> Self {
        Self {
            pins,
            queued_for_propagation,
            full_name,
            log,
            dirty_in: false,
            dirty_out: false,
        }
    }

    pub fn pin_index(&self, pin_name: &str) -> Option<usize> {
        self.pins.iter().position(|p| p.name == pin_name)
    }

    pub fn state(&self, pin_port_index: usize) -> bool {
        self.pins[pin_port_index].state
    }

    /// Pending-edge flag; set by inbound deliveries since the last solve.
    pub fn state_changed(&self, pin_port_index: usize) -> bool {
        self.pins[pin_port_index].state_changed
    }

    pub fn set(&mut self, pin_port_index: usize, state: bool) {
        let pin = &mut self.pins[pin_port_index];
        match pin.kind {
            PinKind::Input => {
                if pin.state != state {
                    pin.state = state;
                    pin.state_changed = true;
                    self.dirty_in = true;
                }
            }
            PinKind::Output => {
                if pin.state != state {
                    pin.state = state;
                    pin.state_changed = true;
                    *self.queued_for_propagation = true;
                    self.dirty_out = true;
                }
            }
            PinKind::HiddenOutput => {
                if pin.name == "all_stop" && state {
                    self.log.error(SimError::AllStop {
                        path: self.full_name.to_owned(),
                    });
                }
            }
            PinKind::HiddenInput => {}
        }
    }

    pub(crate) fn dirty(&self) -> (bool, bool) {
        (self.dirty_in, self.dirty_out)
    }
}

/// Read-only memory with a one-word-per-line text image.
///
/// Bus layout: `a_0..a_{n-1}` address inputs, `d_0..d_{m-1}` data outputs,
/// plus `read` and `clk` inputs. On a falling clock edge with `read` high
/// the addressed word is driven onto the data bus; `read` going low clears
/// the bus.
#[derive(Debug)]
pub struct Rom {
    data: Vec<u64>,
    clk_pin: usize,
    read_pin: usize,
    address_pins: Vec<usize>,
    data_pins: Vec<usize>,
}

impl Rom {
    /// Builds the ROM shell: a stabilised special [`Device`] ready to be
    /// added to a parent. Load problems become build errors on the returned
    /// device; affected words read as zero.
    pub fn device(
        device_name: &str,
        data_file: impl AsRef<Path>,
        address_bus_width: usize,
        data_bus_width: usize,
    ) -> crate::device::Device {
        let mut shell = crate::device::Device::new(device_name, "rom", &["read", "clk"], &[]);
        shell.create_bus(address_bus_width, "a_", PinKind::Input, &[]);
        shell.create_bus(data_bus_width, "d_", PinKind::Output, &[]);
        let data = match load_data(&mut shell, data_file.as_ref(), address_bus_width) {
            Some(data) => data,
            None => vec![0; 1 << address_bus_width],
        };
        let rom = Rom {
            data,
            clk_pin: shell.pin_index("clk").expect("rom shell has clk pin"),
            read_pin: shell.pin_index("read").expect("rom shell has read pin"),
            address_pins: (0..address_bus_width)
                .map(|i| shell.pin_index(&format!("a_{i}")).expect("rom address pin"))
                .collect(),
            data_pins: (0..data_bus_width)
                .map(|i| shell.pin_index(&format!("d_{i}")).expect("rom data pin"))
                .collect(),
        };
        shell.mark_inner_terminals_connected();
        shell.set_special(Box::new(rom));
        shell.stabilise();
        shell
    }
}

impl SpecialDevice for Rom {
    fn update(&mut self, _pins: &mut PinAccess<'_>) {
        // Memory contents never change asynchronously.
    }

    fn solve(&mut self, pins: &mut PinAccess<'_>) {
        if pins.state_changed(self.clk_pin) && !pins.state(self.clk_pin) && pins.state(self.read_pin)
        {
            let mut address = 0usize;
            for (bit, &pin) in self.address_pins.iter().enumerate() {
                if pins.state(pin) {
                    address |= 1 << bit;
                }
            }
            let word = self.data[address];
            for (bit, &pin) in self.data_pins.iter().enumerate() {
                pins.set(pin, (word >> bit) & 1 == 1);
            }
        }
        if pins.state_changed(self.read_pin) && !pins.state(self.read_pin) {
            for &pin in &self.data_pins {
                pins.set(pin, false);
            }
        }
    }
}

/// One memory word per line, as a base-prefixed integer literal (`0x`,
/// `0o`, `0b`, a bare leading `0` for octal, decimal otherwise). Lines past
/// the address space are ignored; missing lines stay zero.
fn load_data(
    shell: &mut crate::device::Device,
    data_file: &Path,
    address_bus_width: usize,
) -> Option<Vec<u64>> {
    let capacity = 1usize << address_bus_width;
    let text = match std::fs::read_to_string(data_file) {
        Ok(text) => text,
        Err(error) => {
            tracing::debug!(?error, file = %data_file.display(), "rom data file unreadable");
            shell.record(SimError::RomFile {
                path: shell.full_name().to_owned(),
                file: data_file.display().to_string(),
            });
            return None;
        }
    };
    let mut data = vec![0u64; capacity];
    for (line_index, line) in text.lines().take(capacity).enumerate() {
        let word = line.trim();
        if word.is_empty() {
            continue;
        }
        match parse_word(word) {
            Some(value) => data[line_index] = value,
            None => {
                shell.record(SimError::RomWord {
                    path: shell.full_name().to_owned(),
                    line: line_index + 1,
                    word: word.to_owned(),
                });
            }
        }
    }
    Some(data)
}

fn parse_word(word: &str) -> Option<u64> {
    let lower = word.to_ascii_lowercase();
    if let Some(hex) = lower.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = lower.strip_prefix("0b") {
        u64::from_str_radix(bin, 2).ok()
    } else if let Some(oct) = lower.strip_prefix("0o") {
        u64::from_str_radix(oct, 8).ok()
    } else if lower.len() > 1 && lower.starts_with('0') {
        u64::from_str_radix(&lower[1..], 8).ok()
    } else {
        lower.parse().ok()
    }
}
