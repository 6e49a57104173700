//! Pin samplers.
//!
//! A probe watches an ordered pin subset of one component and takes a row
//! of samples every time its trigger clock ticks. Samples are read at the
//! end of the simulation tick, after the top-level solve has settled.

use crate::device::Device;

/// Presentation options for [`Probe`] sample tables.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Print every n-th sample row only.
    pub probe_every_n_ticks: usize,
    /// Wrap rows after this many samples; 0 disables wrapping.
    pub samples_per_row: usize,
    /// Glyphs for low and high.
    pub output_characters: [char; 2],
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            probe_every_n_ticks: 1,
            samples_per_row: 0,
            output_characters: ['F', 'T'],
        }
    }
}

#[derive(Debug)]
pub(crate) struct Probe {
    name: String,
    /// Child-index path from the simulation root to the target component.
    pub(crate) target_path: Vec<usize>,
    target_full_name: String,
    /// Port indices sampled, in construction order.
    pub(crate) pin_indices: Vec<usize>,
    samples: Vec<Vec<bool>>,
    timestamps: Vec<u64>,
    config: ProbeConfig,
}

impl Probe {
    pub(crate) fn new(
        name: &str,
        target_path: Vec<usize>,
        target_full_name: String,
        pin_indices: Vec<usize>,
        config: ProbeConfig,
    ) -> Self {
        Self {
            name: name.to_owned(),
            target_path,
            target_full_name,
            pin_indices,
            samples: Vec::new(),
            timestamps: Vec::new(),
            config,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot the current state of every target pin.
    pub(crate) fn sample(&mut self, timestamp: u64, root: &Device) {
        let Some(part) = root.part_at(&self.target_path) else {
            return;
        };
        let pins = part.pins();
        let row = self.pin_indices.iter().map(|&i| pins[i].state).collect();
        self.samples.push(row);
        self.timestamps.push(timestamp);
    }

    pub(crate) fn preallocate(&mut self, ticks: usize) {
        self.samples.reserve(ticks);
        self.timestamps.reserve(ticks);
    }

    pub(crate) fn reset(&mut self) {
        self.samples.clear();
        self.timestamps.clear();
    }

    pub(crate) fn samples(&self) -> &[Vec<bool>] {
        &self.samples
    }

    pub(crate) fn timestamps(&self) -> &[u64] {
        &self.timestamps
    }

    /// Formatted sample table, one row per trigger.
    pub(crate) fn print(&self) {
        println!("Probe: {} - {}", self.name, self.target_full_name);
        let every = self.config.probe_every_n_ticks.max(1);
        for (row_index, row) in self.samples.iter().enumerate() {
            if row_index % every != 0 {
                continue;
            }
            let header = format!("T: {}  ", self.timestamps[row_index]);
            print!("{header}");
            let mut column = 1;
            for &state in row {
                let glyph = if state {
                    self.config.output_characters[1]
                } else {
                    self.config.output_characters[0]
                };
                print!(" {glyph}");
                if self.config.samples_per_row > 0 && column == self.config.samples_per_row {
                    print!("\n{}", " ".repeat(header.len()));
                    column = 1;
                } else {
                    column += 1;
                }
            }
            println!();
        }
    }
}
