use bitflags::bitflags;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, BufRead};
use std::sync::Arc;

use crate::cpu::Sim;
use crate::error::SimError;
use crate::labels;

pub const DEFAULT_MEM_SIZE: usize = 0x10000;

bitflags! {
    /// Per-byte memory state. An empty set means plain initialized RAM.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MemState: u8 {
        /// No region was ever declared here.
        const UNDEFINED = 0x01;
        /// Write protected.
        const ROM = 0x02;
        /// Declared but never written.
        const INVALID = 0x04;
        /// A read or write hook is installed.
        const CALLBACK = 0x08;
    }
}

/// What triggered a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write(u8),
    Exec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    Read,
    Write,
    Exec,
}

impl CallbackKind {
    pub fn name(self) -> &'static str {
        match self {
            CallbackKind::Read => "read",
            CallbackKind::Write => "write",
            CallbackKind::Exec => "exec",
        }
    }
}

/// Memory-mapped hook. Receives the simulator, the address and the access.
/// For reads the returned byte is the value seen by the CPU; for writes and
/// execution it is ignored. `Err` records the error at the address.
pub type Callback = Arc<dyn Fn(&mut Sim, u16, Access) -> Result<u8, SimError> + Send + Sync>;

/// Initial contents of the byte array before any region is declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryFill {
    #[default]
    Zero,
    Random { seed: u64 },
}

pub struct Memory {
    data: Vec<u8>,
    state: Vec<MemState>,
    read_cb: Vec<Option<Callback>>,
    write_cb: Vec<Option<Callback>>,
    exec_cb: Vec<Option<Callback>>,
    labels: BTreeMap<u16, String>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    pub fn new() -> Self {
        Self::with_size(DEFAULT_MEM_SIZE, MemoryFill::Zero)
    }

    /// Creates a memory space of `size` bytes (clamped to 1..=64K), all undefined.
    pub fn with_size(size: usize, fill: MemoryFill) -> Self {
        let size = size.clamp(1, DEFAULT_MEM_SIZE);
        let mut data = vec![0u8; size];
        if let MemoryFill::Random { seed } = fill {
            StdRng::seed_from_u64(seed).fill(&mut data[..]);
        }
        Memory {
            data,
            state: vec![MemState::UNDEFINED; size],
            read_cb: vec![None; size],
            write_cb: vec![None; size],
            exec_cb: vec![None; size],
            labels: BTreeMap::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn clip(&self, addr: usize, len: usize) -> std::ops::Range<usize> {
        let start = addr.min(self.size());
        let end = addr.saturating_add(len).min(self.size());
        start..end
    }

    /// Declares RAM. Zeroed RAM is initialized; otherwise every byte stays
    /// flagged as never written until the program stores to it.
    pub fn add_ram(&mut self, addr: usize, len: usize, zeroed: bool) {
        for i in self.clip(addr, len) {
            let keep = self.state[i] & MemState::CALLBACK;
            if zeroed {
                self.data[i] = 0;
                self.state[i] = keep;
            } else {
                self.state[i] = keep | MemState::INVALID;
            }
        }
    }

    /// Declares RAM with initial contents.
    pub fn add_data_ram(&mut self, addr: usize, bytes: &[u8]) {
        let range = self.clip(addr, bytes.len());
        for (i, &b) in range.zip(bytes) {
            self.data[i] = b;
            self.state[i] &= MemState::CALLBACK;
        }
    }

    /// Declares write-protected memory with the given contents.
    pub fn add_rom(&mut self, addr: usize, bytes: &[u8]) {
        let range = self.clip(addr, bytes.len());
        for (i, &b) in range.zip(bytes) {
            self.data[i] = b;
            self.state[i] = (self.state[i] & MemState::CALLBACK) | MemState::ROM;
        }
    }

    /// Binds `cb` to `len` addresses starting at `addr`, replacing any
    /// previous hook of the same kind.
    pub fn add_callback(&mut self, addr: usize, len: usize, kind: CallbackKind, cb: Callback) {
        for i in self.clip(addr, len) {
            match kind {
                CallbackKind::Read => {
                    self.read_cb[i] = Some(cb.clone());
                    self.state[i] |= MemState::CALLBACK;
                }
                CallbackKind::Write => {
                    self.write_cb[i] = Some(cb.clone());
                    self.state[i] |= MemState::CALLBACK;
                }
                CallbackKind::Exec => {
                    self.exec_cb[i] = Some(cb.clone());
                    // instruction fetch reads two bytes
                    if i + 1 < self.size() {
                        self.state[i + 1].remove(MemState::UNDEFINED | MemState::INVALID);
                    }
                }
            }
        }
    }

    pub fn callback(&self, kind: CallbackKind, addr: u16) -> Option<Callback> {
        let slots = match kind {
            CallbackKind::Read => &self.read_cb,
            CallbackKind::Write => &self.write_cb,
            CallbackKind::Exec => &self.exec_cb,
        };
        slots.get(addr as usize).and_then(|cb| cb.clone())
    }

    pub fn has_callback(&self, kind: CallbackKind, addr: u16) -> bool {
        let slots = match kind {
            CallbackKind::Read => &self.read_cb,
            CallbackKind::Write => &self.write_cb,
            CallbackKind::Exec => &self.exec_cb,
        };
        matches!(slots.get(addr as usize), Some(Some(_)))
    }

    /// State flags for `addr`; addresses past the end are undefined.
    pub fn state(&self, addr: u16) -> MemState {
        self.state
            .get(addr as usize)
            .copied()
            .unwrap_or(MemState::UNDEFINED)
    }

    /// Side-effect free read for inspection. `None` if the address is out of
    /// range or was never written.
    pub fn get_byte(&self, addr: u16) -> Option<u8> {
        let i = addr as usize;
        if i >= self.size() || self.state[i].contains(MemState::INVALID) {
            return None;
        }
        Some(self.data[i])
    }

    /// Stored byte regardless of state. Out of range reads as zero.
    pub fn raw(&self, addr: u16) -> u8 {
        self.data.get(addr as usize).copied().unwrap_or(0)
    }

    fn store(&mut self, addr: u16, value: u8) -> bool {
        match self.data.get_mut(addr as usize) {
            Some(b) => {
                let changed = *b != value;
                *b = value;
                changed
            }
            None => false,
        }
    }

    /// One-shot transition of a declared-but-never-written byte to initialized.
    /// Returns true if the byte was uninitialized.
    pub fn mark_initialized(&mut self, addr: u16) -> bool {
        match self.state.get_mut(addr as usize) {
            Some(st) if st.contains(MemState::INVALID) => {
                st.remove(MemState::INVALID);
                true
            }
            _ => false,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn state_bytes(&self) -> Vec<u8> {
        self.state.iter().map(|s| s.bits()).collect()
    }

    /// Replaces contents and state flags, keeping the installed hooks.
    pub(crate) fn restore_image(&mut self, data: &[u8], state: &[u8]) {
        self.data.copy_from_slice(data);
        for (st, &bits) in self.state.iter_mut().zip(state) {
            let hooks = *st & MemState::CALLBACK;
            *st = (MemState::from_bits_truncate(bits) - MemState::CALLBACK) | hooks;
        }
    }

    pub fn set_label(&mut self, addr: u16, name: impl Into<String>) {
        self.labels.insert(addr, name.into());
    }

    pub fn label(&self, addr: u16) -> Option<&str> {
        self.labels.get(&addr).map(String::as_str)
    }

    pub fn find_label(&self, name: &str) -> Option<u16> {
        self.labels
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(&addr, _)| addr)
    }

    pub fn labels(&self) -> impl Iterator<Item = (u16, &str)> {
        self.labels.iter().map(|(&a, n)| (a, n.as_str()))
    }

    /// Reads a label file. Malformed lines are logged and skipped.
    /// Returns the number of labels added.
    pub fn load_labels<R: BufRead>(&mut self, reader: R) -> io::Result<usize> {
        let mut count = 0;
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            match labels::parse_line(&line) {
                Ok(Some((addr, name))) => {
                    self.set_label(addr, name);
                    count += 1;
                }
                Ok(None) => {}
                Err(msg) => log::warn!("label file line {}: {}", lineno + 1, msg),
            }
        }
        Ok(count)
    }
}

// Access paths used by the execution engine.
impl Sim {
    /// Reads a byte on behalf of the program.
    pub fn read_byte(&mut self, addr: u16) -> u8 {
        self.read_classified(addr, SimError::ReadUndef, SimError::ReadUninit)
    }

    /// Reads an instruction byte.
    pub(crate) fn fetch_byte(&mut self, addr: u16) -> u8 {
        self.read_classified(addr, SimError::ExecUndef, SimError::ExecUninit)
    }

    fn read_classified(&mut self, addr: u16, undef: SimError, uninit: SimError) -> u8 {
        let st = self.mem.state(addr);
        if st.is_empty() {
            return self.mem.raw(addr);
        }
        if st.contains(MemState::CALLBACK) {
            if let Some(cb) = self.mem.callback(CallbackKind::Read, addr) {
                return match self.invoke(&cb, addr, Access::Read) {
                    Ok(v) => v,
                    Err(e) => {
                        self.raise(e, addr);
                        self.mem.raw(addr)
                    }
                };
            }
        }
        if st.contains(MemState::UNDEFINED) {
            self.raise(undef, addr);
        } else if st.contains(MemState::INVALID) {
            self.raise(uninit, addr);
            self.mem.mark_initialized(addr);
        }
        self.mem.raw(addr)
    }

    /// Writes a byte on behalf of the program.
    pub fn write_byte(&mut self, addr: u16, value: u8) {
        let st = self.mem.state(addr);
        if st.is_empty() {
            self.mem_changed |= self.mem.store(addr, value);
            return;
        }
        if st.contains(MemState::CALLBACK) {
            if let Some(cb) = self.mem.callback(CallbackKind::Write, addr) {
                self.mem_changed = true;
                if let Err(e) = self.invoke(&cb, addr, Access::Write(value)) {
                    self.raise(e, addr);
                }
                return;
            }
        }
        if st.contains(MemState::ROM) {
            self.raise(SimError::WriteRom, addr);
        } else if st.contains(MemState::UNDEFINED) {
            self.raise(SimError::WriteUndef, addr);
        } else {
            self.mem_changed |= self.mem.store(addr, value);
            self.mem.mark_initialized(addr);
        }
    }

    pub(crate) fn invoke(
        &mut self,
        cb: &Callback,
        addr: u16,
        access: Access,
    ) -> Result<u8, SimError> {
        if self.metrics {
            let kind = match access {
                Access::Read => CallbackKind::Read,
                Access::Write(_) => CallbackKind::Write,
                Access::Exec => CallbackKind::Exec,
            };
            crate::metrics::record_callback(kind.name());
        }
        cb(self, addr, access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU8, Ordering};

    #[test]
    fn test_new_memory_is_undefined() {
        let mem = Memory::new();
        assert_eq!(mem.size(), 0x10000);
        assert_eq!(mem.state(0x1234), MemState::UNDEFINED);
        assert_eq!(mem.get_byte(0x1234), Some(0));
    }

    #[test]
    fn test_add_ram_zeroed_and_uninitialized() {
        let mut mem = Memory::new();
        mem.add_ram(0x1000, 0x100, true);
        mem.add_ram(0x2000, 0x100, false);
        assert!(mem.state(0x1000).is_empty());
        assert_eq!(mem.state(0x2000), MemState::INVALID);
        assert_eq!(mem.get_byte(0x2000), None);
        assert_eq!(mem.get_byte(0x10FF), Some(0));
        assert_eq!(mem.state(0x1100), MemState::UNDEFINED);
    }

    #[test]
    fn test_add_rom_and_redeclare() {
        let mut mem = Memory::new();
        mem.add_rom(0xE000, &[1, 2, 3]);
        assert_eq!(mem.state(0xE001), MemState::ROM);
        assert_eq!(mem.get_byte(0xE002), Some(3));
        mem.add_ram(0xE000, 3, true);
        assert!(mem.state(0xE001).is_empty());
        assert_eq!(mem.get_byte(0xE001), Some(0));
    }

    #[test]
    fn test_regions_are_clipped() {
        let mut mem = Memory::with_size(0x1000, MemoryFill::Zero);
        mem.add_ram(0x0F00, 0x1000, true);
        mem.add_data_ram(0x2000, &[1, 2, 3]);
        assert!(mem.state(0x0FFF).is_empty());
        assert_eq!(mem.state(0x1000), MemState::UNDEFINED);
        assert_eq!(mem.get_byte(0x2000), None);
    }

    #[test]
    fn test_random_fill_is_deterministic() {
        let a = Memory::with_size(256, MemoryFill::Random { seed: 7 });
        let b = Memory::with_size(256, MemoryFill::Random { seed: 7 });
        assert_eq!(a.data(), b.data());
        assert!(a.data().iter().any(|&b| b != 0));
    }

    #[test]
    fn test_mark_initialized_is_one_shot() {
        let mut mem = Memory::new();
        mem.add_ram(0x40, 1, false);
        assert!(mem.mark_initialized(0x40));
        assert!(!mem.mark_initialized(0x40));
        assert!(mem.state(0x40).is_empty());
    }

    #[test]
    fn test_exec_callback_clears_next_byte() {
        let mut mem = Memory::new();
        let cb: Callback = Arc::new(|_, _, _| Ok(0));
        mem.add_callback(0x3000, 1, CallbackKind::Exec, cb);
        assert_eq!(mem.state(0x3000), MemState::UNDEFINED);
        assert!(mem.state(0x3001).is_empty());
        assert!(mem.has_callback(CallbackKind::Exec, 0x3000));
        assert!(!mem.has_callback(CallbackKind::Read, 0x3000));
    }

    #[test]
    fn test_read_path_classifies() {
        let mut sim = Sim::new();
        sim.memory_mut().add_ram(0x2000, 1, false);

        sim.read_byte(0x5000);
        assert_eq!(sim.pending_fault().map(|f| f.error), Some(SimError::ReadUndef));
        sim.clear_fault();

        sim.read_byte(0x2000);
        assert_eq!(sim.pending_fault().map(|f| f.error), Some(SimError::ReadUninit));
        sim.clear_fault();

        // only the first read is flagged
        sim.read_byte(0x2000);
        assert!(sim.pending_fault().is_none());
    }

    #[test]
    fn test_write_path() {
        let mut sim = Sim::new();
        sim.memory_mut().add_rom(0xF000, &[0xAA]);
        sim.memory_mut().add_ram(0x0200, 1, false);

        sim.write_byte(0xF000, 0x55);
        assert_eq!(sim.memory().raw(0xF000), 0xAA);
        assert_eq!(sim.pending_fault().map(|f| f.error), Some(SimError::WriteRom));
        sim.clear_fault();

        sim.write_byte(0x9000, 0x55);
        assert_eq!(sim.memory().raw(0x9000), 0x00);
        assert_eq!(sim.pending_fault().map(|f| f.error), Some(SimError::WriteUndef));
        sim.clear_fault();

        sim.write_byte(0x0200, 0x77);
        assert!(sim.pending_fault().is_none());
        assert_eq!(sim.memory().get_byte(0x0200), Some(0x77));
        assert!(sim.memory().state(0x0200).is_empty());
    }

    #[test]
    fn test_read_and_write_callbacks() {
        let mut sim = Sim::new();
        let last = Arc::new(AtomicU8::new(0));
        let seen = last.clone();
        sim.add_callback(0xD000, 1, CallbackKind::Read, |_, addr, _| Ok((addr & 0xFF) as u8 + 1));
        sim.add_callback(0xD000, 1, CallbackKind::Write, move |_, _, access| {
            if let Access::Write(v) = access {
                seen.store(v, Ordering::Relaxed);
            }
            Ok(0)
        });
        assert_eq!(sim.read_byte(0xD000), 1);
        sim.write_byte(0xD000, 0x99);
        assert_eq!(last.load(Ordering::Relaxed), 0x99);
        assert!(sim.pending_fault().is_none());
        assert!(sim.memory().state(0xD000).contains(MemState::CALLBACK));
    }

    #[test]
    fn test_callback_error_is_recorded() {
        let mut sim = Sim::new();
        sim.add_callback(0xD010, 1, CallbackKind::Read, |_, _, _| Err(SimError::User));
        sim.read_byte(0xD010);
        assert_eq!(
            sim.pending_fault().map(|f| (f.error, f.addr)),
            Some((SimError::User, 0xD010))
        );
    }

    #[test]
    fn test_labels() {
        let mut mem = Memory::new();
        let text = "al 0600 .start\n0 0610 loop\nbad line here now\n1 0700 other\n";
        let n = mem.load_labels(text.as_bytes()).unwrap();
        assert_eq!(n, 2);
        assert_eq!(mem.label(0x0600), Some("start"));
        assert_eq!(mem.find_label("loop"), Some(0x0610));
        assert_eq!(mem.label(0x0700), None);
    }
}
