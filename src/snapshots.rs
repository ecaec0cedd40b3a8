use base64::prelude::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::cpu::Sim;
use crate::registers::Registers;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot is for {expected} bytes of memory, simulator has {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("bad base64 in snapshot: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("corrupt memory image: {0}")]
    Rle(String),
    #[error("snapshot digest does not match its contents")]
    Digest,
    #[error("bad snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Machine state at a point in time: registers, cycle count, memory contents
/// and per-byte state flags. Hooks and labels belong to the host and are not
/// captured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSnapshot {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub registers: Registers,
    pub cycles: u64,
    pub mem_size: usize,
    /// Base64 of the run-length encoded memory bytes.
    pub memory: String,
    /// Base64 of the run-length encoded state flags.
    pub state: String,
    /// SHA-256 over the raw memory bytes followed by the raw state flags.
    pub digest: String,
}

impl MachineSnapshot {
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Compressed size of the two images in bytes.
    pub fn size_bytes(&self) -> usize {
        self.memory.len() + self.state.len()
    }
}

fn digest(data: &[u8], state: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.update(state);
    format!("{:x}", hasher.finalize())
}

impl Sim {
    pub fn snapshot(&self, name: &str) -> MachineSnapshot {
        let data = self.mem.data();
        let state = self.mem.state_bytes();
        MachineSnapshot {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
            registers: self.regs,
            cycles: self.cycles(),
            mem_size: data.len(),
            memory: BASE64_STANDARD.encode(compress_memory(data)),
            state: BASE64_STANDARD.encode(compress_memory(&state)),
            digest: digest(data, &state),
        }
    }

    /// Puts the machine back into the captured state. Nothing is changed if
    /// the snapshot does not validate.
    pub fn restore(&mut self, snap: &MachineSnapshot) -> Result<(), SnapshotError> {
        let size = self.mem.size();
        if snap.mem_size != size {
            return Err(SnapshotError::SizeMismatch { expected: snap.mem_size, actual: size });
        }
        let data = decompress_memory(&BASE64_STANDARD.decode(&snap.memory)?, size)
            .map_err(SnapshotError::Rle)?;
        let state = decompress_memory(&BASE64_STANDARD.decode(&snap.state)?, size)
            .map_err(SnapshotError::Rle)?;
        if digest(&data, &state) != snap.digest {
            return Err(SnapshotError::Digest);
        }

        self.mem.restore_image(&data, &state);
        self.regs = snap.registers;
        self.set_cycles(snap.cycles);
        self.clear_fault();
        log::debug!("restored snapshot '{}' ({})", snap.name, snap.id);
        Ok(())
    }
}

// Run-length encoding: 0xFF <count> <value> for runs, 0xFF 0x00 for a literal 0xFF.
fn compress_memory(memory: &[u8]) -> Vec<u8> {
    let mut compressed = Vec::new();
    let mut i = 0;

    while i < memory.len() {
        let current_byte = memory[i];
        let mut count = 1;
        while i + count < memory.len() && memory[i + count] == current_byte && count < 255 {
            count += 1;
        }

        if count > 3 || current_byte == 0 {
            compressed.push(0xFF);
            compressed.push(count as u8);
            compressed.push(current_byte);
        } else {
            for _ in 0..count {
                if current_byte == 0xFF {
                    compressed.push(0xFF);
                    compressed.push(0x00);
                } else {
                    compressed.push(current_byte);
                }
            }
        }
        i += count;
    }

    compressed
}

fn decompress_memory(compressed: &[u8], size: usize) -> Result<Vec<u8>, String> {
    let mut decompressed = Vec::with_capacity(size);
    let mut i = 0;

    while i < compressed.len() {
        if compressed[i] != 0xFF {
            decompressed.push(compressed[i]);
            i += 1;
            continue;
        }
        match compressed.get(i + 1) {
            None => return Err("truncated RLE data".to_string()),
            Some(0x00) => {
                decompressed.push(0xFF);
                i += 2;
            }
            Some(&count) => {
                let value = *compressed
                    .get(i + 2)
                    .ok_or_else(|| "truncated RLE sequence".to_string())?;
                decompressed.extend(std::iter::repeat(value).take(count as usize));
                i += 3;
            }
        }
        if decompressed.len() > size {
            break;
        }
    }

    if decompressed.len() != size {
        return Err(format!("decompressed size {} != {}", decompressed.len(), size));
    }
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemState;

    #[test]
    fn test_memory_compression() {
        let mut memory = vec![0u8; 65536];
        memory[0x1000..0x1004].copy_from_slice(&[0xFF; 4]);
        memory[0x2000] = 0xAA;
        memory[0x2001] = 0xBB;
        memory[0x2002] = 0xCC;

        let compressed = compress_memory(&memory);
        let decompressed = decompress_memory(&compressed, memory.len()).unwrap();

        assert_eq!(memory, decompressed);
        assert!(compressed.len() < memory.len());
    }

    #[test]
    fn test_rle_escape() {
        let mut memory = vec![0x00; 300];
        memory[0] = 0xFF;
        memory[1] = 0xFF;
        memory[2] = 0xAA;
        memory[3] = 0xFF;
        memory[4] = 0x00;

        let compressed = compress_memory(&memory);
        assert_eq!(&compressed[..6], &[0xFF, 0x00, 0xFF, 0x00, 0xAA, 0xFF]);
        assert_eq!(decompress_memory(&compressed, 300).unwrap(), memory);
    }

    #[test]
    fn test_decompress_rejects_bad_input() {
        assert!(decompress_memory(&[0x01, 0xFF], 2).is_err());
        assert!(decompress_memory(&[0xFF, 0x05], 5).is_err());
        assert!(decompress_memory(&[0x01, 0x02], 3).is_err());
    }

    fn sim_with_program() -> Sim {
        let mut sim = Sim::new();
        sim.memory_mut().add_ram(0, 0x1000, false);
        sim.memory_mut().add_data_ram(0x0600, &[0xA9, 0x07, 0x85, 0x10]);
        sim.memory_mut().add_rom(0xF000, &[0xEA; 16]);
        sim
    }

    #[test]
    fn test_snapshot_restore() {
        let mut sim = sim_with_program();
        sim.regs.pc = 0x0600;
        sim.step().unwrap();
        sim.step().unwrap();
        let snap = sim.snapshot("after store");
        assert_eq!(snap.mem_size, 0x10000);
        assert_eq!(snap.cycles, 5);
        assert_eq!(snap.digest.len(), 64);

        sim.write_byte(0x10, 0x99);
        sim.write_byte(0x20, 0x01);
        sim.regs.a = 0;
        sim.restore(&snap).unwrap();

        assert_eq!(sim.regs.a, 0x07);
        assert_eq!(sim.regs.pc, 0x0604);
        assert_eq!(sim.cycles(), 5);
        assert_eq!(sim.memory().get_byte(0x10), Some(0x07));
        assert!(sim.memory().state(0x20).contains(MemState::INVALID));
        assert!(sim.memory().state(0xF000).contains(MemState::ROM));
    }

    #[test]
    fn test_snapshot_json() {
        let sim = sim_with_program();
        let snap = sim.snapshot("json");
        let json = snap.to_json().unwrap();
        let back = MachineSnapshot::from_json(&json).unwrap();
        assert_eq!(back.id, snap.id);
        assert_eq!(back.digest, snap.digest);
        assert!(back.size_bytes() > 0);
    }

    #[test]
    fn test_restore_rejects_tampering() {
        let mut sim = sim_with_program();
        let mut snap = sim.snapshot("x");
        snap.digest = "0".repeat(64);
        assert!(matches!(sim.restore(&snap), Err(SnapshotError::Digest)));

        let mut small = Sim::with_memory(crate::memory::Memory::with_size(
            0x100,
            crate::memory::MemoryFill::Zero,
        ));
        let snap = sim.snapshot("y");
        assert!(matches!(
            small.restore(&snap),
            Err(SnapshotError::SizeMismatch { expected: 0x10000, actual: 0x100 })
        ));
    }
}
