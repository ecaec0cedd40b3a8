//! Per-address execution profile.
//!
//! Binary snapshot layout, all integers little-endian:
//!
//! ```text
//! "SIM:PROF\n"           9 bytes
//! version                u16
//! cells                  u32
//! cycles[cells]          u64 each
//! branches[cells]        u64 each
//! extra[cells]           u64 each
//! no_effect[cells]       u64 each
//! totals                 8 x u64
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

use crate::memory::{Memory, DEFAULT_MEM_SIZE};

pub const PROFILE_MAGIC: &[u8; 9] = b"SIM:PROF\n";
pub const PROFILE_VERSION: u16 = 0x0101;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("not a profile file")]
    BadMagic,
    #[error("unsupported profile version {0:#06X}")]
    BadVersion(u16),
    #[error("profile has {0} cells, more than any address space")]
    TooLarge(usize),
    #[error("profile has {actual} cells, memory has {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// What one instruction did, collected while it executes.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sample {
    pub cycles: u64,
    /// `Some(taken)` for branch instructions.
    pub branch: Option<bool>,
    pub branch_cross: bool,
    pub index_cross: bool,
    pub overflow: bool,
    /// Changed a register, a flag, memory or the flow of control.
    pub effect: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileTotals {
    pub instructions: u64,
    pub cycles: u64,
    pub branches_taken: u64,
    pub branches_not_taken: u64,
    pub branch_page_cross: u64,
    pub index_page_cross: u64,
    pub arith_overflow: u64,
    pub no_effect: u64,
}

impl ProfileTotals {
    fn to_array(self) -> [u64; 8] {
        [
            self.instructions,
            self.cycles,
            self.branches_taken,
            self.branches_not_taken,
            self.branch_page_cross,
            self.index_page_cross,
            self.arith_overflow,
            self.no_effect,
        ]
    }

    fn from_array(v: [u64; 8]) -> Self {
        ProfileTotals {
            instructions: v[0],
            cycles: v[1],
            branches_taken: v[2],
            branches_not_taken: v[3],
            branch_page_cross: v[4],
            index_page_cross: v[5],
            arith_overflow: v[6],
            no_effect: v[7],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    cycles: Vec<u64>,
    branches: Vec<u64>,
    extra: Vec<u64>,
    no_effect: Vec<u64>,
    pub totals: ProfileTotals,
}

impl Profile {
    pub fn new(cells: usize) -> Self {
        Profile {
            cycles: vec![0; cells],
            branches: vec![0; cells],
            extra: vec![0; cells],
            no_effect: vec![0; cells],
            totals: ProfileTotals::default(),
        }
    }

    pub fn cells(&self) -> usize {
        self.cycles.len()
    }

    /// Attributes `sample` to the instruction starting at `addr`.
    pub fn record(&mut self, addr: u16, sample: &Sample) {
        let t = &mut self.totals;
        t.instructions += 1;
        t.cycles += sample.cycles;
        match sample.branch {
            Some(true) => t.branches_taken += 1,
            Some(false) => t.branches_not_taken += 1,
            None => {}
        }
        t.branch_page_cross += sample.branch_cross as u64;
        t.index_page_cross += sample.index_cross as u64;
        t.arith_overflow += sample.overflow as u64;
        t.no_effect += !sample.effect as u64;

        let i = addr as usize;
        if i >= self.cells() {
            return;
        }
        self.cycles[i] += sample.cycles;
        self.branches[i] += (sample.branch == Some(true)) as u64;
        self.extra[i] += sample.branch_cross as u64 + sample.index_cross as u64;
        self.no_effect[i] += !sample.effect as u64;
    }

    pub fn cycles_at(&self, addr: u16) -> u64 {
        self.cycles.get(addr as usize).copied().unwrap_or(0)
    }

    pub fn branches_at(&self, addr: u16) -> u64 {
        self.branches.get(addr as usize).copied().unwrap_or(0)
    }

    pub fn extra_at(&self, addr: u16) -> u64 {
        self.extra.get(addr as usize).copied().unwrap_or(0)
    }

    pub fn no_effect_at(&self, addr: u16) -> u64 {
        self.no_effect.get(addr as usize).copied().unwrap_or(0)
    }

    pub fn save<W: Write>(&self, mut w: W) -> Result<(), ProfileError> {
        w.write_all(PROFILE_MAGIC)?;
        w.write_all(&PROFILE_VERSION.to_le_bytes())?;
        w.write_all(&(self.cells() as u32).to_le_bytes())?;
        for table in [&self.cycles, &self.branches, &self.extra, &self.no_effect] {
            for v in table.iter() {
                w.write_all(&v.to_le_bytes())?;
            }
        }
        for v in self.totals.to_array() {
            w.write_all(&v.to_le_bytes())?;
        }
        w.flush()?;
        Ok(())
    }

    pub fn load<R: Read>(mut r: R) -> Result<Profile, ProfileError> {
        let mut magic = [0u8; 9];
        r.read_exact(&mut magic)?;
        if &magic != PROFILE_MAGIC {
            return Err(ProfileError::BadMagic);
        }
        let mut buf2 = [0u8; 2];
        r.read_exact(&mut buf2)?;
        let version = u16::from_le_bytes(buf2);
        if version != PROFILE_VERSION {
            return Err(ProfileError::BadVersion(version));
        }
        let mut buf4 = [0u8; 4];
        r.read_exact(&mut buf4)?;
        let cells = u32::from_le_bytes(buf4) as usize;
        if cells > DEFAULT_MEM_SIZE {
            return Err(ProfileError::TooLarge(cells));
        }

        let mut profile = Profile::new(cells);
        for table in [
            &mut profile.cycles,
            &mut profile.branches,
            &mut profile.extra,
            &mut profile.no_effect,
        ] {
            for v in table.iter_mut() {
                *v = read_u64(&mut r)?;
            }
        }
        let mut totals = [0u64; 8];
        for v in totals.iter_mut() {
            *v = read_u64(&mut r)?;
        }
        profile.totals = ProfileTotals::from_array(totals);
        Ok(profile)
    }

    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ProfileError> {
        self.save(BufWriter::new(File::create(path)?))
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Profile, ProfileError> {
        Profile::load(BufReader::new(File::open(path)?))
    }

    /// Summary of the `top` most expensive addresses, labelled from `mem`.
    pub fn report(&self, mem: &Memory, top: usize) -> ProfileReport {
        let mut hot: Vec<usize> = (0..self.cells()).filter(|&i| self.cycles[i] > 0).collect();
        hot.sort_by(|&a, &b| self.cycles[b].cmp(&self.cycles[a]).then(a.cmp(&b)));
        hot.truncate(top);
        let hot_spots = hot
            .into_iter()
            .map(|i| HotSpot {
                addr: i as u16,
                label: mem.label(i as u16).map(str::to_string),
                cycles: self.cycles[i],
                branches_taken: self.branches[i],
                extra_cycles: self.extra[i],
                no_effect: self.no_effect[i],
            })
            .collect();
        ProfileReport {
            generated_at: Utc::now(),
            totals: self.totals,
            hot_spots,
        }
    }
}

fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotSpot {
    pub addr: u16,
    pub label: Option<String>,
    pub cycles: u64,
    pub branches_taken: u64,
    pub extra_cycles: u64,
    pub no_effect: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileReport {
    pub generated_at: DateTime<Utc>,
    pub totals: ProfileTotals,
    pub hot_spots: Vec<HotSpot>,
}
