use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Conditions the engine can raise while executing.
///
/// Each kind has a stable negative code, which is what callbacks and
/// embedding applications use to talk about errors across the engine boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum SimError {
    #[error("execute from undefined memory")]
    ExecUndef,
    #[error("execute from uninitialized memory")]
    ExecUninit,
    #[error("read from undefined memory")]
    ReadUndef,
    #[error("read from uninitialized memory")]
    ReadUninit,
    #[error("write to undefined memory")]
    WriteUndef,
    #[error("write to read-only memory")]
    WriteRom,
    #[error("BRK instruction")]
    Break,
    #[error("invalid instruction")]
    InvalidInsn,
    #[error("return from call")]
    CallRet,
    #[error("cycle limit reached")]
    CycleLimit,
    #[error("user error")]
    User,
}

impl SimError {
    pub const ALL: [SimError; 11] = [
        SimError::ExecUndef,
        SimError::ExecUninit,
        SimError::ReadUndef,
        SimError::ReadUninit,
        SimError::WriteUndef,
        SimError::WriteRom,
        SimError::Break,
        SimError::InvalidInsn,
        SimError::CallRet,
        SimError::CycleLimit,
        SimError::User,
    ];

    pub fn code(self) -> i32 {
        match self {
            SimError::ExecUndef => -1,
            SimError::ExecUninit => -2,
            SimError::ReadUndef => -3,
            SimError::ReadUninit => -4,
            SimError::WriteUndef => -5,
            SimError::WriteRom => -6,
            SimError::Break => -7,
            SimError::InvalidInsn => -8,
            SimError::CallRet => -9,
            SimError::CycleLimit => -10,
            SimError::User => -11,
        }
    }

    pub fn from_code(code: i32) -> Option<SimError> {
        SimError::ALL.into_iter().find(|e| e.code() == code)
    }

    /// Short lowercase name, used for metric labels and log lines.
    pub fn name(self) -> &'static str {
        match self {
            SimError::ExecUndef => "exec_undef",
            SimError::ExecUninit => "exec_uninit",
            SimError::ReadUndef => "read_undef",
            SimError::ReadUninit => "read_uninit",
            SimError::WriteUndef => "write_undef",
            SimError::WriteRom => "write_rom",
            SimError::Break => "break",
            SimError::InvalidInsn => "invalid_insn",
            SimError::CallRet => "call_ret",
            SimError::CycleLimit => "cycle_limit",
            SimError::User => "user",
        }
    }

    /// True for the kinds that always stop the run loop.
    pub fn is_unconditional(self) -> bool {
        matches!(
            self,
            SimError::Break
                | SimError::InvalidInsn
                | SimError::CallRet
                | SimError::CycleLimit
                | SimError::User
        )
    }
}

/// How strict the engine is about memory errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorLevel {
    /// Memory errors are logged, never fatal.
    None,
    /// Accesses to undefined memory stop execution, other memory errors are logged.
    #[default]
    Memory,
    /// Every memory error stops execution.
    Full,
}

impl ErrorLevel {
    /// Decides whether `err` stops the run loop at this level.
    pub fn is_fatal(self, err: SimError) -> bool {
        if err.is_unconditional() {
            return true;
        }
        match self {
            ErrorLevel::None => false,
            ErrorLevel::Memory => matches!(err, SimError::ExecUndef | SimError::WriteUndef),
            ErrorLevel::Full => true,
        }
    }
}

impl FromStr for ErrorLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(ErrorLevel::None),
            "memory" | "mem" => Ok(ErrorLevel::Memory),
            "full" => Ok(ErrorLevel::Full),
            other => Err(format!("unknown error level '{}'", other)),
        }
    }
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorLevel::None => "none",
            ErrorLevel::Memory => "memory",
            ErrorLevel::Full => "full",
        };
        f.write_str(s)
    }
}

/// An error together with the address that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{error} at ${addr:04X}")]
pub struct Fault {
    pub error: SimError,
    pub addr: u16,
}

/// Single-slot error capture for one instruction window.
///
/// The first error recorded wins; later ones are dropped until `take` empties
/// the slot.
#[derive(Debug, Default, Clone, Copy)]
pub struct PendingFault(Option<Fault>);

impl PendingFault {
    /// Records `error` unless the slot is already occupied. Returns true if it was stored.
    pub fn raise(&mut self, error: SimError, addr: u16) -> bool {
        if self.0.is_some() {
            return false;
        }
        self.0 = Some(Fault { error, addr });
        true
    }

    pub fn take(&mut self) -> Option<Fault> {
        self.0.take()
    }

    pub fn peek(&self) -> Option<Fault> {
        self.0
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }
}
