use std::io::Write;
use std::sync::Arc;

use log::{debug, warn};

use crate::addressing::Operand;
use crate::alu;
use crate::config::SimConfig;
use crate::error::{ErrorLevel, Fault, PendingFault, SimError};
use crate::memory::{Access, Callback, CallbackKind, MemState, Memory};
use crate::metrics;
use crate::opcodes::{decode, Instruction, Mnemonic};
use crate::profile::{Profile, ProfileError, Sample};
use crate::registers::*;

/// `call` pushes `CALL_SENTINEL - 1`, so the final RTS of the callee lands here.
pub const CALL_SENTINEL: u16 = 0xFFFF;

/// The instruction-set simulator: memory, registers and the execution loop.
pub struct Sim {
    pub regs: Registers,
    pub(crate) mem: Memory,
    cycles: u64,
    cycle_limit: u64,
    error_level: ErrorLevel,
    pending: PendingFault,
    trace: Option<Box<dyn Write + Send>>,
    profile: Option<Profile>,
    pub(crate) metrics: bool,
    call_sentinel: Option<u16>,
    // address of the instruction being executed
    insn_addr: u16,
    pub(crate) mem_changed: bool,
    sample: Sample,
}

impl Default for Sim {
    fn default() -> Self {
        Self::new()
    }
}

impl Sim {
    pub fn new() -> Self {
        Self::with_memory(Memory::new())
    }

    pub fn with_memory(mem: Memory) -> Self {
        Sim {
            regs: Registers::new(),
            mem,
            cycles: 0,
            cycle_limit: 0,
            error_level: ErrorLevel::default(),
            pending: PendingFault::default(),
            trace: None,
            profile: None,
            metrics: false,
            call_sentinel: None,
            insn_addr: 0,
            mem_changed: false,
            sample: Sample::default(),
        }
    }

    pub fn with_config(config: &SimConfig) -> Self {
        let mut sim = Self::with_memory(Memory::with_size(config.mem_size, config.fill));
        sim.error_level = config.error_level;
        sim.cycle_limit = config.cycle_limit;
        if config.trace {
            sim.set_trace(Some(Box::new(std::io::stderr())));
        }
        if config.profile {
            sim.enable_profile();
        }
        if config.metrics {
            sim.enable_metrics();
        }
        sim
    }

    pub fn memory(&self) -> &Memory {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.mem
    }

    /// Installs a hook over `len` addresses; see [`Memory::add_callback`].
    pub fn add_callback<F>(&mut self, addr: usize, len: usize, kind: CallbackKind, f: F)
    where
        F: Fn(&mut Sim, u16, Access) -> Result<u8, SimError> + Send + Sync + 'static,
    {
        let cb: Callback = Arc::new(f);
        self.mem.add_callback(addr, len, kind, cb);
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Stops execution with `CycleLimit` once the total cycle count reaches
    /// `limit`. Zero disables the limit.
    pub fn set_cycle_limit(&mut self, limit: u64) {
        self.cycle_limit = limit;
    }

    pub fn error_level(&self) -> ErrorLevel {
        self.error_level
    }

    pub fn set_error_level(&mut self, level: ErrorLevel) {
        self.error_level = level;
    }

    /// Directs the per-instruction trace to `sink`; `None` turns tracing off.
    pub fn set_trace(&mut self, sink: Option<Box<dyn Write + Send>>) {
        self.trace = sink;
    }

    pub fn enable_profile(&mut self) {
        if self.profile.is_none() {
            self.profile = Some(Profile::new(self.mem.size()));
        }
    }

    /// Continues profiling into `profile`, which must cover the whole memory.
    pub fn set_profile(&mut self, profile: Profile) -> Result<(), ProfileError> {
        let expected = self.mem.size();
        if profile.cells() != expected {
            return Err(ProfileError::SizeMismatch { expected, actual: profile.cells() });
        }
        self.profile = Some(profile);
        Ok(())
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub fn enable_metrics(&mut self) {
        metrics::init_metrics();
        self.metrics = true;
    }

    /// Error recorded in the current instruction window, if any.
    pub fn pending_fault(&self) -> Option<Fault> {
        self.pending.peek()
    }

    pub fn clear_fault(&mut self) {
        self.pending.take();
    }

    /// Records `error` at `addr` unless an error is already pending.
    pub fn raise(&mut self, error: SimError, addr: u16) {
        self.pending.raise(error, addr);
    }

    pub(crate) fn set_cycles(&mut self, cycles: u64) {
        self.cycles = cycles;
    }

    pub fn push(&mut self, value: u8) {
        self.write_byte(0x0100 | self.regs.sp as u16, value);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
    }

    pub fn pull(&mut self) -> u8 {
        self.regs.sp = self.regs.sp.wrapping_add(1);
        self.read_byte(0x0100 | self.regs.sp as u16)
    }

    pub fn push_word(&mut self, value: u16) {
        self.push((value >> 8) as u8);
        self.push((value & 0xFF) as u8);
    }

    pub fn pull_word(&mut self) -> u16 {
        let low = self.pull() as u16;
        let high = self.pull() as u16;
        (high << 8) | low
    }

    /// Reads a status flag for an instruction. Flags never set by the program
    /// are reported as uninitialized reads but still return the stored bit.
    fn flag(&mut self, flag: u8) -> bool {
        if !self.regs.is_known(flag) {
            self.raise(SimError::ReadUninit, self.insn_addr);
            self.regs.unknown &= !flag;
        }
        self.regs.get_flag(flag)
    }

    /// Executes one instruction window and applies the error policy.
    pub fn step(&mut self) -> Result<(), Fault> {
        self.execute_one();
        self.settle()
    }

    /// Runs from `addr` until a fatal condition. Reaching the call sentinel
    /// counts as success; every other stop is returned as the fault.
    pub fn run(&mut self, addr: u16) -> Result<(), Fault> {
        self.regs.pc = addr;
        debug!("run from ${:04X}", addr);
        let start = self.cycles;
        let fault = loop {
            if let Err(fault) = self.step() {
                break fault;
            }
        };
        if self.metrics {
            metrics::record_cycles(self.cycles - start);
        }
        debug!("stopped after {} cycles: {}", self.cycles - start, fault);
        match fault.error {
            SimError::CallRet => Ok(()),
            _ => Err(fault),
        }
    }

    /// Calls the subroutine at `addr` and runs until it returns. The program
    /// counter is restored afterwards.
    pub fn call(&mut self, addr: u16) -> Result<(), Fault> {
        let saved_pc = self.regs.pc;
        let saved_sentinel = self.call_sentinel.replace(CALL_SENTINEL);
        let outer = std::mem::take(&mut self.pending);
        self.push_word(CALL_SENTINEL.wrapping_sub(1));
        let result = self.run(addr);
        self.pending = outer;
        self.call_sentinel = saved_sentinel;
        self.regs.pc = saved_pc;
        result
    }

    fn settle(&mut self) -> Result<(), Fault> {
        let Some(fault) = self.pending.take() else {
            return Ok(());
        };
        let fatal = self.error_level.is_fatal(fault.error);
        if self.metrics {
            metrics::record_fault(fault.error.name(), fatal);
        }
        if fatal {
            Err(fault)
        } else {
            warn!("{} (continuing)", fault);
            Ok(())
        }
    }

    fn execute_one(&mut self) {
        let pc = self.regs.pc;
        self.insn_addr = pc;

        if self.cycle_limit != 0 && self.cycles >= self.cycle_limit {
            self.raise(SimError::CycleLimit, pc);
            return;
        }
        if self.call_sentinel == Some(pc) {
            self.raise(SimError::CallRet, pc);
            return;
        }
        if let Some(cb) = self.mem.callback(CallbackKind::Exec, pc) {
            match self.invoke(&cb, pc, Access::Exec) {
                Err(e) => self.raise(e, pc),
                Ok(_) if self.regs.pc == pc => {
                    let ret = self.pull_word();
                    self.regs.pc = ret.wrapping_add(1);
                }
                Ok(_) => {}
            }
            return;
        }
        if self.trace.is_some() {
            self.write_trace(pc);
        }

        let opcode = self.fetch_byte(pc);
        let insn = *decode(opcode);
        let mut arg = 0u16;
        if insn.len() > 1 {
            arg = self.fetch_byte(pc.wrapping_add(1)) as u16;
        }
        if insn.len() > 2 {
            arg |= (self.fetch_byte(pc.wrapping_add(2)) as u16) << 8;
        }
        let next = pc.wrapping_add(insn.len());
        self.regs.pc = next;

        let before = self.regs;
        let start = self.cycles;
        self.mem_changed = false;
        self.sample = Sample::default();

        self.execute(insn, arg);

        if self.metrics {
            metrics::record_instruction(insn.mnemonic.name());
        }
        if self.profile.is_some() {
            self.sample.cycles = self.cycles - start;
            // flag validity is bookkeeping, not machine state
            let r = &self.regs;
            self.sample.effect = self.mem_changed
                || r.pc != next
                || (r.a, r.x, r.y, r.sp, r.status)
                    != (before.a, before.x, before.y, before.sp, before.status);
            let sample = self.sample;
            if let Some(profile) = self.profile.as_mut() {
                profile.record(pc, &sample);
            }
        }
    }

    fn write_trace(&mut self, pc: u16) {
        let line = crate::disasm::trace_line(&self.mem, &self.regs, self.cycles, pc);
        if let Some(sink) = self.trace.as_mut() {
            if let Err(e) = writeln!(sink, "{}", line) {
                warn!("trace output failed, disabling trace: {}", e);
                self.trace = None;
            }
        }
    }

    fn load(&mut self, operand: Operand) -> u8 {
        match operand {
            Operand::Immediate(v) => v,
            Operand::Memory { addr, .. } => self.read_byte(addr),
            Operand::Accumulator => self.regs.a,
            Operand::None | Operand::Branch(_) => 0,
        }
    }

    fn store(&mut self, operand: Operand, value: u8) {
        match operand {
            Operand::Memory { addr, .. } => self.write_byte(addr, value),
            Operand::Accumulator => self.regs.a = value,
            _ => {}
        }
    }

    /// Read-modify-write on the accumulator or memory.
    fn modify(&mut self, operand: Operand, f: impl FnOnce(&mut Sim, u8) -> u8) {
        let value = self.load(operand);
        let result = f(self, value);
        self.store(operand, result);
    }

    fn execute(&mut self, insn: Instruction, arg: u16) {
        use Mnemonic::*;

        if insn.mnemonic == Ill {
            self.regs.pc = self.insn_addr;
            self.raise(SimError::InvalidInsn, self.insn_addr);
            return;
        }

        let operand = self.resolve(insn.mode, arg);
        self.cycles += insn.cycles as u64;
        if insn.mnemonic.pays_page_cross() && operand.page_cross() {
            self.cycles += 1;
            self.sample.index_cross = true;
        }

        match insn.mnemonic {
            Lda => {
                let v = self.load(operand);
                self.regs.a = v;
                self.regs.update_zero_and_negative_flags(v);
            }
            Ldx => {
                let v = self.load(operand);
                self.regs.x = v;
                self.regs.update_zero_and_negative_flags(v);
            }
            Ldy => {
                let v = self.load(operand);
                self.regs.y = v;
                self.regs.update_zero_and_negative_flags(v);
            }
            Sta => self.store(operand, self.regs.a),
            Stx => self.store(operand, self.regs.x),
            Sty => self.store(operand, self.regs.y),

            Adc => {
                let m = self.load(operand);
                self.adc(m);
            }
            Sbc => {
                let m = self.load(operand);
                self.sbc(m);
            }
            And => {
                let v = self.regs.a & self.load(operand);
                self.regs.a = v;
                self.regs.update_zero_and_negative_flags(v);
            }
            Ora => {
                let v = self.regs.a | self.load(operand);
                self.regs.a = v;
                self.regs.update_zero_and_negative_flags(v);
            }
            Eor => {
                let v = self.regs.a ^ self.load(operand);
                self.regs.a = v;
                self.regs.update_zero_and_negative_flags(v);
            }
            Bit => self.bit(operand),

            Cmp => self.compare(self.regs.a, operand),
            Cpx => self.compare(self.regs.x, operand),
            Cpy => self.compare(self.regs.y, operand),

            Asl => self.modify(operand, |sim, v| sim.shift(alu::asl(v))),
            Lsr => self.modify(operand, |sim, v| sim.shift(alu::lsr(v))),
            Rol => self.modify(operand, |sim, v| {
                let c = sim.flag(CARRY_FLAG);
                sim.shift(alu::rol(v, c))
            }),
            Ror => self.modify(operand, |sim, v| {
                let c = sim.flag(CARRY_FLAG);
                sim.shift(alu::ror(v, c))
            }),
            Inc => self.modify(operand, |sim, v| {
                let r = v.wrapping_add(1);
                sim.regs.update_zero_and_negative_flags(r);
                r
            }),
            Dec => self.modify(operand, |sim, v| {
                let r = v.wrapping_sub(1);
                sim.regs.update_zero_and_negative_flags(r);
                r
            }),
            Inx => {
                self.regs.x = self.regs.x.wrapping_add(1);
                self.regs.update_zero_and_negative_flags(self.regs.x);
            }
            Iny => {
                self.regs.y = self.regs.y.wrapping_add(1);
                self.regs.update_zero_and_negative_flags(self.regs.y);
            }
            Dex => {
                self.regs.x = self.regs.x.wrapping_sub(1);
                self.regs.update_zero_and_negative_flags(self.regs.x);
            }
            Dey => {
                self.regs.y = self.regs.y.wrapping_sub(1);
                self.regs.update_zero_and_negative_flags(self.regs.y);
            }

            Tax => {
                self.regs.x = self.regs.a;
                self.regs.update_zero_and_negative_flags(self.regs.x);
            }
            Tay => {
                self.regs.y = self.regs.a;
                self.regs.update_zero_and_negative_flags(self.regs.y);
            }
            Txa => {
                self.regs.a = self.regs.x;
                self.regs.update_zero_and_negative_flags(self.regs.a);
            }
            Tya => {
                self.regs.a = self.regs.y;
                self.regs.update_zero_and_negative_flags(self.regs.a);
            }
            Tsx => {
                self.regs.x = self.regs.sp;
                self.regs.update_zero_and_negative_flags(self.regs.x);
            }
            Txs => self.regs.sp = self.regs.x,

            Pha => self.push(self.regs.a),
            Php => self.push(self.regs.status | BREAK_COMMAND | UNUSED_FLAG),
            Pla => {
                let v = self.pull();
                self.regs.a = v;
                self.regs.update_zero_and_negative_flags(v);
            }
            Plp => {
                let v = self.pull();
                self.regs.set_status(v);
            }

            Jmp => {
                if let Operand::Memory { addr, .. } = operand {
                    self.regs.pc = addr;
                }
            }
            Jsr => {
                if let Operand::Memory { addr, .. } = operand {
                    let ret = self.regs.pc.wrapping_sub(1);
                    self.push_word(ret);
                    self.regs.pc = addr;
                }
            }
            Rts => {
                let ret = self.pull_word();
                self.regs.pc = ret.wrapping_add(1);
            }
            Rti => {
                let p = self.pull();
                self.regs.set_status(p);
                self.regs.pc = self.pull_word();
            }
            Brk => self.raise(SimError::Break, self.insn_addr),

            Bcc => {
                let c = !self.flag(CARRY_FLAG);
                self.branch(operand, c);
            }
            Bcs => {
                let c = self.flag(CARRY_FLAG);
                self.branch(operand, c);
            }
            Bne => {
                let c = !self.flag(ZERO_FLAG);
                self.branch(operand, c);
            }
            Beq => {
                let c = self.flag(ZERO_FLAG);
                self.branch(operand, c);
            }
            Bpl => {
                let c = !self.flag(NEGATIVE_FLAG);
                self.branch(operand, c);
            }
            Bmi => {
                let c = self.flag(NEGATIVE_FLAG);
                self.branch(operand, c);
            }
            Bvc => {
                let c = !self.flag(OVERFLOW_FLAG);
                self.branch(operand, c);
            }
            Bvs => {
                let c = self.flag(OVERFLOW_FLAG);
                self.branch(operand, c);
            }

            Clc => self.regs.set_flag(CARRY_FLAG, false),
            Sec => self.regs.set_flag(CARRY_FLAG, true),
            Cli => self.regs.set_flag(INTERRUPT_DISABLE, false),
            Sei => self.regs.set_flag(INTERRUPT_DISABLE, true),
            Cld => self.regs.set_flag(DECIMAL_MODE, false),
            Sed => self.regs.set_flag(DECIMAL_MODE, true),
            Clv => self.regs.set_flag(OVERFLOW_FLAG, false),

            // Ill is rejected before dispatch
            Nop | Ill => {}
        }
    }

    fn apply(&mut self, r: alu::AluResult) {
        self.regs.set_flag(CARRY_FLAG, r.carry);
        self.regs.set_flag(ZERO_FLAG, r.zero);
        self.regs.set_flag(NEGATIVE_FLAG, r.negative);
    }

    fn adc(&mut self, m: u8) {
        let carry = self.flag(CARRY_FLAG);
        let r = if self.flag(DECIMAL_MODE) {
            alu::adc_decimal(self.regs.a, m, carry)
        } else {
            alu::adc_binary(self.regs.a, m, carry)
        };
        self.finish_arith(r);
    }

    fn sbc(&mut self, m: u8) {
        let carry = self.flag(CARRY_FLAG);
        let r = if self.flag(DECIMAL_MODE) {
            alu::sbc_decimal(self.regs.a, m, carry)
        } else {
            alu::sbc_binary(self.regs.a, m, carry)
        };
        self.finish_arith(r);
    }

    fn finish_arith(&mut self, r: alu::AluResult) {
        self.regs.a = r.value;
        self.apply(r);
        self.regs.set_flag(OVERFLOW_FLAG, r.overflow);
        self.sample.overflow = r.overflow;
    }

    fn compare(&mut self, reg: u8, operand: Operand) {
        let m = self.load(operand);
        self.apply(alu::compare(reg, m));
    }

    fn shift(&mut self, (value, carry): (u8, bool)) -> u8 {
        self.regs.set_flag(CARRY_FLAG, carry);
        self.regs.update_zero_and_negative_flags(value);
        value
    }

    /// BIT against a declared-but-never-written location without a read hook
    /// leaves N, V and Z unknown instead of reading it. Programs do this to
    /// skip over instructions, and the bits are meaningless anyway.
    fn bit(&mut self, operand: Operand) {
        let Operand::Memory { addr, .. } = operand else {
            return;
        };
        if self.mem.state(addr).contains(MemState::INVALID)
            && !self.mem.has_callback(CallbackKind::Read, addr)
        {
            self.regs.forget_flags(NEGATIVE_FLAG | OVERFLOW_FLAG | ZERO_FLAG);
            return;
        }
        let m = self.read_byte(addr);
        self.regs.set_flag(NEGATIVE_FLAG, m & 0x80 != 0);
        self.regs.set_flag(OVERFLOW_FLAG, m & 0x40 != 0);
        self.regs.set_flag(ZERO_FLAG, self.regs.a & m == 0);
    }

    fn branch(&mut self, operand: Operand, taken: bool) {
        let Operand::Branch(target) = operand else {
            return;
        };
        self.sample.branch = Some(taken);
        if !taken {
            return;
        }
        self.cycles += 1;
        if target & 0xFF00 != self.regs.pc & 0xFF00 {
            self.cycles += 1;
            self.sample.branch_cross = true;
        }
        self.regs.pc = target;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(program: &[u8]) -> Sim {
        let mut sim = Sim::new();
        sim.memory_mut().add_ram(0, 0x10000, true);
        sim.memory_mut().add_data_ram(0x0600, program);
        sim.regs.set_status(0);
        sim.regs.pc = 0x0600;
        sim
    }

    #[test]
    fn test_lda_immediate() {
        let mut sim = setup(&[0xA9, 0x42]);
        sim.step().unwrap();
        assert_eq!(sim.regs.a, 0x42);
        assert_eq!(sim.regs.pc, 0x0602);
        assert!(!sim.regs.get_flag(ZERO_FLAG));
        assert!(!sim.regs.get_flag(NEGATIVE_FLAG));
        assert_eq!(sim.cycles(), 2);
    }

    #[test]
    fn test_adc() {
        // LDA #$10, ADC #$20
        let mut sim = setup(&[0xA9, 0x10, 0x69, 0x20]);
        sim.step().unwrap();
        sim.step().unwrap();
        assert_eq!(sim.regs.a, 0x30);
        assert!(!sim.regs.get_flag(CARRY_FLAG));
        assert!(!sim.regs.get_flag(ZERO_FLAG));
    }

    #[test]
    fn test_adc_decimal_mode() {
        // SED, CLC, LDA #$19, ADC #$28
        let mut sim = setup(&[0xF8, 0x18, 0xA9, 0x19, 0x69, 0x28]);
        for _ in 0..4 {
            sim.step().unwrap();
        }
        assert_eq!(sim.regs.a, 0x47);
        assert!(!sim.regs.get_flag(CARRY_FLAG));
    }

    #[test]
    fn test_transfer_instructions() {
        // LDA #$42, TAX, TAY
        let mut sim = setup(&[0xA9, 0x42, 0xAA, 0xA8]);
        for _ in 0..3 {
            sim.step().unwrap();
        }
        assert_eq!(sim.regs.x, 0x42);
        assert_eq!(sim.regs.y, 0x42);
    }

    #[test]
    fn test_jsr_rts() {
        // JSR $0610 ; ... ; $0610: LDX #$07, RTS
        let mut sim = setup(&[0x20, 0x10, 0x06]);
        sim.memory_mut().add_data_ram(0x0610, &[0xA2, 0x07, 0x60]);
        sim.step().unwrap();
        assert_eq!(sim.regs.pc, 0x0610);
        assert_eq!(sim.regs.sp, 0xFD);
        assert_eq!(sim.memory().get_byte(0x01FF), Some(0x06));
        assert_eq!(sim.memory().get_byte(0x01FE), Some(0x02));
        sim.step().unwrap();
        sim.step().unwrap();
        assert_eq!(sim.regs.pc, 0x0603);
        assert_eq!(sim.regs.x, 0x07);
        assert_eq!(sim.cycles(), 6 + 2 + 6);
    }

    #[test]
    fn test_php_plp() {
        // SEC, PHP, CLC, PLP
        let mut sim = setup(&[0x38, 0x08, 0x18, 0x28]);
        for _ in 0..4 {
            sim.step().unwrap();
        }
        assert!(sim.regs.get_flag(CARRY_FLAG));
        assert_eq!(sim.regs.sp, 0xFF);
    }

    #[test]
    fn test_shift_memory() {
        // ASL $10 ; ROR A
        let mut sim = setup(&[0x06, 0x10, 0x6A]);
        sim.write_byte(0x10, 0x81);
        sim.regs.a = 0x02;
        sim.step().unwrap();
        assert_eq!(sim.memory().get_byte(0x10), Some(0x02));
        assert!(sim.regs.get_flag(CARRY_FLAG));
        sim.step().unwrap();
        assert_eq!(sim.regs.a, 0x81);
        assert!(!sim.regs.get_flag(CARRY_FLAG));
        assert_eq!(sim.cycles(), 5 + 2);
    }

    #[test]
    fn test_compare_flags() {
        // LDA #$40, CMP #$30
        let mut sim = setup(&[0xA9, 0x40, 0xC9, 0x30]);
        sim.step().unwrap();
        sim.step().unwrap();
        assert!(sim.regs.get_flag(CARRY_FLAG));
        assert!(!sim.regs.get_flag(ZERO_FLAG));
        assert_eq!(sim.regs.a, 0x40);
    }

    #[test]
    fn test_bit_on_uninitialized_forgets_flags() {
        // BIT $2000
        let mut sim = setup(&[0x2C, 0x00, 0x20]);
        sim.memory_mut().add_ram(0x2000, 1, false);
        sim.step().unwrap();
        assert!(!sim.regs.is_known(NEGATIVE_FLAG));
        assert!(!sim.regs.is_known(OVERFLOW_FLAG));
        assert!(!sim.regs.is_known(ZERO_FLAG));
        // location was not read, so it is still uninitialized
        assert!(sim.memory().state(0x2000).contains(MemState::INVALID));
    }

    #[test]
    fn test_bit_sets_flags() {
        // LDA #$01, BIT $20
        let mut sim = setup(&[0xA9, 0x01, 0x24, 0x20]);
        sim.write_byte(0x20, 0xC0);
        sim.step().unwrap();
        sim.step().unwrap();
        assert!(sim.regs.get_flag(NEGATIVE_FLAG));
        assert!(sim.regs.get_flag(OVERFLOW_FLAG));
        assert!(sim.regs.get_flag(ZERO_FLAG));
        assert_eq!(sim.regs.a, 0x01);
    }

    #[test]
    fn test_unknown_flag_read_is_soft_error() {
        // BCC +0 with carry never set
        let mut sim = setup(&[0x90, 0x00]);
        sim.regs = Registers { pc: 0x0600, ..Registers::new() };
        sim.execute_one();
        assert_eq!(
            sim.pending_fault(),
            Some(Fault { error: SimError::ReadUninit, addr: 0x0600 })
        );
        sim.clear_fault();
        assert!(sim.regs.is_known(CARRY_FLAG));
    }

    #[test]
    fn test_invalid_instruction() {
        let mut sim = setup(&[0x02]);
        let fault = sim.step().unwrap_err();
        assert_eq!(fault, Fault { error: SimError::InvalidInsn, addr: 0x0600 });
        assert_eq!(sim.regs.pc, 0x0600);
    }

    #[test]
    fn test_brk_is_fatal() {
        let mut sim = setup(&[0xEA, 0x00]);
        let fault = sim.run(0x0600).unwrap_err();
        assert_eq!(fault, Fault { error: SimError::Break, addr: 0x0601 });
        assert_eq!(sim.cycles(), 2 + 7);
    }

    #[test]
    fn test_cycle_limit() {
        // loop: JMP loop
        let mut sim = setup(&[0x4C, 0x00, 0x06]);
        sim.set_cycle_limit(30);
        let fault = sim.run(0x0600).unwrap_err();
        assert_eq!(fault.error, SimError::CycleLimit);
        assert_eq!(sim.cycles(), 30);
    }

    #[test]
    fn test_call_returns_and_restores_pc() {
        // $0600: LDY #$09, RTS
        let mut sim = setup(&[0xA0, 0x09, 0x60]);
        sim.regs.pc = 0x1234;
        sim.call(0x0600).unwrap();
        assert_eq!(sim.regs.y, 0x09);
        assert_eq!(sim.regs.pc, 0x1234);
        assert_eq!(sim.regs.sp, 0xFF);
    }

    #[test]
    fn test_exec_callback_implicit_return() {
        // JSR $E000 ; LDA #$01 ; $E000 is a trap that sets X
        let mut sim = setup(&[0x20, 0x00, 0xE0, 0xA9, 0x01]);
        sim.add_callback(0xE000, 1, CallbackKind::Exec, |sim, _, _| {
            sim.regs.x = 0x55;
            Ok(0)
        });
        sim.step().unwrap();
        sim.step().unwrap();
        assert_eq!(sim.regs.pc, 0x0603);
        assert_eq!(sim.regs.x, 0x55);
        sim.step().unwrap();
        assert_eq!(sim.regs.a, 0x01);
    }

    #[test]
    fn test_exec_callback_error_stops_run() {
        let mut sim = setup(&[0xEA]);
        sim.add_callback(0x0601, 1, CallbackKind::Exec, |_, _, _| Err(SimError::User));
        let fault = sim.run(0x0600).unwrap_err();
        assert_eq!(fault, Fault { error: SimError::User, addr: 0x0601 });
    }

    #[test]
    fn test_profile_records_no_effect() {
        // NOP, LDA #$00 (A already 0, Z already set)
        let mut sim = setup(&[0xEA, 0xA9, 0x00, 0xE8]);
        sim.regs.set_flag(ZERO_FLAG, true);
        sim.enable_profile();
        for _ in 0..3 {
            sim.step().unwrap();
        }
        let profile = sim.profile().unwrap();
        assert_eq!(profile.no_effect_at(0x0600), 1);
        assert_eq!(profile.no_effect_at(0x0601), 1);
        assert_eq!(profile.no_effect_at(0x0603), 0);
        assert_eq!(profile.cycles_at(0x0603), 2);
        assert_eq!(profile.totals.instructions, 3);
    }

    #[test]
    fn test_profile_ignores_flag_validity_changes() {
        // BCS +$10 with carry never set: not taken, only learns the flag
        let mut sim = setup(&[0xB0, 0x10]);
        sim.regs = Registers { pc: 0x0600, ..Registers::new() };
        sim.enable_profile();
        sim.step().unwrap();
        assert!(sim.regs.is_known(CARRY_FLAG));
        assert_eq!(sim.regs.pc, 0x0602);
        let profile = sim.profile().unwrap();
        assert_eq!(profile.no_effect_at(0x0600), 1);
        assert_eq!(profile.totals.branches_not_taken, 1);
    }

    #[test]
    fn test_set_profile_requires_matching_size() {
        let mut sim = setup(&[0xEA]);
        let err = sim.set_profile(Profile::new(0x100)).unwrap_err();
        assert!(matches!(
            err,
            ProfileError::SizeMismatch { expected: 0x10000, actual: 0x100 }
        ));
        assert!(sim.profile().is_none());
        sim.set_profile(Profile::new(0x10000)).unwrap();
        assert!(sim.profile().is_some());
    }
}
