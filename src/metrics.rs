use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Once;

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Counter for instructions executed by mnemonic
    pub static ref SIM_INSTRUCTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("sim_instructions_total", "Total number of instructions executed by mnemonic"),
        &["mnemonic"]
    ).expect("Failed to create instructions counter");

    /// Counter for simulated CPU cycles
    pub static ref SIM_CYCLES_TOTAL: IntCounter = IntCounter::new(
        "sim_cycles_total", "Total number of simulated CPU cycles"
    ).expect("Failed to create cycles counter");

    /// Counter for errors raised by the engine
    pub static ref SIM_FAULTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("sim_faults_total", "Errors raised during execution by kind"),
        &["kind", "fatal"]
    ).expect("Failed to create faults counter");

    /// Counter for memory-mapped callback invocations
    pub static ref SIM_CALLBACKS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("sim_callbacks_total", "Memory-mapped callback invocations by kind"),
        &["kind"]
    ).expect("Failed to create callbacks counter");
}

static INIT: Once = Once::new();

/// Registers the simulator metrics with the global registry. Safe to call repeatedly.
pub fn init_metrics() {
    INIT.call_once(|| {
        let collectors: [Box<dyn prometheus::core::Collector>; 4] = [
            Box::new(SIM_INSTRUCTIONS_TOTAL.clone()),
            Box::new(SIM_CYCLES_TOTAL.clone()),
            Box::new(SIM_FAULTS_TOTAL.clone()),
            Box::new(SIM_CALLBACKS_TOTAL.clone()),
        ];
        for c in collectors {
            if let Err(e) = REGISTRY.register(c) {
                log::warn!("failed to register metric: {}", e);
            }
        }
    });
}

pub fn record_instruction(mnemonic: &str) {
    SIM_INSTRUCTIONS_TOTAL.with_label_values(&[mnemonic]).inc();
}

pub fn record_cycles(cycles: u64) {
    SIM_CYCLES_TOTAL.inc_by(cycles);
}

pub fn record_fault(kind: &str, fatal: bool) {
    let fatal = if fatal { "true" } else { "false" };
    SIM_FAULTS_TOTAL.with_label_values(&[kind, fatal]).inc();
}

pub fn record_callback(kind: &str) {
    SIM_CALLBACKS_TOTAL.with_label_values(&[kind]).inc();
}

/// Text exposition of everything in [`REGISTRY`].
pub fn render() -> String {
    let mut buf = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buf) {
        log::warn!("failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buf).into_owned()
}
