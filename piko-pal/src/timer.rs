//! ARM generic timer (non-secure physical, `CNTP_*`).
//!
//! Each core arms its own countdown; core 0's expiry drives the global
//! tick counter (and with it sleeping tasks and preemption), secondary
//! cores poll their ISTATUS bit and re-arm locally.

use core::sync::atomic::{AtomicU64, Ordering};

use aarch64_cpu::registers::{CNTFRQ_EL0, CNTP_CTL_EL0, CNTP_TVAL_EL0, CNTPCT_EL0};
use tock_registers::interfaces::{Readable, Writeable};

use piko_common::layout;

/// Control register bits.
mod ctl {
    /// Timer enabled.
    pub const ENABLE: u64 = 1 << 0;
    /// Interrupt condition met.
    pub const ISTATUS: u64 = 1 << 2;
}

/// Counter frequency, read once per boot from CNTFRQ_EL0.
static TIMER_FREQ: AtomicU64 = AtomicU64::new(0);

/// Countdown interval in counter ticks, shared by every re-arm.
static INTERVAL: AtomicU64 = AtomicU64::new(0);

/// Global quantum counter, bumped by core 0's IRQ path.
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Arm the calling core's timer to fire every `interval_ms` milliseconds
/// with its interrupt unmasked.
pub fn init(interval_ms: u32) {
    let freq = CNTFRQ_EL0.get();
    TIMER_FREQ.store(freq, Ordering::Relaxed);

    let interval = (freq / 1000) * interval_ms as u64;
    INTERVAL.store(interval, Ordering::Relaxed);

    CNTP_TVAL_EL0.set(interval);
    CNTP_CTL_EL0.set(ctl::ENABLE);
}

/// Timer expiry on the scheduling core: count the quantum and re-arm.
///
/// Re-arming happens on every expiry whether or not the scheduler decides
/// to switch.
pub fn handle_irq() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    rearm();
}

/// Rewrite the countdown with the configured interval.
pub fn rearm() {
    CNTP_TVAL_EL0.set(INTERVAL.load(Ordering::Relaxed));
}

/// Has the calling core's timer expired? (ISTATUS poll, used by the
/// secondary cores which QEMU does not interrupt.)
#[must_use]
pub fn is_pending() -> bool {
    CNTP_CTL_EL0.get() & ctl::ISTATUS != 0
}

/// Counter frequency in Hz.
#[must_use]
pub fn frequency() -> u64 {
    TIMER_FREQ.load(Ordering::Relaxed)
}

/// Quanta elapsed since the scheduler came up.
#[must_use]
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Uptime in whole seconds, derived from the tick counter.
#[must_use]
pub fn uptime_secs() -> u64 {
    ticks() * layout::TICK_MS as u64 / 1000
}

/// Raw counter value.
#[must_use]
pub fn counter() -> u64 {
    CNTPCT_EL0.get()
}

/// Milliseconds since the counter started, straight from the hardware so
/// it works before [`init`] runs (log timestamps during early boot).
///
/// Split into whole and fractional seconds to avoid overflowing the
/// multiply at high counter values.
#[must_use]
pub fn now_ms() -> u64 {
    let freq = CNTFRQ_EL0.get();
    if freq == 0 {
        return 0;
    }
    let count = counter();
    let secs = count / freq;
    let frac = count % freq;
    secs * 1000 + (frac * 1000) / freq
}

/// Polling delay; independent of the tick counter so it also works with
/// IRQs masked.
pub fn delay_ms(ms: u64) {
    let freq = TIMER_FREQ.load(Ordering::Relaxed);
    if freq == 0 {
        return;
    }
    let ticks_to_wait = (freq / 1000) * ms;
    let start = counter();
    while counter().wrapping_sub(start) < ticks_to_wait {
        core::hint::spin_loop();
    }
}
