//! Kernel IRQ dispatch.
//!
//! Registered with `piko_arch::exceptions` once the scheduler is up. The
//! timer interrupt is the scheduler's only preemption point: its path
//! counts the tick, re-arms the countdown and rotates the ready queue,
//! returning the stack pointer of the task to resume. Everything else
//! goes through the GIC handler table; sources nobody registered get an
//! end-of-interrupt and one warning.

use core::sync::atomic::{AtomicU64, Ordering};

use piko_common::layout;
use piko_pal::{gic, timer};

use crate::sched;

/// One warning per unknown source; ids beyond the bitmap share one bit.
static WARNED: AtomicU64 = AtomicU64::new(0);

fn warn_once(id: u32) {
    let bit = 1u64 << (id as u64).min(63);
    if WARNED.fetch_or(bit, Ordering::Relaxed) & bit == 0 {
        log::warn!("IRQ {} has no handler, ignoring", id);
    }
}

/// The dispatch routine invoked from the exception vector with the
/// interrupted stack pointer; returns the stack pointer to resume.
pub fn dispatch(old_sp: u64) -> u64 {
    let id = gic::acknowledge();
    if id >= gic::SPURIOUS_ID {
        // Spurious indication: nothing to acknowledge back.
        return old_sp;
    }

    let mut new_sp = old_sp;
    if id == layout::TIMER_IRQ {
        timer::handle_irq();
        new_sp = sched::schedule_irq(old_sp);
    } else if let Some(handler) = gic::handler(id) {
        handler(id);
    } else {
        warn_once(id);
    }

    gic::end_interrupt(id);
    new_sp
}
