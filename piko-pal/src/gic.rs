//! GIC-400 interrupt controller.
//!
//! Distributor at `GIC_BASE + 0x1000`, CPU interface at `GIC_BASE +
//! 0x2000`. The architected timer is a PPI (id 30) that additionally needs
//! per-core routing through the ARM local peripheral block at
//! `0xFF80_0000`.
//!
//! A small registered-handler table lets drivers hook shared interrupts;
//! the kernel's IRQ dispatcher consults it for everything that is not the
//! timer.

use core::ptr::{read_volatile, write_volatile};

use piko_arch::IrqSpinLock;
use piko_common::layout;

// Distributor register offsets (from GICD base).
const GICD_CTLR: usize = 0x000;
const GICD_ISENABLER: usize = 0x100;
const GICD_IPRIORITYR: usize = 0x400;
const GICD_ITARGETSR: usize = 0x800;

// CPU interface register offsets (from GICC base).
const GICC_CTLR: usize = 0x000;
const GICC_PMR: usize = 0x004;
const GICC_IAR: usize = 0x00C;
const GICC_EOIR: usize = 0x010;

const GICD_BASE: usize = layout::GIC_BASE + 0x1000;
const GICC_BASE: usize = layout::GIC_BASE + 0x2000;

/// Priority given to interrupts enabled through [`enable_interrupt`]
/// (mid-range; lower value = higher priority).
const DEFAULT_PRIORITY: u32 = 0xA0;

/// Interrupt IDs at or above this are spurious indications.
pub const SPURIOUS_ID: u32 = 1020;

/// Interrupt handler signature: receives the interrupt id.
pub type IrqHandler = fn(u32);

/// Highest interrupt id the handler table covers.
const MAX_HANDLERS: usize = 64;

/// Registered interrupt handlers, indexed by interrupt id. IRQ-masking
/// lock: the dispatch path reads this from interrupt context.
static HANDLERS: IrqSpinLock<[Option<IrqHandler>; MAX_HANDLERS]> =
    IrqSpinLock::new([None; MAX_HANDLERS]);

#[inline]
fn gicd(offset: usize) -> *mut u32 {
    (GICD_BASE + offset) as *mut u32
}

#[inline]
fn gicc(offset: usize) -> *mut u32 {
    (GICC_BASE + offset) as *mut u32
}

/// Initialise the distributor and this core's CPU interface.
///
/// Disable both, open the priority mask, then enable: configuration writes
/// to an enabled distributor are unpredictable on the GIC-400.
pub fn init() {
    // SAFETY: fixed GIC-400 registers inside the device window.
    unsafe {
        write_volatile(gicd(GICD_CTLR), 0);
        write_volatile(gicc(GICC_CTLR), 0);
        write_volatile(gicc(GICC_PMR), 0xFF);
        write_volatile(gicd(GICD_CTLR), 1);
        write_volatile(gicc(GICC_CTLR), 1);
    }
}

/// Initialise the (banked) CPU interface of the calling secondary core.
pub fn init_core() {
    // SAFETY: GICC registers are banked per core.
    unsafe {
        write_volatile(gicc(GICC_PMR), 0xFF);
        write_volatile(gicc(GICC_CTLR), 1);
    }
}

/// Enable an interrupt: mid priority, targeted at core 0.
pub fn enable_interrupt(id: u32) {
    let id = id as usize;
    let byte_shift = (id % 4) * 8;

    // SAFETY: the registers are byte-indexed arrays over all interrupt ids.
    unsafe {
        // Priority.
        let prio = gicd(GICD_IPRIORITYR + (id / 4) * 4);
        let mut val = read_volatile(prio);
        val &= !(0xFF << byte_shift);
        val |= DEFAULT_PRIORITY << byte_shift;
        write_volatile(prio, val);

        // Target core 0 (SPIs only; the field is read-only for PPIs).
        let target = gicd(GICD_ITARGETSR + (id / 4) * 4);
        let mut val = read_volatile(target);
        val &= !(0xFF << byte_shift);
        val |= 0x01 << byte_shift;
        write_volatile(target, val);

        // Set-enable bit.
        let enable = gicd(GICD_ISENABLER + (id / 32) * 4);
        write_volatile(enable, 1 << (id % 32));
    }
}

/// Acknowledge the highest-priority pending interrupt and return its id.
#[must_use]
pub fn acknowledge() -> u32 {
    // SAFETY: reading IAR acknowledges the interrupt; fixed GICC register.
    unsafe { read_volatile(gicc(GICC_IAR)) & 0x3FF }
}

/// Signal end-of-interrupt for a previously acknowledged id.
pub fn end_interrupt(id: u32) {
    // SAFETY: fixed GICC register; id came from [`acknowledge`].
    unsafe {
        write_volatile(gicc(GICC_EOIR), id);
    }
}

/// Route the non-secure physical timer interrupt to the given core via the
/// ARM local peripheral block (bit 1 = nCNTPNSIRQ).
pub fn route_timer_to_core(core: usize) {
    let reg = (layout::LOCAL_TIMER_ROUTE + 4 * core) as *mut u32;
    // SAFETY: fixed local-peripheral register inside the device window.
    unsafe {
        write_volatile(reg, 1 << 1);
    }
}

/// Read the interrupt source word of the given core.
#[must_use]
pub fn irq_source(core: usize) -> u32 {
    let reg = (layout::LOCAL_IRQ_SOURCE + 4 * core) as *const u32;
    // SAFETY: fixed local-peripheral register inside the device window.
    unsafe { read_volatile(reg) }
}

/// Register a handler for an interrupt id.
///
/// Ids outside the handler table are rejected by doing nothing; PIKO only
/// hooks low PPI/SPI ids.
pub fn register_handler(id: u32, handler: IrqHandler) {
    if (id as usize) < MAX_HANDLERS {
        HANDLERS.lock()[id as usize] = Some(handler);
    }
}

/// Look up the registered handler for an id.
#[must_use]
pub fn handler(id: u32) -> Option<IrqHandler> {
    if (id as usize) < MAX_HANDLERS {
        HANDLERS.lock()[id as usize]
    } else {
        None
    }
}
