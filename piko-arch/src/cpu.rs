//! CPU control and information.
//!
//! Thin wrappers over the hint and barrier instructions plus DAIF-based
//! interrupt masking. On non-AArch64 hosts (unit tests) the hints become
//! no-ops and masking is a dummy, so code built on these primitives still
//! runs.

#[cfg(target_arch = "aarch64")]
use aarch64_cpu::registers::*;
#[cfg(target_arch = "aarch64")]
use core::arch::asm;

/// Get the current core ID (MPIDR_EL1 Aff0, low two bits on the Pi 4).
#[must_use]
#[inline]
pub fn core_id() -> usize {
    #[cfg(target_arch = "aarch64")]
    {
        (MPIDR_EL1.get() & 0x3) as usize
    }
    #[cfg(not(target_arch = "aarch64"))]
    0
}

/// Get the current exception level (0..=3).
#[must_use]
pub fn current_el() -> u8 {
    #[cfg(target_arch = "aarch64")]
    {
        ((CurrentEL.get() >> 2) & 0x3) as u8
    }
    #[cfg(not(target_arch = "aarch64"))]
    1
}

/// Halt this core forever in a low-power wait.
#[inline]
pub fn halt() -> ! {
    loop {
        wait_for_interrupt();
    }
}

/// Wait for interrupt (WFI).
#[inline]
pub fn wait_for_interrupt() {
    // SAFETY: WFI is always safe to execute.
    #[cfg(target_arch = "aarch64")]
    unsafe {
        asm!("wfi", options(nomem, nostack));
    }
    #[cfg(not(target_arch = "aarch64"))]
    core::hint::spin_loop();
}

/// Wait for event (WFE).
#[inline]
pub fn wait_for_event() {
    // SAFETY: WFE is always safe to execute.
    #[cfg(target_arch = "aarch64")]
    unsafe {
        asm!("wfe", options(nomem, nostack));
    }
    #[cfg(not(target_arch = "aarch64"))]
    core::hint::spin_loop();
}

/// Send event (SEV) to wake cores waiting in WFE.
#[inline]
pub fn send_event() {
    // SAFETY: SEV is always safe to execute.
    #[cfg(target_arch = "aarch64")]
    unsafe {
        asm!("sev", options(nomem, nostack));
    }
}

/// Yield hint for busy loops.
#[inline]
pub fn yield_hint() {
    // SAFETY: YIELD is always safe to execute.
    #[cfg(target_arch = "aarch64")]
    unsafe {
        asm!("yield", options(nomem, nostack));
    }
    #[cfg(not(target_arch = "aarch64"))]
    core::hint::spin_loop();
}

/// Full-system data synchronisation barrier.
#[inline]
pub fn dsb_sy() {
    // SAFETY: barriers are always safe to execute.
    #[cfg(target_arch = "aarch64")]
    unsafe {
        asm!("dsb sy", options(nostack));
    }
}

/// Instruction synchronisation barrier.
#[inline]
pub fn isb() {
    // SAFETY: ISB is always safe to execute.
    #[cfg(target_arch = "aarch64")]
    unsafe {
        asm!("isb", options(nostack));
    }
}

/// Mask IRQs on this core and return the previous DAIF state.
///
/// Only the I bit is set; FIQ/SError masking is left alone, matching the
/// scheduler's critical sections which only need to keep the timer out.
#[must_use]
#[inline]
pub fn local_irq_save() -> u64 {
    #[cfg(target_arch = "aarch64")]
    {
        let daif: u64;
        // SAFETY: reading DAIF and masking IRQs is safe at EL1.
        unsafe {
            asm!(
                "mrs {0}, daif",
                "msr daifset, #2",
                out(reg) daif,
                options(nomem, nostack)
            );
        }
        daif
    }
    #[cfg(not(target_arch = "aarch64"))]
    0
}

/// Restore a DAIF state previously returned by [`local_irq_save`].
#[inline]
pub fn local_irq_restore(daif: u64) {
    // SAFETY: restoring a previously read DAIF value is safe at EL1.
    #[cfg(target_arch = "aarch64")]
    unsafe {
        asm!("msr daif, {0}", in(reg) daif, options(nomem, nostack));
    }
    #[cfg(not(target_arch = "aarch64"))]
    let _ = daif;
}

/// Unmask IRQs on this core.
#[inline]
pub fn local_irq_enable() {
    // SAFETY: clearing the I bit is safe at EL1.
    #[cfg(target_arch = "aarch64")]
    unsafe {
        asm!("msr daifclr, #2", options(nomem, nostack));
    }
}

/// Check whether IRQs are currently unmasked on this core.
#[must_use]
pub fn irqs_enabled() -> bool {
    #[cfg(target_arch = "aarch64")]
    {
        let daif: u64;
        // SAFETY: reading DAIF is safe at EL1.
        unsafe {
            asm!("mrs {0}, daif", out(reg) daif, options(nomem, nostack));
        }
        daif & (1 << 7) == 0
    }
    #[cfg(not(target_arch = "aarch64"))]
    true
}
