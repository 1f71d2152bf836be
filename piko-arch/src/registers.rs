//! System register access beyond what the scheduler and MMU paths need
//! inline: vector base install plus the readbacks backing the `mmu` shell
//! report and the fault messages of the default exception handlers.

use aarch64_cpu::registers::*;

/// Write VBAR_EL1 (vector base address).
///
/// The address must point at a 2 KB-aligned exception vector table.
#[inline]
pub fn write_vbar_el1(value: u64) {
    VBAR_EL1.set(value);
}

/// Read VBAR_EL1.
#[must_use]
#[inline]
pub fn read_vbar_el1() -> u64 {
    VBAR_EL1.get()
}

/// Read SCTLR_EL1 (system control).
#[must_use]
#[inline]
pub fn read_sctlr_el1() -> u64 {
    SCTLR_EL1.get()
}

/// Read TCR_EL1 (translation control).
#[must_use]
#[inline]
pub fn read_tcr_el1() -> u64 {
    TCR_EL1.get()
}

/// Read MAIR_EL1 (memory attribute indirection).
#[must_use]
#[inline]
pub fn read_mair_el1() -> u64 {
    MAIR_EL1.get()
}

/// Read TTBR0_EL1 (translation table base 0).
#[must_use]
#[inline]
pub fn read_ttbr0_el1() -> u64 {
    TTBR0_EL1.get()
}

/// Read ESR_EL1 (exception syndrome).
#[must_use]
#[inline]
pub fn read_esr_el1() -> u64 {
    ESR_EL1.get()
}

/// Read ELR_EL1 (exception link register).
#[must_use]
#[inline]
pub fn read_elr_el1() -> u64 {
    ELR_EL1.get()
}

/// Read FAR_EL1 (fault address).
#[must_use]
#[inline]
pub fn read_far_el1() -> u64 {
    FAR_EL1.get()
}

/// Exception Syndrome Register parsing.
pub mod esr {
    /// Exception class field.
    #[inline]
    #[must_use]
    pub const fn exception_class(esr: u64) -> u8 {
        ((esr >> 26) & 0x3F) as u8
    }

    /// Short name for the exception classes PIKO can actually hit.
    #[must_use]
    pub fn ec_name(ec: u8) -> &'static str {
        match ec {
            0b000000 => "unknown",
            0b000001 => "trapped WFI/WFE",
            0b010101 => "SVC (AArch64)",
            0b100001 => "instruction abort (same EL)",
            0b100010 => "PC alignment fault",
            0b100101 => "data abort (same EL)",
            0b100110 => "SP alignment fault",
            0b101111 => "SError",
            0b111100 => "BRK (AArch64)",
            _ => "reserved",
        }
    }
}
