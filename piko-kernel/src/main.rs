//! PIKO kernel binary: the boot stub and the panic handler.
//!
//! Reset enters `_start` on every core at EL2. Non-primary cores park in
//! WFE until the spin table releases them through `piko_kernel::smp`. The
//! primary core drops to EL1, zeroes bss, takes its boot stack and calls
//! `kernel_main`.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]
#![deny(unsafe_op_in_unsafe_fn)]

// Pull the kernel library (and its `kernel_main`) into the link.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
use piko_kernel as _;

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod boot {
    use core::panic::PanicInfo;

    /// Reset entry.
    ///
    /// The kernel assumes the platform firmware hands over at EL2; any
    /// other level is a configuration this image cannot run on, so the
    /// core halts in a low-power wait.
    #[unsafe(naked)]
    #[unsafe(no_mangle)]
    #[unsafe(link_section = ".text.boot")]
    unsafe extern "C" fn _start() -> ! {
        core::arch::naked_asm!(
            // Only the primary core proceeds; the rest wait for the spin
            // table (they re-enter the kernel via the secondary stub).
            "mrs x0, mpidr_el1",
            "and x0, x0, #3",
            "cbz x0, 2f",
            "1: wfe",
            "b 1b",
            "2:",
            // This image starts at EL2; anything else is a boot-halt.
            "mrs x0, CurrentEL",
            "lsr x0, x0, #2",
            "cmp x0, #2",
            "b.eq 3f",
            "4: wfi",
            "b 4b",
            "3:",
            // EL2: 64-bit EL1, set-way invalidation override.
            "mov x0, #(1 << 31)",
            "orr x0, x0, #(1 << 1)",
            "msr hcr_el2, x0",
            // Give EL1 the architected timer.
            "mov x0, #3",
            "msr cnthctl_el2, x0",
            "msr cntvoff_el2, xzr",
            // EL1 stack from the linker script.
            "adrp x0, __boot_stack_top",
            "add x0, x0, :lo12:__boot_stack_top",
            "msr sp_el1, x0",
            // Exception-return into EL1h with everything masked.
            "mov x0, #0x3c5",
            "msr spsr_el2, x0",
            "adr x0, 5f",
            "msr elr_el2, x0",
            "eret",
            "5:",
            // EL1: clear bss before any Rust runs.
            "adrp x0, __bss_start",
            "add x0, x0, :lo12:__bss_start",
            "adrp x1, __bss_end",
            "add x1, x1, :lo12:__bss_end",
            "6:",
            "cmp x0, x1",
            "b.hs 7f",
            "str xzr, [x0], #8",
            "b 6b",
            "7:",
            "bl kernel_main",
            // kernel_main never returns.
            "8: wfi",
            "b 8b",
        );
    }

    /// Fatal errors print once and halt in a low-power wait.
    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        use core::fmt::Write;

        let _ = piko_arch::cpu::local_irq_save();
        let _ = writeln!(
            piko_pal::console::ConsoleWriter,
            "\n*** KERNEL PANIC (core {}): {}",
            piko_arch::cpu::core_id(),
            info
        );
        piko_arch::cpu::halt();
    }
}

#[cfg(not(target_os = "none"))]
fn main() {}
