//! Secondary-core bring-up over the Raspberry Pi spin table.
//!
//! The primary core publishes its MMU configuration and a stack top per
//! secondary core, writes the entry stub's address into the spin-table
//! mailboxes at `0xE0/0xE8/0xF0` and issues SEV. Each secondary drops
//! from EL2 to EL1, adopts the shared translation setup, enables the MMU
//! and caches, takes its stack and parks in a timer-polling loop: under
//! emulation the architected timer only interrupts core 0, so the others
//! watch their ISTATUS bit and re-arm locally.
//!
//! Multicore task dispatch is deliberately not wired up; the cores reach
//! a quiescent state with caches on and timers armed.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use piko_common::NUM_CORES;

/// Per-core liveness and tick accounting.
pub struct CoreInfo {
    online: AtomicBool,
    ticks: AtomicU64,
}

impl CoreInfo {
    const fn new() -> Self {
        Self {
            online: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
        }
    }
}

static CORES: [CoreInfo; NUM_CORES] = [
    CoreInfo::new(),
    CoreInfo::new(),
    CoreInfo::new(),
    CoreInfo::new(),
];

/// Mark a core online.
pub fn mark_online(core: usize) {
    if core < NUM_CORES {
        CORES[core].online.store(true, Ordering::Release);
    }
}

/// Is a core online?
#[must_use]
pub fn is_online(core: usize) -> bool {
    core < NUM_CORES && CORES[core].online.load(Ordering::Acquire)
}

/// Number of online cores.
#[must_use]
pub fn online_count() -> usize {
    (0..NUM_CORES).filter(|&c| is_online(c)).count()
}

/// Count a timer expiry on a core.
pub fn bump_ticks(core: usize) {
    if core < NUM_CORES {
        CORES[core].ticks.fetch_add(1, Ordering::Relaxed);
    }
}

/// Timer expiries seen by a core.
#[must_use]
pub fn core_ticks(core: usize) -> u64 {
    if core < NUM_CORES {
        CORES[core].ticks.load(Ordering::Relaxed)
    } else {
        0
    }
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub use boot::init;

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod boot {
    use core::sync::atomic::{AtomicU64, Ordering};

    use piko_arch::{cpu, exceptions, mmu};
    use piko_common::{NUM_CORES, layout};
    use piko_pal::{gic, timer};

    use super::{bump_ticks, mark_online, online_count};

    /// MMU configuration and stack tops published to the secondary stub.
    ///
    /// Field order is load-bearing: the stub reads it with fixed offsets
    /// (ttbr0 +0, tcr +8, mair +16, stack tops from +24).
    #[repr(C)]
    struct SecondaryBoot {
        ttbr0: AtomicU64,
        tcr: AtomicU64,
        mair: AtomicU64,
        stacks: [AtomicU64; NUM_CORES],
    }

    static SECONDARY_BOOT: SecondaryBoot = SecondaryBoot {
        ttbr0: AtomicU64::new(0),
        tcr: AtomicU64::new(0),
        mair: AtomicU64::new(0),
        stacks: [
            AtomicU64::new(0),
            AtomicU64::new(0),
            AtomicU64::new(0),
            AtomicU64::new(0),
        ],
    };

    /// Statically reserved 16 KB stacks for cores 1..=3.
    #[repr(C, align(16))]
    struct CoreStack([u8; layout::CORE_STACK_SIZE]);

    static mut CORE_STACKS: [CoreStack; NUM_CORES - 1] = [
        CoreStack([0; layout::CORE_STACK_SIZE]),
        CoreStack([0; layout::CORE_STACK_SIZE]),
        CoreStack([0; layout::CORE_STACK_SIZE]),
    ];

    /// Wake the secondary cores and wait up to ~200 ms for them.
    pub fn init() {
        mark_online(0);

        let cfg = mmu::shared_config();
        SECONDARY_BOOT.ttbr0.store(cfg.ttbr0, Ordering::Relaxed);
        SECONDARY_BOOT.tcr.store(cfg.tcr, Ordering::Relaxed);
        SECONDARY_BOOT.mair.store(cfg.mair, Ordering::Relaxed);
        for core in 1..NUM_CORES {
            // SAFETY: address-of only; each secondary core is the sole
            // user of its reserved stack.
            let stack = unsafe { (&raw mut CORE_STACKS[core - 1]) as u64 };
            // Stacks grow down from the top of the reserved block.
            SECONDARY_BOOT.stacks[core].store(stack + layout::CORE_STACK_SIZE as u64, Ordering::Relaxed);
        }

        // Publication must be visible before any core leaves the mailbox.
        cpu::dsb_sy();

        let entry = secondary_entry as *const () as u64;
        for slot in layout::SPIN_TABLE {
            // SAFETY: the spin-table mailboxes are firmware-reserved words
            // in the identity-mapped low memory.
            unsafe {
                core::ptr::write_volatile(slot as *mut u64, entry);
            }
        }
        cpu::dsb_sy();
        cpu::send_event();

        // Give the cores ~200 ms to report in.
        let freq = timer::frequency().max(1);
        let deadline = timer::counter() + freq / 5;
        while online_count() < NUM_CORES && timer::counter() < deadline {
            cpu::yield_hint();
        }

        log::info!("smp: {}/{} cores online", online_count(), NUM_CORES);
    }

    /// Spin-table entry for secondary cores.
    ///
    /// Runs with the MMU off at EL2: drop to EL1, adopt the published
    /// translation setup, enable MMU and caches, take the per-core stack
    /// and continue in Rust. Mirrors the primary boot stub except that
    /// the MMU comes on before the first Rust instruction.
    #[unsafe(naked)]
    #[unsafe(no_mangle)]
    unsafe extern "C" fn secondary_entry() -> ! {
        core::arch::naked_asm!(
            // x19 = core id, x20 = boot block.
            "mrs x19, mpidr_el1",
            "and x19, x19, #3",
            "adrp x20, {boot}",
            "add x20, x20, :lo12:{boot}",
            // Shared MMU configuration.
            "ldr x21, [x20, #0]",          // ttbr0
            "ldr x22, [x20, #8]",          // tcr
            "ldr x23, [x20, #16]",         // mair
            // Per-core stack top.
            "add x24, x20, x19, lsl #3",
            "ldr x24, [x24, #24]",
            // EL check: EL2 drops, EL1 proceeds directly.
            "mrs x25, CurrentEL",
            "lsr x25, x25, #2",
            "cmp x25, #2",
            "b.ne 2f",
            // EL2: 64-bit EL1 with timer access, then eret into 2f.
            "mov x0, #(1 << 31)",
            "orr x0, x0, #(1 << 1)",
            "msr hcr_el2, x0",
            "mov x0, #3",
            "msr cnthctl_el2, x0",
            "msr cntvoff_el2, xzr",
            "mov x0, #0x3c5",
            "msr spsr_el2, x0",
            "adr x0, 2f",
            "msr elr_el2, x0",
            "eret",
            "2:",
            // Adopt the primary core's translation setup.
            "msr mair_el1, x23",
            "msr tcr_el1, x22",
            "msr ttbr0_el1, x21",
            "msr ttbr1_el1, xzr",
            "dsb sy",
            "isb",
            "tlbi vmalle1",
            "dsb sy",
            "isb",
            // MMU, data and instruction caches on.
            "mrs x0, sctlr_el1",
            "orr x0, x0, #(1 << 0)",
            "orr x0, x0, #(1 << 2)",
            "orr x0, x0, #(1 << 12)",
            "msr sctlr_el1, x0",
            "isb",
            // Stack, then Rust.
            "mov sp, x24",
            "mov x0, x19",
            "bl {main}",
            "3: wfi",
            "b 3b",
            boot = sym SECONDARY_BOOT,
            main = sym secondary_main,
        );
    }

    /// Secondary-core idle loop.
    ///
    /// QEMU's raspi4b machine delivers the architected timer interrupt
    /// only to core 0, so these cores poll their ISTATUS bit each
    /// iteration and re-arm locally; the effect (tick accounting, armed
    /// timer) matches the interrupt path.
    extern "C" fn secondary_main(core: u64) -> ! {
        let core = core as usize;

        exceptions::init();
        timer::init(layout::TICK_MS);
        gic::route_timer_to_core(core);
        gic::init_core();
        mark_online(core);

        loop {
            cpu::yield_hint();
            if timer::is_pending() {
                timer::rearm();
                bump_ticks(core);
            }
        }
    }
}
