//! Kernel initialisation, in the fixed order the subsystems depend on:
//! vectors → console → logging → MMU → page allocator → heap →
//! filesystem → GIC → timer → scheduler → secondary cores → IRQs on →
//! shell. IRQs stay masked until the scheduler has adopted task 0.

use piko_arch::{cpu, exceptions, mmu};
use piko_common::layout;
use piko_pal::{console, gic, println, timer, uart};

use crate::{fs, irq, logging, memory, sched, shell, smp};

/// EL1 entry from the boot stub: bss is clear, the boot stack is live,
/// IRQs are masked.
#[unsafe(no_mangle)]
pub extern "C" fn kernel_main() -> ! {
    exceptions::init();
    uart::UART0.init();

    console::puts("\n=====================================\n");
    console::puts("  PIKO — Raspberry Pi 4 bare metal\n");
    console::puts("=====================================\n\n");

    logging::init();
    log::info!(
        "boot: core {} at EL{}, vectors at {:#x}",
        cpu::core_id(),
        cpu::current_el(),
        exceptions::vector_table_address()
    );

    // SAFETY: primary core, EL1, exactly once, before the secondaries.
    unsafe { mmu::init() };
    log::info!("mmu: identity map on, caches enabled");

    // SAFETY: MMU is on; the managed region is mapped and unused.
    unsafe { memory::init() };
    fs::init();

    gic::init();
    gic::route_timer_to_core(0);
    timer::init(layout::TICK_MS);
    gic::enable_interrupt(layout::TIMER_IRQ);
    log::info!(
        "timer: {} Hz counter, {} ms quantum, IRQ {}",
        timer::frequency(),
        layout::TICK_MS,
        layout::TIMER_IRQ
    );

    sched::init();
    exceptions::set_irq_dispatcher(irq::dispatch);

    smp::init();

    cpu::local_irq_enable();
    log::info!("boot complete, preemption live");

    println!("\nType 'help' for available commands.\n");
    shell::run()
}
