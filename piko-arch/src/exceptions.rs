//! Exception vector table and the trapframe contract.
//!
//! The IRQ-from-current-EL path is the kernel's only preemption point.
//! Its entry stub pushes a 34-word [`Trapframe`] onto the interrupted
//! task's own stack, hands the resulting stack pointer to the registered
//! dispatcher, then pops a trapframe from whatever stack pointer the
//! dispatcher returned and exception-returns. Returning a different task's
//! saved stack pointer therefore *is* the context switch, and a freshly
//! synthesised frame starts a brand new task through the very same path.
//!
//! Synchronous exceptions and SErrors save a frame and report through a
//! panicking handler; vectors PIKO can never legitimately reach hang in a
//! low-power wait.

use core::sync::atomic::{AtomicPtr, Ordering};

/// Saved program status for a new task: EL1h, all DAIF bits clear, so the
/// task starts with IRQs unmasked.
pub const SPSR_NEW_TASK: u64 = 0x5;

/// The register state pushed by the exception entry stubs.
///
/// Layout is fixed by the assembly in this module: x0..x30, then ELR_EL1,
/// SPSR_EL1 and one padding word keeping the frame a multiple of 16 bytes.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct Trapframe {
    /// General purpose registers x0..x30.
    pub gpr: [u64; 31],
    /// Exception return address.
    pub elr: u64,
    /// Saved program status.
    pub spsr: u64,
    _pad: u64,
}

impl Trapframe {
    /// Words in a frame.
    pub const WORDS: usize = 34;
    /// Bytes in a frame.
    pub const SIZE: usize = Self::WORDS * 8;

    /// Synthesise the frame a brand-new task starts from: zeroed registers,
    /// the link register pointing at an exit trampoline, `eret` landing on
    /// `entry` with IRQs unmasked at EL1h.
    #[must_use]
    pub fn new_task(entry: u64, exit_lr: u64) -> Self {
        let mut gpr = [0u64; 31];
        gpr[30] = exit_lr;
        Self {
            gpr,
            elr: entry,
            spsr: SPSR_NEW_TASK,
            _pad: 0,
        }
    }

    /// Write this frame at the top of a task stack and return the stack
    /// pointer value that resumes it.
    ///
    /// `stack_top` is aligned down to 16 bytes first, as the exception
    /// entry would leave it.
    ///
    /// # Safety
    ///
    /// `stack_top` must be the one-past-the-end address of a writable
    /// region at least [`Trapframe::SIZE`] bytes deep that no other task
    /// is using.
    pub unsafe fn install(self, stack_top: usize) -> u64 {
        let top = stack_top & !0xF;
        let sp = top - Self::SIZE;
        // SAFETY: caller guarantees the region; SIZE keeps sp 16-aligned.
        unsafe { (sp as *mut Trapframe).write(self) };
        sp as u64
    }
}

/// Dispatch routine invoked from the IRQ entry: takes the interrupted
/// stack pointer (which addresses the freshly pushed trapframe), returns
/// the stack pointer to resume.
pub type IrqDispatcher = fn(u64) -> u64;

fn passthrough(sp: u64) -> u64 {
    sp
}

/// Registered dispatcher, swapped atomically so it can be installed after
/// the scheduler comes up.
static IRQ_DISPATCHER: AtomicPtr<()> = AtomicPtr::new(passthrough as *mut ());

/// Install the kernel's IRQ dispatch routine.
///
/// Takes effect from the next IRQ.
pub fn set_irq_dispatcher(dispatcher: IrqDispatcher) {
    IRQ_DISPATCHER.store(dispatcher as *mut (), Ordering::Release);
}

/// The IRQ entry's continuation calls this with x0 = interrupted SP and
/// resumes from the returned value.
#[unsafe(no_mangle)]
extern "C" fn piko_handle_irq(sp: u64) -> u64 {
    let ptr = IRQ_DISPATCHER.load(Ordering::Acquire);
    // SAFETY: the pointer was stored from an `IrqDispatcher` fn item.
    let dispatcher: IrqDispatcher = unsafe { core::mem::transmute(ptr) };
    dispatcher(sp)
}

/// Synchronous exceptions at EL1 are kernel bugs; report and halt via the
/// panic machinery.
#[unsafe(no_mangle)]
extern "C" fn piko_handle_sync(_sp: u64) -> u64 {
    let esr = crate::registers::read_esr_el1();
    let ec = crate::registers::esr::exception_class(esr);
    panic!(
        "synchronous exception: {} (ESR={:#x} ELR={:#x} FAR={:#x})",
        crate::registers::esr::ec_name(ec),
        esr,
        crate::registers::read_elr_el1(),
        crate::registers::read_far_el1(),
    );
}

/// SErrors are fatal.
#[unsafe(no_mangle)]
extern "C" fn piko_handle_serror(_sp: u64) -> u64 {
    panic!(
        "SError: ESR={:#x} ELR={:#x}",
        crate::registers::read_esr_el1(),
        crate::registers::read_elr_el1(),
    );
}

/// Push a trapframe onto the current stack.
///
/// 20 instructions; together with the continuation branch each vector
/// entry stays inside its 128-byte slot.
#[cfg(target_arch = "aarch64")]
macro_rules! save_frame {
    () => {
        concat!(
            "sub sp, sp, #272\n",
            "stp x0, x1, [sp, #0]\n",
            "stp x2, x3, [sp, #16]\n",
            "stp x4, x5, [sp, #32]\n",
            "stp x6, x7, [sp, #48]\n",
            "stp x8, x9, [sp, #64]\n",
            "stp x10, x11, [sp, #80]\n",
            "stp x12, x13, [sp, #96]\n",
            "stp x14, x15, [sp, #112]\n",
            "stp x16, x17, [sp, #128]\n",
            "stp x18, x19, [sp, #144]\n",
            "stp x20, x21, [sp, #160]\n",
            "stp x22, x23, [sp, #176]\n",
            "stp x24, x25, [sp, #192]\n",
            "stp x26, x27, [sp, #208]\n",
            "stp x28, x29, [sp, #224]\n",
            "str x30, [sp, #240]\n",
            "mrs x0, elr_el1\n",
            "mrs x1, spsr_el1\n",
            "stp x0, x1, [sp, #248]\n",
        )
    };
}

/// Pop the trapframe addressed by SP and exception-return into it.
#[cfg(target_arch = "aarch64")]
macro_rules! restore_frame_eret {
    () => {
        concat!(
            "ldp x0, x1, [sp, #248]\n",
            "msr elr_el1, x0\n",
            "msr spsr_el1, x1\n",
            "ldp x0, x1, [sp, #0]\n",
            "ldp x2, x3, [sp, #16]\n",
            "ldp x4, x5, [sp, #32]\n",
            "ldp x6, x7, [sp, #48]\n",
            "ldp x8, x9, [sp, #64]\n",
            "ldp x10, x11, [sp, #80]\n",
            "ldp x12, x13, [sp, #96]\n",
            "ldp x14, x15, [sp, #112]\n",
            "ldp x16, x17, [sp, #128]\n",
            "ldp x18, x19, [sp, #144]\n",
            "ldp x20, x21, [sp, #160]\n",
            "ldp x22, x23, [sp, #176]\n",
            "ldp x24, x25, [sp, #192]\n",
            "ldp x26, x27, [sp, #208]\n",
            "ldp x28, x29, [sp, #224]\n",
            "ldr x30, [sp, #240]\n",
            "add sp, sp, #272\n",
            "eret\n",
        )
    };
}

/// Vector slot for origins PIKO never takes: low-power hang.
#[cfg(target_arch = "aarch64")]
macro_rules! vector_hang {
    () => {
        concat!("1: wfi\n", "b 1b\n")
    };
}

/// IRQ continuation: frame is saved, call the dispatcher, adopt whatever
/// stack pointer it returns, restore, eret.
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
#[unsafe(no_mangle)]
unsafe extern "C" fn __piko_irq_cont() {
    core::arch::naked_asm!(
        "mov x0, sp\n",
        "bl piko_handle_irq\n",
        "mov sp, x0\n",
        restore_frame_eret!(),
    );
}

/// Synchronous-exception continuation.
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
#[unsafe(no_mangle)]
unsafe extern "C" fn __piko_sync_cont() {
    core::arch::naked_asm!(
        "mov x0, sp\n",
        "bl piko_handle_sync\n",
        "mov sp, x0\n",
        restore_frame_eret!(),
    );
}

/// SError continuation.
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
#[unsafe(no_mangle)]
unsafe extern "C" fn __piko_serror_cont() {
    core::arch::naked_asm!(
        "mov x0, sp\n",
        "bl piko_handle_serror\n",
        "mov sp, x0\n",
        restore_frame_eret!(),
    );
}

/// The exception vector table: 16 slots of 128 bytes, 2 KB aligned.
///
/// Only the "current EL with SP_ELx" quadrant is live; PIKO has no EL0
/// and never runs on SP_EL0.
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
#[unsafe(no_mangle)]
#[unsafe(link_section = ".vectors")]
unsafe extern "C" fn piko_exception_vectors() {
    core::arch::naked_asm!(
        ".balign 2048",
        // Current EL with SP_EL0 — unused.
        ".balign 128",
        vector_hang!(),
        ".balign 128",
        vector_hang!(),
        ".balign 128",
        vector_hang!(),
        ".balign 128",
        vector_hang!(),
        // Current EL with SP_ELx — the kernel.
        ".balign 128",
        save_frame!(),
        "b __piko_sync_cont",
        ".balign 128",
        save_frame!(),
        "b __piko_irq_cont",
        ".balign 128",
        vector_hang!(),
        ".balign 128",
        save_frame!(),
        "b __piko_serror_cont",
        // Lower EL, AArch64 — no lower EL exists.
        ".balign 128",
        vector_hang!(),
        ".balign 128",
        vector_hang!(),
        ".balign 128",
        vector_hang!(),
        ".balign 128",
        vector_hang!(),
        // Lower EL, AArch32 — unsupported.
        ".balign 128",
        vector_hang!(),
        ".balign 128",
        vector_hang!(),
        ".balign 128",
        vector_hang!(),
        ".balign 128",
        vector_hang!(),
    );
}

/// Install the vector table on the calling core.
#[cfg(target_arch = "aarch64")]
pub fn init() {
    let vectors = piko_exception_vectors as *const () as u64;
    crate::registers::write_vbar_el1(vectors);
}

/// Current VBAR_EL1 value.
#[must_use]
pub fn vector_table_address() -> u64 {
    crate::registers::read_vbar_el1()
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{align_of, offset_of, size_of};

    #[test]
    fn trapframe_layout_matches_entry_stub() {
        assert_eq!(size_of::<Trapframe>(), 272);
        assert_eq!(size_of::<Trapframe>() % 16, 0);
        assert_eq!(align_of::<Trapframe>(), 8);
        assert_eq!(offset_of!(Trapframe, gpr), 0);
        assert_eq!(offset_of!(Trapframe, elr), 248);
        assert_eq!(offset_of!(Trapframe, spsr), 256);
    }

    #[test]
    fn new_task_frame_contents() {
        let tf = Trapframe::new_task(0x1234, 0xABCD);
        assert_eq!(tf.elr, 0x1234);
        assert_eq!(tf.spsr, SPSR_NEW_TASK);
        assert_eq!(tf.gpr[30], 0xABCD);
        assert!(tf.gpr[..30].iter().all(|&r| r == 0));
    }

    #[test]
    fn install_places_frame_below_aligned_top() {
        let mut stack = vec![0u8; 4096];
        let base = stack.as_mut_ptr() as usize;
        // Deliberately misaligned top.
        let top = base + 4096 - 3;
        let sp = unsafe { Trapframe::new_task(0x40, 0x80).install(top) };
        assert_eq!(sp % 16, 0);
        assert_eq!((top & !0xF) - sp as usize, Trapframe::SIZE);
        let frame = unsafe { &*(sp as *const Trapframe) };
        assert_eq!(frame.elr, 0x40);
        assert_eq!(frame.gpr[30], 0x80);
    }
}
