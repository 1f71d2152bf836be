//! Console on top of the UART.
//!
//! Output is serialised with an IRQ-masking spinlock: the IRQ path logs
//! (unhandled sources), so an interrupted writer holding a plain lock
//! would deadlock against its own handler. Input is left unlocked: the
//! shell is the only reader.

use core::fmt::{self, Write};

use piko_arch::IrqSpinLock;

use crate::uart::UART0;

static WRITE_LOCK: IrqSpinLock<()> = IrqSpinLock::new(());

/// Write a string to the console.
pub fn puts(s: &str) {
    let _guard = WRITE_LOCK.lock();
    UART0.puts(s);
}

/// Write a single byte to the console.
pub fn putc(c: u8) {
    let _guard = WRITE_LOCK.lock();
    UART0.putc(c);
}

/// Blocking byte read.
#[must_use]
pub fn getc() -> u8 {
    UART0.getc()
}

/// Non-blocking byte read.
#[must_use]
pub fn getc_nonblock() -> Option<u8> {
    UART0.getc_nonblock()
}

/// `fmt::Write` adaptor for the console.
pub struct ConsoleWriter;

impl Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        puts(s);
        Ok(())
    }
}

/// Print formatted output to the console.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let _ = write!($crate::console::ConsoleWriter, $($arg)*);
    }};
}

/// Print formatted output with a trailing newline.
#[macro_export]
macro_rules! println {
    () => {
        $crate::console::puts("\n")
    };
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let _ = write!($crate::console::ConsoleWriter, $($arg)*);
        $crate::console::puts("\n");
    }};
}
