//! PL011 UART0 driver.
//!
//! Blocking byte output and blocking/non-blocking byte input on the mini
//! header pins (GPIO 14/15, alt 0), 115200 baud against the 48 MHz UART
//! clock. Newlines are expanded to CRLF on output.

use core::ptr::{read_volatile, write_volatile};

use piko_common::layout;

// PL011 register offsets.
const DR: usize = 0x00;
const FR: usize = 0x18;
const IBRD: usize = 0x24;
const FBRD: usize = 0x28;
const LCRH: usize = 0x2C;
const CR: usize = 0x30;
const ICR: usize = 0x44;

// Flag register bits.
const FR_RXFE: u32 = 1 << 4;
const FR_TXFF: u32 = 1 << 5;

// GPIO register offsets (from GPIO_BASE).
const GPFSEL1: usize = 0x04;
const GPPUD: usize = 0x94;
const GPPUDCLK0: usize = 0x98;

/// The PL011 instance at the fixed BCM2711 address.
pub struct Pl011 {
    base: usize,
}

/// UART0.
pub static UART0: Pl011 = Pl011::new(layout::UART0_BASE);

impl Pl011 {
    const fn new(base: usize) -> Self {
        Self { base }
    }

    #[inline]
    fn reg(&self, offset: usize) -> *mut u32 {
        (self.base + offset) as *mut u32
    }

    #[inline]
    fn read(&self, offset: usize) -> u32 {
        // SAFETY: offset selects a PL011 register inside the device window.
        unsafe { read_volatile(self.reg(offset)) }
    }

    #[inline]
    fn write(&self, offset: usize, value: u32) {
        // SAFETY: offset selects a PL011 register inside the device window.
        unsafe { write_volatile(self.reg(offset), value) }
    }

    /// Bring up the UART: pin mux, 115200 baud, FIFOs on, TX+RX enabled.
    pub fn init(&self) {
        // Disable while reconfiguring.
        self.write(CR, 0);

        // GPIO 14/15 to alt 0 (TXD0/RXD0).
        let gpio = |offset: usize| (layout::GPIO_BASE + offset) as *mut u32;
        // SAFETY: GPIO registers inside the device window.
        unsafe {
            let mut sel = read_volatile(gpio(GPFSEL1));
            sel &= !(7 << 12);
            sel |= 4 << 12;
            sel &= !(7 << 15);
            sel |= 4 << 15;
            write_volatile(gpio(GPFSEL1), sel);

            // No pull on 14/15; the PUD sequence needs short settle delays.
            write_volatile(gpio(GPPUD), 0);
            settle();
            write_volatile(gpio(GPPUDCLK0), (1 << 14) | (1 << 15));
            settle();
            write_volatile(gpio(GPPUDCLK0), 0);
        }

        // Clear pending interrupts.
        self.write(ICR, 0x7FF);

        // 48 MHz / (16 * 115200) = 26.04: integer 26, fraction 3/64.
        self.write(IBRD, 26);
        self.write(FBRD, 3);

        // 8N1 with FIFOs.
        self.write(LCRH, (1 << 4) | (1 << 5) | (1 << 6));

        // Enable UART, TX, RX.
        self.write(CR, (1 << 0) | (1 << 8) | (1 << 9));
    }

    /// Blocking byte write.
    pub fn putc(&self, c: u8) {
        while self.read(FR) & FR_TXFF != 0 {
            core::hint::spin_loop();
        }
        self.write(DR, c as u32);
    }

    /// Blocking string write, expanding `\n` to `\r\n`.
    pub fn puts(&self, s: &str) {
        for c in s.bytes() {
            if c == b'\n' {
                self.putc(b'\r');
            }
            self.putc(c);
        }
    }

    /// Is a received byte waiting?
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.read(FR) & FR_RXFE == 0
    }

    /// Blocking byte read.
    #[must_use]
    pub fn getc(&self) -> u8 {
        while !self.has_data() {
            core::hint::spin_loop();
        }
        (self.read(DR) & 0xFF) as u8
    }

    /// Non-blocking byte read; `None` when the FIFO is empty.
    #[must_use]
    pub fn getc_nonblock(&self) -> Option<u8> {
        if self.has_data() {
            Some((self.read(DR) & 0xFF) as u8)
        } else {
            None
        }
    }
}

/// Settle delay for the GPIO pull-up/down sequence (150 cycles per the
/// BCM2711 datasheet).
fn settle() {
    for _ in 0..150 {
        core::hint::spin_loop();
    }
}
