//! # piko-pal
//!
//! Platform support for the Raspberry Pi 4 (BCM2711):
//! - [`uart`]: PL011 serial driver (byte in/out)
//! - [`console`]: locked console with `print!`/`println!`
//! - [`gic`]: GIC-400 interrupt controller + per-core timer routing
//! - [`timer`]: ARM generic physical timer and the global tick counter
//!
//! Everything here is memory-mapped I/O behind the identity map set up by
//! `piko-arch`; the drivers themselves are plain volatile accesses and
//! compile on any architecture (the registers are only reachable on the
//! target, which is where they are ever touched).

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod console;
pub mod gic;
pub mod timer;
pub mod uart;
