//! Demo tasks for the `spawn` command: visible proof that preemption,
//! sleep and task exit work while the shell keeps accepting input.

use piko_pal::println;

use crate::sched;

/// Counts to five at one-second intervals, then exits explicitly.
pub fn counter() {
    for i in 1..=5 {
        println!("[counter] {}/5", i);
        sched::task_sleep(1000);
    }
    println!("[counter] finished");
    sched::task_exit();
}

/// Cycles a spinner for two seconds, then simply returns: the exit
/// trampoline in the synthesised link register ends the task.
pub fn spinner() {
    for &c in [b'|', b'/', b'-', b'\\'].iter().cycle().take(8) {
        println!("[spinner] {}", c as char);
        sched::task_sleep(250);
    }
}
