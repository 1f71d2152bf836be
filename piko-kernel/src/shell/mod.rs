//! Interactive shell.
//!
//! Runs as task 0 on the primary core: a prompt showing the working
//! directory, the line editor, and the command set covering tasks,
//! memory, the MMU report and the filesystem. All failures surface as
//! short console messages; nothing here is fatal.

pub mod editor;

use alloc::string::String;
use alloc::vec::Vec;

use piko_arch::{cpu, mmu};
use piko_common::{NUM_CORES, layout};
use piko_pal::console::{self, ConsoleWriter};
use piko_pal::{print, println, timer};

use crate::memory::heap::{kfree, kmalloc};
use crate::memory::pages;
use crate::sched::{self, SchedError};
use crate::{apps, fs, smp};

use editor::LineEditor;

/// Command table, also the tab-completion vocabulary.
pub const COMMANDS: &[&str] = &[
    "help", "info", "time", "clear", "ps", "spawn", "kill", "top", "memtest", "mem", "alloc",
    "pgalloc", "pgfree", "history", "mmu", "ls", "cd", "pwd", "mkdir", "rmdir", "touch", "cat",
    "write", "rm",
];

/// The shell loop. Never returns; the scheduler preempts it like any
/// other task.
pub fn run() -> ! {
    let mut editor = LineEditor::new();
    let mut cwd = fs::ROOT;

    loop {
        let prompt = prompt_for(cwd);
        print!("{}", prompt);

        let line = loop {
            let byte = console::getc();
            if let Some(line) = editor.input(byte, COMMANDS, &prompt, &mut ConsoleWriter) {
                break line;
            }
        };

        execute(line.trim(), &mut cwd, &editor);
    }
}

fn prompt_for(cwd: fs::NodeId) -> String {
    let mut prompt = fs::with(|f| f.path_of(cwd));
    prompt.push_str("> ");
    prompt
}

fn execute(line: &str, cwd: &mut fs::NodeId, editor: &LineEditor) {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else { return };
    let arg = parts.next();

    match cmd {
        "help" => cmd_help(),
        "info" => cmd_info(),
        "time" => cmd_time(),
        "clear" => console::puts("\x1b[2J\x1b[H"),
        "ps" => cmd_ps(),
        "spawn" => cmd_spawn(),
        "kill" => cmd_kill(arg),
        "top" => cmd_top(),
        "memtest" => cmd_memtest(),
        "mem" => cmd_mem(),
        "alloc" => cmd_alloc(arg),
        "pgalloc" => cmd_pgalloc(),
        "pgfree" => cmd_pgfree(arg),
        "history" => cmd_history(editor),
        "mmu" => cmd_mmu(),
        "ls" => cmd_ls(*cwd, arg),
        "cd" => cmd_cd(cwd, arg),
        "pwd" => println!("{}", fs::with(|f| f.path_of(*cwd))),
        "mkdir" => cmd_fs_op(*cwd, arg, "mkdir", |f, cwd, p| f.mkdir(cwd, p).map(|_| ())),
        "rmdir" => cmd_rmdir(cwd, arg),
        "touch" => cmd_fs_op(*cwd, arg, "touch", |f, cwd, p| f.touch(cwd, p).map(|_| ())),
        "cat" => cmd_cat(*cwd, arg),
        "write" => cmd_write(*cwd, arg),
        "rm" => cmd_fs_op(*cwd, arg, "rm", |f, cwd, p| f.rm(cwd, p)),
        _ => {
            println!("Unknown command: {}", cmd);
            println!("Type 'help' for available commands.");
        }
    }
}

fn cmd_help() {
    println!("Available commands:");
    println!("  help              this message");
    println!("  info              system information");
    println!("  time              uptime in seconds and ticks");
    println!("  clear             clear the screen");
    println!("  ps                list tasks");
    println!("  spawn             start the counter/spinner demo tasks");
    println!("  kill <id>         kill a task");
    println!("  top               per-core ticks and the task table");
    println!("  mem               page allocator statistics");
    println!("  memtest           exercise kmalloc/kfree");
    println!("  alloc <n>         kmalloc n bytes");
    println!("  pgalloc           allocate one physical page");
    println!("  pgfree <hex>      free a page by address");
    println!("  mmu               translation and cache configuration");
    println!("  history           recent commands");
    println!("  ls cd pwd mkdir rmdir touch cat write rm");
    println!("                    filesystem operations");
}

fn cmd_info() {
    println!("PIKO on Raspberry Pi 4 (BCM2711, validated on QEMU raspi4b)");
    println!("CPU:    ARM Cortex-A72 (ARMv8-A) at EL{}", cpu::current_el());
    println!("Timer:  {} Hz, {} ms quantum", timer::frequency(), layout::TICK_MS);
    println!("Cores:  {}/{} online", smp::online_count(), NUM_CORES);
    println!("Tasks:  {} live of {} slots", sched::live_tasks(), sched::MAX_TASKS);
}

fn cmd_time() {
    println!(
        "Uptime: {} seconds ({} ticks)",
        timer::uptime_secs(),
        timer::ticks()
    );
}

fn print_task_rows() {
    println!("   ID  STATE  NAME");
    for info in sched::tasks().into_iter().flatten() {
        println!("  {:>3}  {:<5}  {}", info.id, info.state.label(), info.name.as_str());
    }
}

fn cmd_ps() {
    print_task_rows();
}

fn cmd_spawn() {
    println!("Spawning 'counter' and 'spinner'...");
    if sched::spawn(apps::counter, "counter").is_err() {
        println!("spawn: could not create 'counter'");
    }
    if sched::spawn(apps::spinner, "spinner").is_err() {
        println!("spawn: could not create 'spinner'");
    }
}

fn cmd_kill(arg: Option<&str>) {
    let Some(id) = arg.and_then(|a| a.parse::<u32>().ok()) else {
        println!("usage: kill <id>");
        return;
    };
    match sched::task_kill(id) {
        Ok(()) => println!("Task {} killed", id),
        Err(SchedError::IsShell) => println!("Cannot kill the shell (task 0)"),
        Err(SchedError::IsCurrent) => println!("kill: task {} is running this shell", id),
        Err(_) => println!("kill: no such task: {}", id),
    }
}

fn cmd_top() {
    println!("Cores:");
    for core in 0..NUM_CORES {
        let state = if smp::is_online(core) { "up" } else { "down" };
        let ticks = if core == 0 {
            timer::ticks()
        } else {
            smp::core_ticks(core)
        };
        println!("  core{}  {:<4}  {:>8} ticks", core, state, ticks);
    }
    println!("Tasks:");
    print_task_rows();
}

fn cmd_mem() {
    let (total, used, free) = pages::stats();
    println!("Pages: {} total, {} used, {} free", total, used, free);
    println!(
        "       {} KB managed, {} KB free",
        total * piko_common::page::SIZE / 1024,
        free * piko_common::page::SIZE / 1024
    );
}

fn cmd_memtest() {
    let sizes = [16usize, 100, 512, 2000, 8192];
    let mut failed = false;

    for (i, &size) in sizes.iter().enumerate() {
        let Some(block) = kmalloc(size) else {
            println!("memtest: allocation of {} bytes failed", size);
            failed = true;
            continue;
        };
        let pattern = 0xA5u8.wrapping_add(i as u8);
        // SAFETY: the block is at least `size` bytes and exclusively ours.
        let ok = unsafe {
            core::ptr::write_bytes(block.as_ptr(), pattern, size);
            (0..size).all(|off| block.as_ptr().add(off).read() == pattern)
        };
        kfree(block);
        if ok {
            println!("  {:>5} bytes at {:p}: ok", size, block);
        } else {
            println!("  {:>5} bytes at {:p}: VERIFY FAILED", size, block);
            failed = true;
        }
    }

    if failed {
        println!("Memory test FAILED");
    } else {
        println!("Memory test passed");
    }
}

fn cmd_alloc(arg: Option<&str>) {
    let Some(size) = arg.and_then(|a| a.parse::<usize>().ok()) else {
        println!("usage: alloc <bytes>");
        return;
    };
    match kmalloc(size) {
        Some(block) => println!("Allocated {} bytes at {:p}", size, block),
        None => println!("allocation failed"),
    }
}

fn cmd_pgalloc() {
    match pages::alloc() {
        Some(addr) => println!("Page at 0x{:012x}", addr),
        None => println!("allocation failed"),
    }
}

fn cmd_pgfree(arg: Option<&str>) {
    let parsed = arg.and_then(|a| {
        let digits = a.strip_prefix("0x").or_else(|| a.strip_prefix("0X")).unwrap_or(a);
        usize::from_str_radix(digits, 16).ok()
    });
    let Some(addr) = parsed else {
        println!("usage: pgfree <hex address>");
        return;
    };
    pages::free(addr);
    println!("Freed page at 0x{:012x}", addr);
}

fn cmd_history(editor: &LineEditor) {
    let entries: Vec<&str> = editor.history().collect();
    for (i, entry) in entries.iter().rev().enumerate() {
        println!("  {:>2}  {}", i + 1, entry);
    }
}

fn cmd_mmu() {
    let r = mmu::report();
    println!("MMU configuration:");
    println!("  SCTLR_EL1: {:#018x}", r.sctlr);
    println!("    MMU:     {}", if r.mmu_on() { "ON" } else { "OFF" });
    println!("    D-cache: {}", if r.dcache_on() { "ON" } else { "OFF" });
    println!("    I-cache: {}", if r.icache_on() { "ON" } else { "OFF" });
    println!("  TCR_EL1:   {:#018x}", r.tcr);
    println!("    VA:      {}-bit", r.va_bits());
    println!("    IPS:     {}", r.ips_name());
    println!("  MAIR_EL1:  {:#018x}", r.mair);
    println!("    Attr0:   {:#04x} (device)", r.attr0());
    println!("    Attr1:   {:#04x} (normal)", r.attr1());
    println!("  TTBR0_EL1: {:#018x}", r.ttbr0);
    println!();
    println!("Memory map:");
    println!("  0x00000000-0x3FFFFFFF  1GB RAM    (normal, cacheable)");
    println!("  0xC0000000-0xFFFFFFFF  1GB device (UART, GIC, timers)");
}

fn cmd_ls(cwd: fs::NodeId, arg: Option<&str>) {
    let path = arg.unwrap_or("");
    let listing: Result<Vec<(String, fs::NodeKind, usize)>, fs::FsError> = fs::with(|f| {
        let id = f.resolve(cwd, path)?;
        match f.kind(id) {
            fs::NodeKind::File => {
                let mut rows = Vec::new();
                rows.push((String::from(f.name(id)), fs::NodeKind::File, f.size(id)));
                Ok(rows)
            }
            fs::NodeKind::Dir => {
                let mut rows = Vec::new();
                f.for_each_child(id, |_, name, kind, size| {
                    rows.push((String::from(name), kind, size));
                });
                Ok(rows)
            }
        }
    });

    match listing {
        Ok(rows) => {
            for (name, kind, size) in rows {
                match kind {
                    fs::NodeKind::Dir => println!("  d        -  {}/", name),
                    fs::NodeKind::File => println!("  f  {:>7}  {}", size, name),
                }
            }
        }
        Err(e) => println!("ls: {}: {}", e.message(), path),
    }
}

fn cmd_cd(cwd: &mut fs::NodeId, arg: Option<&str>) {
    let path = arg.unwrap_or("/");
    let target = fs::with(|f| {
        let id = f.resolve(*cwd, path)?;
        if f.kind(id) != fs::NodeKind::Dir {
            return Err(fs::FsError::NotADirectory);
        }
        Ok(id)
    });
    match target {
        Ok(id) => *cwd = id,
        Err(e) => println!("cd: {}: {}", e.message(), path),
    }
}

fn cmd_rmdir(cwd: &mut fs::NodeId, arg: Option<&str>) {
    let Some(path) = arg else {
        println!("usage: rmdir <dir>");
        return;
    };
    let result: Result<(fs::NodeId, fs::NodeId), fs::FsError> = fs::with(|f| {
        let id = f.resolve(*cwd, path)?;
        let parent = f.parent(id);
        f.rmdir(*cwd, path)?;
        Ok((id, parent))
    });
    match result {
        Ok((id, parent)) => {
            // Removing the working directory moves the shell to its
            // parent, so the prompt never points at a dead node.
            if id == *cwd {
                *cwd = parent;
            }
        }
        Err(e) => println!("rmdir: {}: {}", e.message(), path),
    }
}

fn cmd_cat(cwd: fs::NodeId, arg: Option<&str>) {
    let Some(path) = arg else {
        println!("usage: cat <file>");
        return;
    };
    // Copy out under the lock, print outside it.
    let content = fs::with(|f| f.read(cwd, path).map(Vec::from));
    match content {
        Ok(data) => {
            if let Ok(text) = core::str::from_utf8(&data) {
                console::puts(text);
            } else {
                for byte in &data {
                    print!("{:02x} ", byte);
                }
                println!();
            }
        }
        Err(e) => println!("cat: {}: {}", e.message(), path),
    }
}

fn cmd_write(cwd: fs::NodeId, arg: Option<&str>) {
    let Some(path) = arg else {
        println!("usage: write <file>");
        return;
    };
    println!("(enter content, finish with Ctrl-D)");
    let content = read_content();
    if let Err(e) = fs::with(|f| f.write(cwd, path, &content)) {
        println!("write: {}: {}", e.message(), path);
    }
}

/// Gather raw lines for `write` until Ctrl-D.
fn read_content() -> Vec<u8> {
    let mut data = Vec::new();
    let mut line = Vec::new();

    loop {
        match console::getc() {
            0x04 => {
                // Ctrl-D: keep any partial line, stop reading.
                data.extend_from_slice(&line);
                break;
            }
            b'\r' | b'\n' => {
                console::puts("\n");
                line.push(b'\n');
                data.extend_from_slice(&line);
                line.clear();
                if data.len() >= fs::FILE_MAX {
                    break;
                }
            }
            0x7F | 0x08 => {
                if line.pop().is_some() {
                    console::puts("\x08 \x08");
                }
            }
            byte @ 0x20..=0x7E => {
                line.push(byte);
                console::putc(byte);
            }
            _ => {}
        }
    }

    data
}

fn cmd_fs_op(
    cwd: fs::NodeId,
    arg: Option<&str>,
    name: &str,
    op: impl FnOnce(&mut fs::Filesystem, fs::NodeId, &str) -> Result<(), fs::FsError>,
) {
    let Some(path) = arg else {
        println!("usage: {} <path>", name);
        return;
    };
    if let Err(e) = fs::with(|f| op(f, cwd, path)) {
        println!("{}: {}: {}", name, e.message(), path);
    }
}
