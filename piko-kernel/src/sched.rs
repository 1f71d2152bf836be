//! Preemptive round-robin scheduler over a fixed task pool.
//!
//! The only involuntary suspension point is the timer IRQ: its entry path
//! pushes a trapframe on the interrupted task's stack and hands the stack
//! pointer to [`schedule_irq`], which stores it in the current TCB, picks
//! the next READY task strictly FIFO and returns *that* task's saved
//! stack pointer. Exception-return then resumes (or, for a synthesised
//! frame, starts) the chosen task.
//!
//! Queue discipline: a preempted task is re-enqueued whether it is
//! RUNNING (demoted to READY) or BLOCKED; the dequeue scan promotes
//! BLOCKED entries whose deadline has passed. A RUNNING task is never on
//! the queue.
//!
//! Task 0 is the shell, adopted at init as the already-running execution
//! context; its first trapframe appears on its stack at the first
//! preemption.

use piko_arch::exceptions::Trapframe;
use piko_arch::{IrqSpinLock, cpu};
use piko_common::layout;

use crate::memory::pages::{self, PageAllocator};

/// Size of the task pool, including the adopted shell.
pub const MAX_TASKS: usize = 16;

/// Longest task name, excluding the implicit terminator slot.
pub const NAME_MAX: usize = 31;

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Blocked,
    Dead,
}

impl TaskState {
    /// Fixed-width label for `ps`.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Running => "RUN",
            Self::Blocked => "BLOCK",
            Self::Dead => "DEAD",
        }
    }
}

/// Short inline task name.
#[derive(Debug, Clone, Copy)]
pub struct TaskName {
    bytes: [u8; NAME_MAX],
    len: u8,
}

impl TaskName {
    const EMPTY: Self = Self {
        bytes: [0; NAME_MAX],
        len: 0,
    };

    fn set(&mut self, name: &str) {
        let src = name.as_bytes();
        let len = src.len().min(NAME_MAX);
        self.bytes[..len].copy_from_slice(&src[..len]);
        self.len = len as u8;
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("?")
    }
}

/// Task control block.
struct Tcb {
    id: u32,
    state: TaskState,
    name: TaskName,
    /// Base of the task's 8 KB stack; 0 while the slot has never owned
    /// one. Stacks persist across slot reuse and are never freed.
    stack_base: usize,
    /// Saved stack pointer; points at a trapframe whenever the task is
    /// not running.
    sp: u64,
    /// Absolute tick at which a BLOCKED task becomes eligible again.
    sleep_until: u64,
    /// Ready-queue link (pool index).
    next: Option<usize>,
}

impl Tcb {
    const DEAD: Self = Self {
        id: 0,
        state: TaskState::Dead,
        name: TaskName::EMPTY,
        stack_base: 0,
        sp: 0,
        sleep_until: 0,
        next: None,
    };
}

/// Errors from task creation and control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// Every pool slot is live.
    NoFreeSlot,
    /// The page allocator could not back a stack.
    NoStack,
    /// `kill` refused the shell.
    IsShell,
    /// `kill` refused the calling task.
    IsCurrent,
    /// No live task has the given id.
    NotFound,
}

/// Snapshot row for `ps`/`top`.
#[derive(Debug, Clone, Copy)]
pub struct TaskInfo {
    pub id: u32,
    pub state: TaskState,
    pub name: TaskName,
}

/// The task pool plus the FIFO ready queue, linked by pool index.
pub struct TaskTable {
    pool: [Tcb; MAX_TASKS],
    head: Option<usize>,
    tail: Option<usize>,
    current: Option<usize>,
    next_id: u32,
}

impl TaskTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pool: [Tcb::DEAD; MAX_TASKS],
            head: None,
            tail: None,
            current: None,
            next_id: 0,
        }
    }

    /// Adopt the current execution context as task 0, the shell.
    ///
    /// `sp = 0`: there is no saved frame yet; the first preempting IRQ
    /// builds one on the shell's (boot) stack.
    pub fn adopt_shell(&mut self) {
        let shell = &mut self.pool[0];
        shell.id = self.next_id;
        self.next_id += 1;
        shell.state = TaskState::Running;
        shell.name.set("shell");
        shell.sp = 0;
        shell.sleep_until = 0;
        shell.next = None;
        self.current = Some(0);
    }

    /// Append to the ready-queue tail.
    fn enqueue(&mut self, idx: usize) {
        self.pool[idx].next = None;
        match self.tail {
            Some(tail) => self.pool[tail].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    /// Unlink a task from the queue if it is queued.
    fn unlink(&mut self, idx: usize) {
        let mut prev: Option<usize> = None;
        let mut cur = self.head;
        while let Some(c) = cur {
            if c == idx {
                let after = self.pool[c].next;
                match prev {
                    Some(p) => self.pool[p].next = after,
                    None => self.head = after,
                }
                if self.tail == Some(c) {
                    self.tail = prev;
                }
                self.pool[c].next = None;
                return;
            }
            prev = cur;
            cur = self.pool[c].next;
        }
    }

    /// Dequeue the first runnable task. BLOCKED entries whose deadline
    /// has passed are promoted to READY on the way; still-sleeping ones
    /// are left in place.
    fn dequeue_ready(&mut self, now: u64) -> Option<usize> {
        let mut prev: Option<usize> = None;
        let mut cur = self.head;
        while let Some(c) = cur {
            if self.pool[c].state == TaskState::Blocked && now >= self.pool[c].sleep_until {
                self.pool[c].state = TaskState::Ready;
            }
            if self.pool[c].state == TaskState::Ready {
                let after = self.pool[c].next;
                match prev {
                    Some(p) => self.pool[p].next = after,
                    None => self.head = after,
                }
                if self.tail == Some(c) {
                    self.tail = prev;
                }
                self.pool[c].next = None;
                return Some(c);
            }
            prev = cur;
            cur = self.pool[c].next;
        }
        None
    }

    /// The IRQ-path dispatch: store `old_sp`, rotate the queue, return
    /// the stack pointer of the task to resume.
    pub fn schedule_irq(&mut self, old_sp: u64, now: u64) -> u64 {
        let Some(cur) = self.current else {
            // Scheduler not armed yet.
            return old_sp;
        };

        self.pool[cur].sp = old_sp;

        match self.pool[cur].state {
            TaskState::Running => {
                self.pool[cur].state = TaskState::Ready;
                self.enqueue(cur);
            }
            TaskState::Blocked => self.enqueue(cur),
            TaskState::Ready | TaskState::Dead => {}
        }

        match self.dequeue_ready(now) {
            Some(next) => {
                self.pool[next].state = TaskState::Running;
                self.current = Some(next);
                self.pool[next].sp
            }
            None => {
                // Nothing runnable: keep the previous task. A sleeper is
                // woken early rather than stalling the core; a dead task
                // stays dead (its context is just the exit WFI loop).
                self.unlink(cur);
                if self.pool[cur].state == TaskState::Blocked {
                    self.pool[cur].state = TaskState::Running;
                }
                self.current = Some(cur);
                self.pool[cur].sp
            }
        }
    }

    /// Create a task: claim a DEAD slot, back it with a stack, synthesise
    /// its first trapframe and append it to the queue.
    pub fn create(
        &mut self,
        pages: &mut PageAllocator,
        entry: u64,
        exit_lr: u64,
        name: &str,
    ) -> Result<u32, SchedError> {
        let slot = (0..MAX_TASKS)
            .find(|&i| self.pool[i].state == TaskState::Dead && self.current != Some(i))
            .ok_or(SchedError::NoFreeSlot)?;

        if self.pool[slot].stack_base == 0 {
            let pages_needed = layout::TASK_STACK_SIZE / piko_common::page::SIZE;
            self.pool[slot].stack_base =
                pages.alloc_n(pages_needed).ok_or(SchedError::NoStack)?;
        }

        let id = self.next_id;
        self.next_id += 1;

        let task = &mut self.pool[slot];
        task.id = id;
        task.state = TaskState::Ready;
        task.name.set(name);
        task.sleep_until = 0;
        task.next = None;

        let stack_top = task.stack_base + layout::TASK_STACK_SIZE;
        // SAFETY: the stack region is exclusively owned by this slot and
        // at least a trapframe deep.
        task.sp = unsafe { Trapframe::new_task(entry, exit_lr).install(stack_top) };

        self.enqueue(slot);
        Ok(id)
    }

    /// Record the current task's sleep deadline and block it. Returns the
    /// pool index to poll, or `None` when no task is current.
    pub fn block_current(&mut self, until: u64) -> Option<usize> {
        let cur = self.current?;
        self.pool[cur].sleep_until = until;
        self.pool[cur].state = TaskState::Blocked;
        Some(cur)
    }

    /// State of a pool slot (for the sleep wake poll).
    #[must_use]
    pub fn state_of(&self, idx: usize) -> TaskState {
        self.pool[idx].state
    }

    /// Mark the current task dead. The slot becomes reusable at the next
    /// dispatch; the stack stays with the slot.
    pub fn exit_current(&mut self) {
        if let Some(cur) = self.current {
            self.pool[cur].state = TaskState::Dead;
        }
    }

    /// Kill a task by id. Refuses the shell and the caller.
    pub fn kill(&mut self, id: u32) -> Result<(), SchedError> {
        if id == 0 {
            return Err(SchedError::IsShell);
        }
        if let Some(cur) = self.current
            && self.pool[cur].id == id
            && self.pool[cur].state != TaskState::Dead
        {
            return Err(SchedError::IsCurrent);
        }

        let slot = (0..MAX_TASKS)
            .find(|&i| self.pool[i].id == id && self.pool[i].state != TaskState::Dead)
            .ok_or(SchedError::NotFound)?;

        self.unlink(slot);
        self.pool[slot].state = TaskState::Dead;
        Ok(())
    }

    /// Id of the current task.
    #[must_use]
    pub fn current_id(&self) -> Option<u32> {
        self.current.map(|i| self.pool[i].id)
    }

    /// Snapshot every slot that has ever held a task.
    #[must_use]
    pub fn snapshot(&self) -> [Option<TaskInfo>; MAX_TASKS] {
        let mut out = [None; MAX_TASKS];
        for (i, task) in self.pool.iter().enumerate() {
            // Slot 0 always exists after init; other slots only count
            // once they have been given a stack.
            if i == 0 && self.current.is_some() || task.stack_base != 0 {
                out[i] = Some(TaskInfo {
                    id: task.id,
                    state: task.state,
                    name: task.name,
                });
            }
        }
        out
    }

    /// Count of live (non-DEAD) tasks.
    #[must_use]
    pub fn live_tasks(&self) -> usize {
        self.pool
            .iter()
            .filter(|t| t.state != TaskState::Dead)
            .count()
    }
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Global scheduler state: IRQ-masked on the preempting core, spinlocked
/// against the others.
static SCHEDULER: IrqSpinLock<TaskTable> = IrqSpinLock::new(TaskTable::new());

/// Initialise the scheduler: the caller's context becomes task 0.
pub fn init() {
    SCHEDULER.lock().adopt_shell();
    log::info!("scheduler: task 0 'shell' adopted, {} slots", MAX_TASKS);
}

/// Timer-IRQ dispatch hook; see [`TaskTable::schedule_irq`].
pub fn schedule_irq(old_sp: u64) -> u64 {
    SCHEDULER
        .lock()
        .schedule_irq(old_sp, piko_pal::timer::ticks())
}

/// Exit trampoline: new tasks get this as their link register, so simply
/// returning from the entry function ends the task.
extern "C" fn task_exit_trampoline() {
    task_exit();
}

/// Create a task running `entry`. On pool exhaustion the error is logged
/// and returned; never fatal.
pub fn spawn(entry: fn(), name: &str) -> Result<u32, SchedError> {
    let result = pages::with(|pa| {
        SCHEDULER.lock().create(
            pa,
            entry as usize as u64,
            task_exit_trampoline as usize as u64,
            name,
        )
    })
    .unwrap_or(Err(SchedError::NoStack));

    match result {
        Ok(id) => log::info!("spawned task {} '{}'", id, name),
        Err(err) => log::warn!("task_create '{}' failed: {:?}", name, err),
    }
    result
}

/// Sleep the current task for at least `ms` milliseconds, rounded up to
/// whole quanta. Busy-waits in WFI until the dispatch scan (or an empty
/// queue) flips the state back.
pub fn task_sleep(ms: u32) {
    let ticks = ms.div_ceil(layout::TICK_MS).max(1) as u64;

    let me = {
        let mut sched = SCHEDULER.lock();
        let until = piko_pal::timer::ticks() + ticks;
        sched.block_current(until)
    };
    let Some(me) = me else { return };

    loop {
        cpu::wait_for_interrupt();
        if SCHEDULER.lock().state_of(me) != TaskState::Blocked {
            break;
        }
    }
}

/// Voluntary yield: a no-op, the next tick boundary preempts anyway.
pub fn task_yield() {
    cpu::yield_hint();
}

/// Terminate the calling task. The next IRQ schedules someone else and
/// the slot becomes reusable.
pub fn task_exit() -> ! {
    SCHEDULER.lock().exit_current();
    loop {
        cpu::wait_for_interrupt();
    }
}

/// Kill a task by id; see [`TaskTable::kill`].
pub fn task_kill(id: u32) -> Result<(), SchedError> {
    SCHEDULER.lock().kill(id)
}

/// Snapshot the pool for `ps`/`top`.
#[must_use]
pub fn tasks() -> [Option<TaskInfo>; MAX_TASKS] {
    SCHEDULER.lock().snapshot()
}

/// Live-task count.
#[must_use]
pub fn live_tasks() -> usize {
    SCHEDULER.lock().live_tasks()
}

#[cfg(test)]
mod tests {
    use super::*;
    use piko_common::page;

    const STACK_PAGES: usize = layout::TASK_STACK_SIZE / page::SIZE;

    /// Page allocator over real host memory so trapframe installs land in
    /// writable storage.
    fn arena(pages: usize) -> PageAllocator {
        let raw = Box::leak(vec![0u8; (pages + 1) * page::SIZE].into_boxed_slice());
        let base = piko_common::align_up(raw.as_mut_ptr() as usize, page::SIZE);
        let bitmap = Box::leak(vec![0u8; pages.div_ceil(8)].into_boxed_slice());
        // SAFETY: leaked, exclusively owned buffers.
        unsafe { PageAllocator::new(bitmap, base, pages) }
    }

    fn entry_a() {}
    fn entry_b() {}
    fn exit_stub() {}

    fn table_with(pa: &mut PageAllocator, names: &[&str]) -> TaskTable {
        let mut t = TaskTable::new();
        t.adopt_shell();
        for name in names {
            t.create(
                pa,
                entry_a as usize as u64,
                exit_stub as usize as u64,
                name,
            )
            .unwrap();
        }
        t
    }

    #[test]
    fn adoption_invariant() {
        let mut t = TaskTable::new();
        t.adopt_shell();
        assert_eq!(t.current_id(), Some(0));
        let snap = t.snapshot();
        let shell = snap[0].unwrap();
        assert_eq!(shell.id, 0);
        assert_eq!(shell.state, TaskState::Running);
        assert_eq!(shell.name.as_str(), "shell");
        assert_eq!(t.live_tasks(), 1);
    }

    #[test]
    fn create_synthesises_trapframe() {
        let mut pa = arena(4 * STACK_PAGES);
        let mut t = TaskTable::new();
        t.adopt_shell();
        let id = t
            .create(
                &mut pa,
                entry_b as usize as u64,
                exit_stub as usize as u64,
                "worker",
            )
            .unwrap();
        assert_eq!(id, 1);

        let sp = t.pool[1].sp;
        assert_eq!(sp % 16, 0);
        // SAFETY: sp points into the arena-backed stack.
        let frame = unsafe { &*(sp as *const Trapframe) };
        assert_eq!(frame.elr, entry_b as usize as u64);
        assert_eq!(frame.gpr[30], exit_stub as usize as u64);
        assert_eq!(frame.spsr, piko_arch::exceptions::SPSR_NEW_TASK);
        assert!(frame.gpr[..30].iter().all(|&r| r == 0));
    }

    #[test]
    fn round_robin_is_strict_fifo() {
        let mut pa = arena(8 * STACK_PAGES);
        let mut t = table_with(&mut pa, &["a", "b"]);

        // Tick 1: shell preempted, first-created task runs.
        let sp = t.schedule_irq(0x1000, 0);
        assert_eq!(t.current_id(), Some(1));
        assert_ne!(sp, 0x1000);

        // Tick 2: b runs, a and shell queued behind.
        t.schedule_irq(sp, 1);
        assert_eq!(t.current_id(), Some(2));

        // Tick 3: shell again — insertion order holds.
        t.schedule_irq(0x2000, 2);
        assert_eq!(t.current_id(), Some(0));

        // Over 2k consecutive ticks every task runs repeatedly.
        let mut runs = [0u32; 3];
        let mut sp = 0x3000;
        for tick in 3..3 + 6 {
            sp = t.schedule_irq(sp, tick);
            runs[t.current_id().unwrap() as usize] += 1;
        }
        assert!(runs.iter().all(|&r| r == 2));
    }

    #[test]
    fn schedule_without_current_returns_old_sp() {
        let mut t = TaskTable::new();
        assert_eq!(t.schedule_irq(0xABC, 0), 0xABC);
    }

    #[test]
    fn preempted_sp_is_saved_in_tcb() {
        let mut pa = arena(4 * STACK_PAGES);
        let mut t = table_with(&mut pa, &["a"]);
        t.schedule_irq(0xDEAD0, 0);
        assert_eq!(t.pool[0].sp, 0xDEAD0);
        assert_eq!(t.pool[0].state, TaskState::Ready);
    }

    #[test]
    fn blocked_task_wakes_no_earlier_than_deadline() {
        let mut pa = arena(4 * STACK_PAGES);
        let mut t = table_with(&mut pa, &["sleeper"]);

        // Run the sleeper.
        t.schedule_irq(0x1000, 0);
        assert_eq!(t.current_id(), Some(1));

        // It goes to sleep until tick 5.
        t.block_current(5);

        // Preempted while blocked: shell runs, sleeper re-queued.
        t.schedule_irq(0x2000, 1);
        assert_eq!(t.current_id(), Some(0));

        // Ticks 2..4: sleeper must not run.
        for now in 2..5 {
            t.schedule_irq(0x3000, now);
            assert_eq!(t.current_id(), Some(0));
        }

        // Tick 5: deadline reached, sleeper promoted and dispatched.
        t.schedule_irq(0x3000, 5);
        assert_eq!(t.current_id(), Some(1));
        assert_eq!(t.pool[1].state, TaskState::Running);
    }

    #[test]
    fn empty_queue_keeps_previous_task() {
        let mut pa = arena(4 * STACK_PAGES);
        let mut t = table_with(&mut pa, &[]);

        // Shell blocks with nothing else runnable: it is woken early and
        // keeps the core.
        t.block_current(100);
        let sp = t.schedule_irq(0x4000, 0);
        assert_eq!(sp, 0x4000);
        assert_eq!(t.current_id(), Some(0));
        assert_eq!(t.pool[0].state, TaskState::Running);
        // And it is not left dangling on the queue.
        assert_eq!(t.head, None);
    }

    #[test]
    fn kill_refuses_shell_and_current() {
        let mut pa = arena(4 * STACK_PAGES);
        let mut t = table_with(&mut pa, &["victim"]);

        assert_eq!(t.kill(0), Err(SchedError::IsShell));

        // Make the victim current, then try to kill it from itself.
        t.schedule_irq(0x1000, 0);
        assert_eq!(t.current_id(), Some(1));
        assert_eq!(t.kill(1), Err(SchedError::IsCurrent));
    }

    #[test]
    fn kill_unlinks_and_marks_dead() {
        let mut pa = arena(8 * STACK_PAGES);
        let mut t = table_with(&mut pa, &["a", "b"]);

        assert_eq!(t.kill(1), Ok(()));
        assert_eq!(t.pool[1].state, TaskState::Dead);
        assert_eq!(t.kill(1), Err(SchedError::NotFound));
        assert_eq!(t.kill(99), Err(SchedError::NotFound));

        // Dispatch never selects the corpse.
        t.schedule_irq(0x1000, 0);
        assert_eq!(t.current_id(), Some(2));
    }

    #[test]
    fn pool_exhaustion_and_slot_reuse() {
        let mut pa = arena((MAX_TASKS + 2) * STACK_PAGES);
        let mut t = TaskTable::new();
        t.adopt_shell();

        for i in 1..MAX_TASKS {
            t.create(&mut pa, 0x1000, 0x2000, "filler")
                .unwrap_or_else(|e| panic!("slot {i}: {e:?}"));
        }
        assert_eq!(
            t.create(&mut pa, 0x1000, 0x2000, "overflow"),
            Err(SchedError::NoFreeSlot)
        );

        // Kill one; its slot (and stack) is reused without new pages.
        let used_before = pa.used_pages();
        t.kill(3).unwrap();
        let id = t.create(&mut pa, 0x1000, 0x2000, "reuse").unwrap();
        assert_eq!(id as usize, MAX_TASKS);
        assert_eq!(pa.used_pages(), used_before);
    }

    #[test]
    fn exit_frees_slot_at_next_dispatch() {
        let mut pa = arena(4 * STACK_PAGES);
        let mut t = table_with(&mut pa, &["worker"]);

        t.schedule_irq(0x1000, 0);
        assert_eq!(t.current_id(), Some(1));
        t.exit_current();
        t.schedule_irq(0x2000, 1);
        assert_eq!(t.current_id(), Some(0));
        assert_eq!(t.pool[1].state, TaskState::Dead);
    }

    #[test]
    fn name_is_truncated_not_rejected() {
        let mut pa = arena(4 * STACK_PAGES);
        let mut t = TaskTable::new();
        t.adopt_shell();
        let long = "x".repeat(64);
        t.create(&mut pa, 0x1000, 0x2000, &long).unwrap();
        assert_eq!(t.pool[1].name.as_str().len(), NAME_MAX);
    }
}
