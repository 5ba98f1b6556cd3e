//! Maps the validated task table onto esp-rtos executors.
//!
//! Each core runs a thread-mode executor. On the application core the two
//! highest-ranked tasks additionally get their own interrupt executors so
//! they preempt everything below them.

use elato_core::tasks::{CoreId, TaskDescriptor, TaskKind, TaskPlan};
use esp_hal::interrupt::Priority;
use log::info;

/// Where a task's future is spawned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Placement {
    /// Interrupt executor at `priority` on the task's core.
    Preemptive { priority: Priority, slot: u8 },
    /// Cooperative thread-mode executor of the task's core.
    Thread,
}

/// Interrupt executor levels handed out by rank, highest first.
pub const PREEMPTIVE_LEVELS: [Priority; 2] = [Priority::Priority3, Priority::Priority2];

pub fn placement(plan: &TaskPlan<'_>, kind: TaskKind) -> Placement {
    let Some(task) = plan.get(kind) else {
        return Placement::Thread;
    };
    // The protocol core hosts the network task alone.
    if task.core == CoreId::Protocol {
        return Placement::Thread;
    }
    match plan.rank_on_core(kind) {
        Some(rank) if rank < PREEMPTIVE_LEVELS.len() => Placement::Preemptive {
            priority: PREEMPTIVE_LEVELS[rank],
            slot: rank as u8,
        },
        _ => Placement::Thread,
    }
}

pub fn log_plan(plan: &TaskPlan<'_>) {
    for task in plan.tasks() {
        let TaskDescriptor {
            name,
            core,
            priority,
            stack_bytes,
            ..
        } = *task;
        info!(
            "tasks: {} core={} priority={} stack={} placement={:?}",
            name,
            core as u8,
            priority,
            stack_bytes,
            placement(plan, task.kind)
        );
    }
    info!(
        "tasks: stack budget core0={} core1={}",
        plan.stack_budget(CoreId::Protocol),
        plan.stack_budget(CoreId::Application)
    );
}
