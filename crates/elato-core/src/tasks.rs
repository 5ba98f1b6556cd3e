//! Declarative task placement: which core each task runs on, its priority
//! and its stack budget.

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum CoreId {
    /// Core 0: network/protocol work only.
    Protocol = 0,
    /// Core 1: audio path and indicators.
    Application = 1,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskKind {
    Led,
    AudioOutput,
    AudioInput,
    Network,
    TouchPoll,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TaskDescriptor {
    pub kind: TaskKind,
    pub name: &'static str,
    pub core: CoreId,
    /// Higher runs first; only meaningful between tasks on the same core.
    pub priority: u8,
    pub stack_bytes: u32,
}

impl TaskDescriptor {
    const fn new(
        kind: TaskKind,
        name: &'static str,
        core: CoreId,
        priority: u8,
        stack_bytes: u32,
    ) -> Self {
        Self {
            kind,
            name,
            core,
            priority,
            stack_bytes,
        }
    }
}

pub const MAX_PRIORITY: u8 = 24;

pub const LED_TASK: TaskDescriptor =
    TaskDescriptor::new(TaskKind::Led, "led", CoreId::Application, 2, 4096);
pub const SPEAKER_TASK: TaskDescriptor =
    TaskDescriptor::new(TaskKind::AudioOutput, "speaker", CoreId::Application, 3, 4096);
pub const MICROPHONE_TASK: TaskDescriptor =
    TaskDescriptor::new(TaskKind::AudioInput, "microphone", CoreId::Application, 4, 4096);
pub const NETWORK_TASK: TaskDescriptor =
    TaskDescriptor::new(TaskKind::Network, "network", CoreId::Protocol, MAX_PRIORITY, 8192);
pub const TOUCH_TASK: TaskDescriptor = TaskDescriptor::new(
    TaskKind::TouchPoll,
    "touch",
    CoreId::Application,
    MAX_PRIORITY - 1,
    4096,
);

/// Default table without touch input.
pub const BUTTON_MODE_TASKS: [TaskDescriptor; 4] =
    [LED_TASK, SPEAKER_TASK, MICROPHONE_TASK, NETWORK_TASK];

pub const TOUCH_MODE_TASKS: [TaskDescriptor; 5] = [
    LED_TASK,
    SPEAKER_TASK,
    MICROPHONE_TASK,
    NETWORK_TASK,
    TOUCH_TASK,
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PlanError {
    MissingTask(TaskKind),
    DuplicateTask(TaskKind),
    /// Something other than the network task was placed on the protocol core.
    ProtocolCoreShared(TaskKind),
    AudioOffApplicationCore(TaskKind),
    NetworkOffProtocolCore,
    NetworkNotHighest,
    /// Audio priorities must be microphone > speaker > led.
    AudioPriorityOrder,
    ZeroStack(TaskKind),
}

/// Validated view over a task table.
#[derive(Clone, Copy, Debug)]
pub struct TaskPlan<'a> {
    tasks: &'a [TaskDescriptor],
}

impl<'a> TaskPlan<'a> {
    pub fn new(tasks: &'a [TaskDescriptor]) -> Result<Self, PlanError> {
        let plan = Self { tasks };
        plan.validate()?;
        Ok(plan)
    }

    pub fn tasks(&self) -> &'a [TaskDescriptor] {
        self.tasks
    }

    pub fn get(&self, kind: TaskKind) -> Option<&'a TaskDescriptor> {
        self.tasks.iter().find(|task| task.kind == kind)
    }

    pub fn on_core(&self, core: CoreId) -> impl Iterator<Item = &'a TaskDescriptor> + 'a {
        self.tasks.iter().filter(move |task| task.core == core)
    }

    /// Zero-based rank among the tasks sharing `kind`'s core, highest
    /// priority first.
    pub fn rank_on_core(&self, kind: TaskKind) -> Option<usize> {
        let task = self.get(kind)?;
        Some(
            self.on_core(task.core)
                .filter(|other| other.priority > task.priority)
                .count(),
        )
    }

    pub fn stack_budget(&self, core: CoreId) -> u32 {
        stack_budget(self.tasks, core)
    }

    fn validate(&self) -> Result<(), PlanError> {
        for (index, task) in self.tasks.iter().enumerate() {
            if self.tasks[..index].iter().any(|prev| prev.kind == task.kind) {
                return Err(PlanError::DuplicateTask(task.kind));
            }
            if task.stack_bytes == 0 {
                return Err(PlanError::ZeroStack(task.kind));
            }
            match task.kind {
                TaskKind::Network => {}
                other if task.core == CoreId::Protocol => {
                    return Err(PlanError::ProtocolCoreShared(other));
                }
                TaskKind::Led | TaskKind::AudioInput | TaskKind::AudioOutput
                    if task.core != CoreId::Application =>
                {
                    return Err(PlanError::AudioOffApplicationCore(task.kind));
                }
                _ => {}
            }
        }

        let network = self
            .get(TaskKind::Network)
            .ok_or(PlanError::MissingTask(TaskKind::Network))?;
        if network.core != CoreId::Protocol {
            return Err(PlanError::NetworkOffProtocolCore);
        }
        if self.tasks.iter().any(|task| task.priority > network.priority) {
            return Err(PlanError::NetworkNotHighest);
        }

        let mic = self
            .get(TaskKind::AudioInput)
            .ok_or(PlanError::MissingTask(TaskKind::AudioInput))?;
        let speaker = self
            .get(TaskKind::AudioOutput)
            .ok_or(PlanError::MissingTask(TaskKind::AudioOutput))?;
        let led = self
            .get(TaskKind::Led)
            .ok_or(PlanError::MissingTask(TaskKind::Led))?;
        if !(mic.priority > speaker.priority && speaker.priority > led.priority) {
            return Err(PlanError::AudioPriorityOrder);
        }

        Ok(())
    }
}

/// Sum of stack budgets on `core`; usable in const context to size a core's
/// stack.
pub const fn stack_budget(tasks: &[TaskDescriptor], core: CoreId) -> u32 {
    let mut total = 0u32;
    let mut i = 0;
    while i < tasks.len() {
        if tasks[i].core as u8 == core as u8 {
            total += tasks[i].stack_bytes;
        }
        i += 1;
    }
    total
}
