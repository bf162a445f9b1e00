pub mod cpu;
pub mod hdl;
pub mod jack;
pub mod vm;

/// Lifecycle state shared by all engines.
///
/// Freshly constructed engines are `Ready`. `run`/`step` move through
/// `Running` and settle in `Paused`, `Halted` or `Error`. `reset` returns the
/// engine to `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecState {
    #[default]
    Ready,
    Running,
    Paused,
    Halted,
    Error,
}

/// Why an engine stopped in `Paused`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PauseReason {
    #[default]
    None,
    StepComplete,
    Breakpoint,
    FunctionEntry,
    FunctionExit,
    UserRequest,
}
