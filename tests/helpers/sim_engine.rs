//! In-process stand-in for a JIT kernel under lldb.
//!
//! Each compiled cell becomes a "function" whose body is the cell text.
//! A line counts as emitted code when it is a statement that does work
//! (an assignment, a `return` or a call); plain declarations such as
//! `int x;` get no code, so breakpoints there cannot bind.

use async_trait::async_trait;
use cell_debugger::engine::*;
use cell_debugger::source::{
    CellCompiler, CompiledUnit, Diagnostic, InputLineCompiler, RecordedHistory, Severity,
};
use cell_debugger::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

pub const MAIN_THREAD: i64 = 1;
pub const CELL_FUNCTION: &str = "__cling_Un1Qu30";

pub fn is_executable(line: &str) -> bool {
    let line = line.trim();
    line.ends_with(';')
        && (line.contains('=') || line.starts_with("return") || line.contains('('))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Continue,
    Step,
}

#[derive(Debug, Clone)]
struct Run {
    unit: String,
    pc: usize,
}

#[derive(Debug, Clone)]
struct Local {
    name: String,
    type_name: String,
    value: String,
    elements: Vec<String>,
}

#[derive(Default)]
struct SimState {
    units: HashMap<String, Vec<String>>,
    breakpoints: HashMap<String, Vec<EngineBreakpoint>>,
    next_breakpoint_id: i64,
    attached: bool,
    gone: bool,
    fail_attach: bool,
    run: Option<Run>,
    stopped: bool,
    stop_generation: i64,
    completed_runs: usize,
    calls: Vec<String>,
}

pub struct SimEngine {
    state: Mutex<SimState>,
    events: EventSender,
}

impl SimEngine {
    pub fn new(events: EventSender) -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    // ---- test controls ----

    pub fn load_unit(&self, unit: &str, code: &str) {
        self.lock()
            .units
            .insert(unit.to_string(), code.lines().map(str::to_string).collect());
    }

    /// Calls the function compiled from `unit` on the kernel's main thread.
    pub fn run_function(&self, unit: &str) {
        let mut state = self.lock();
        assert!(state.attached, "run_function needs an attached engine");
        assert!(state.run.is_none(), "a cell is already executing");
        state.run = Some(Run {
            unit: unit.to_string(),
            pc: 0,
        });
        self.advance(&mut state, 0, Mode::Continue);
    }

    /// The kernel is interrupted while `unit` executes `line`.
    pub fn interrupt_in(&self, unit: &str, line: i64) {
        let mut state = self.lock();
        assert!(state.attached, "interrupt_in needs an attached engine");
        state.run = Some(Run {
            unit: unit.to_string(),
            pc: (line - 1) as usize,
        });
        self.stop(&mut state, StopReason::Pause);
    }

    pub fn fail_next_attach(&self) {
        self.lock().fail_attach = true;
    }

    /// The lldb-dap connection drops: later calls fail and `Terminated` is reported.
    pub fn drop_connection(&self) {
        let mut state = self.lock();
        state.gone = true;
        state.stopped = false;
        state.run = None;
        let _ = self.events.send(EngineEvent::Terminated);
    }

    pub fn exit_process(&self, exit_code: i64) {
        let mut state = self.lock();
        state.attached = false;
        state.stopped = false;
        state.run = None;
        let _ = self.events.send(EngineEvent::Exited { exit_code });
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Lines with a bound breakpoint in `unit`.
    pub fn bound_lines(&self, unit: &str) -> Vec<i64> {
        self.lock()
            .breakpoints
            .get(unit)
            .map(|bps| bps.iter().map(|bp| bp.line).collect())
            .unwrap_or_default()
    }

    pub fn completed_runs(&self) -> usize {
        self.lock().completed_runs
    }

    pub fn is_attached(&self) -> bool {
        self.lock().attached
    }

    // ---- execution ----

    fn advance(&self, state: &mut SimState, from: usize, mode: Mode) {
        let Some(run) = state.run.clone() else {
            return;
        };
        let lines = state.units.get(&run.unit).cloned().unwrap_or_default();
        let bound = state.breakpoints.get(&run.unit).cloned().unwrap_or_default();

        for (pc, line) in lines.iter().enumerate().skip(from) {
            if !is_executable(line) {
                continue;
            }
            let reason = if bound.iter().any(|bp| bp.line == pc as i64 + 1) {
                Some(StopReason::Breakpoint)
            } else if mode == Mode::Step {
                Some(StopReason::Step)
            } else {
                None
            };
            if let Some(reason) = reason {
                state.run = Some(Run {
                    unit: run.unit.clone(),
                    pc,
                });
                self.stop(state, reason);
                return;
            }
        }

        state.run = None;
        state.completed_runs += 1;
        if mode == Mode::Step {
            // stepping off the end lands in the caller
            self.stop(state, StopReason::Step);
        }
    }

    fn stop(&self, state: &mut SimState, reason: StopReason) {
        state.stopped = true;
        state.stop_generation += 1;
        let _ = self.events.send(EngineEvent::Stopped {
            reason,
            thread_id: Some(MAIN_THREAD),
            description: None,
            all_threads_stopped: true,
        });
    }

    fn check(state: &SimState) -> Result<()> {
        if state.gone {
            Err(Error::EngineDisconnected("lldb-dap connection closed".to_string()))
        } else {
            Ok(())
        }
    }

    fn require_stopped(state: &SimState, operation: &str) -> Result<()> {
        Self::check(state)?;
        if state.stopped {
            Ok(())
        } else {
            Err(Error::NotStopped(format!("{} needs a stopped process", operation)))
        }
    }

    fn locals(state: &SimState) -> Vec<Local> {
        let Some(run) = &state.run else {
            return Vec::new();
        };
        let lines = state.units.get(&run.unit).cloned().unwrap_or_default();

        let mut locals: Vec<Local> = Vec::new();
        for line in lines.iter().take(run.pc) {
            let Some((lhs, rhs)) = line.trim().trim_end_matches(';').split_once('=') else {
                continue;
            };
            let tokens: Vec<&str> = lhs.split_whitespace().collect();
            let value = rhs.trim().to_string();
            match tokens.as_slice() {
                [name] => {
                    if let Some(local) = locals.iter_mut().find(|l| l.name == *name) {
                        local.value = value;
                    }
                }
                [type_parts @ .., name] if !type_parts.is_empty() => {
                    let type_name = type_parts.join(" ");
                    let local = if type_name.starts_with("std::vector") {
                        let elements: Vec<String> = value
                            .trim_matches(|c| c == '{' || c == '}')
                            .split(',')
                            .map(|e| e.trim().to_string())
                            .filter(|e| !e.is_empty())
                            .collect();
                        Local {
                            name: name.to_string(),
                            value: format!("size={}", elements.len()),
                            type_name,
                            elements,
                        }
                    } else {
                        Local {
                            name: name.to_string(),
                            type_name,
                            value,
                            elements: Vec::new(),
                        }
                    };
                    locals.retain(|l| l.name != local.name);
                    locals.push(local);
                }
                _ => {}
            }
        }
        locals
    }
}

#[async_trait]
impl DebugEngine for SimEngine {
    async fn attach(&self, target: &AttachTarget) -> Result<()> {
        let mut state = self.lock();
        Self::check(&state)?;
        state.calls.push(format!("attach {}", target.pid));
        if std::mem::take(&mut state.fail_attach) {
            return Err(Error::Engine("attach failed: operation not permitted".to_string()));
        }
        state.attached = true;
        Ok(())
    }

    async fn configuration_done(&self) -> Result<()> {
        let mut state = self.lock();
        Self::check(&state)?;
        state.calls.push("configurationDone".to_string());
        Ok(())
    }

    async fn set_breakpoints(
        &self,
        unit: &str,
        lines: &[LineRequest],
    ) -> Result<Vec<Option<EngineBreakpoint>>> {
        let mut state = self.lock();
        Self::check(&state)?;
        let requested: Vec<i64> = lines.iter().map(|l| l.line).collect();
        state.calls.push(format!("set {} {:?}", unit, requested));

        let code = state.units.get(unit).cloned().unwrap_or_default();
        let mut bound = Vec::new();
        let mut result = Vec::new();
        for request in lines {
            let index = request.line - 1;
            let executable = index >= 0
                && code
                    .get(index as usize)
                    .is_some_and(|line| is_executable(line));
            if executable {
                state.next_breakpoint_id += 1;
                let bp = EngineBreakpoint {
                    id: state.next_breakpoint_id,
                    line: request.line,
                };
                bound.push(bp);
                result.push(Some(bp));
            } else {
                result.push(None);
            }
        }

        state.breakpoints.insert(unit.to_string(), bound);
        Ok(result)
    }

    async fn clear_breakpoints(&self, unit: &str) -> Result<()> {
        let mut state = self.lock();
        Self::check(&state)?;
        state.calls.push(format!("clear {}", unit));
        state.breakpoints.remove(unit);
        Ok(())
    }

    async fn resume(&self, thread_id: i64) -> Result<()> {
        let mut state = self.lock();
        Self::require_stopped(&state, "continue")?;
        state.calls.push(format!("continue {}", thread_id));
        state.stopped = false;
        let from = state.run.as_ref().map(|r| r.pc + 1).unwrap_or(0);
        self.advance(&mut state, from, Mode::Continue);
        Ok(())
    }

    async fn step(&self, thread_id: i64, kind: StepKind) -> Result<()> {
        let mut state = self.lock();
        Self::require_stopped(&state, "step")?;
        state.calls.push(format!("step {:?} {}", kind, thread_id));
        state.stopped = false;

        if state.run.is_none() {
            // already in the caller; it has nothing further to step through
            self.stop(&mut state, StopReason::Step);
            return Ok(());
        }

        match kind {
            StepKind::In | StepKind::Over => {
                let from = state.run.as_ref().map(|r| r.pc + 1).unwrap_or(0);
                self.advance(&mut state, from, Mode::Step);
            }
            StepKind::Out => {
                state.run = None;
                state.completed_runs += 1;
                self.stop(&mut state, StopReason::Step);
            }
        }
        Ok(())
    }

    async fn pause(&self, thread_id: i64) -> Result<()> {
        let mut state = self.lock();
        Self::check(&state)?;
        state.calls.push(format!("pause {}", thread_id));
        if !state.stopped {
            self.stop(&mut state, StopReason::Pause);
        }
        Ok(())
    }

    async fn threads(&self) -> Result<Vec<EngineThread>> {
        let state = self.lock();
        Self::check(&state)?;
        Ok(vec![EngineThread {
            id: MAIN_THREAD,
            name: "xeus-cling kernel".to_string(),
        }])
    }

    async fn stack(&self, _thread_id: i64) -> Result<Vec<EngineFrame>> {
        let state = self.lock();
        Self::require_stopped(&state, "stackTrace")?;

        let base = state.stop_generation * 100;
        let mut frames = Vec::new();
        if let Some(run) = &state.run {
            frames.push(EngineFrame {
                id: base + 1,
                name: CELL_FUNCTION.to_string(),
                unit: Some(run.unit.clone()),
                line: run.pc as i64 + 1,
                column: 1,
            });
        }
        frames.push(EngineFrame {
            id: base + 2,
            name: "main".to_string(),
            unit: None,
            line: 57,
            column: 5,
        });
        Ok(frames)
    }

    async fn scopes(&self, frame_id: i64) -> Result<Vec<EngineScope>> {
        let state = self.lock();
        Self::require_stopped(&state, "scopes")?;
        if frame_id / 100 != state.stop_generation {
            return Err(Error::Engine(format!("invalid frame id {}", frame_id)));
        }
        Ok(vec![EngineScope {
            name: "Locals".to_string(),
            reference: frame_id * 10 + 1,
            expensive: false,
        }])
    }

    async fn variables(&self, reference: i64) -> Result<Vec<EngineVariable>> {
        let state = self.lock();
        Self::require_stopped(&state, "variables")?;

        // only the cell frame has locals
        let frame = reference / 10;
        if frame % 100 != 1 {
            return Ok(Vec::new());
        }
        Ok(Self::locals(&state)
            .into_iter()
            .map(|local| EngineVariable {
                name: local.name,
                value: local.value,
                type_name: Some(local.type_name),
                reference: 0,
            })
            .collect())
    }

    async fn evaluate(&self, expression: &str, _frame_id: Option<i64>) -> Result<EngineValue> {
        let state = self.lock();
        Self::require_stopped(&state, "evaluate")?;
        let locals = Self::locals(&state);

        if let Some((name, index)) = expression
            .strip_suffix(']')
            .and_then(|e| e.split_once('['))
        {
            let element = locals
                .iter()
                .find(|l| l.name == name)
                .zip(index.parse::<usize>().ok())
                .and_then(|(local, i)| local.elements.get(i));
            if let Some(element) = element {
                return Ok(EngineValue {
                    result: element.clone(),
                    type_name: Some("int".to_string()),
                    reference: 0,
                });
            }
        } else if let Some(local) = locals.iter().find(|l| l.name == expression) {
            return Ok(EngineValue {
                result: local.value.clone(),
                type_name: Some(local.type_name.clone()),
                reference: 0,
            });
        } else if expression.parse::<i64>().is_ok() {
            return Ok(EngineValue {
                result: expression.to_string(),
                type_name: Some("int".to_string()),
                reference: 0,
            });
        }

        Err(Error::Engine(format!(
            "error: use of undeclared identifier '{}'",
            expression
        )))
    }

    async fn detach(&self) -> Result<()> {
        let mut state = self.lock();
        Self::check(&state)?;
        state.calls.push("detach".to_string());
        state.attached = false;
        state.stopped = false;
        state.run = None;
        Ok(())
    }
}

/// Compiles cells into `input_line_<n>` units loaded into a [`SimEngine`].
///
/// Text mentioning `undeclared_` fails to compile; `#warning` lines become
/// warning diagnostics.
/// Checks cell text the way the interpreter would, names units through the
/// production numbering and loads them into the [`SimEngine`].
pub struct SimCompiler {
    engine: Arc<SimEngine>,
    numbering: InputLineCompiler,
}

impl SimCompiler {
    pub fn new(engine: Arc<SimEngine>) -> Self {
        Self {
            engine,
            numbering: InputLineCompiler::new("input_line_", 1, Arc::new(RecordedHistory::new())),
        }
    }
}

#[async_trait]
impl CellCompiler for SimCompiler {
    async fn compile(&self, path: &str, code: &str) -> Result<CompiledUnit> {
        if code.trim().is_empty() {
            return Err(Error::Compile("empty cell".to_string()));
        }
        if let Some(line) = code.lines().position(|l| l.contains("undeclared_")) {
            return Err(Error::Compile(format!(
                "input_line:{}: error: use of undeclared identifier",
                line + 1
            )));
        }

        let unit_name = self.numbering.compile(path, code).await?.unit_name;
        self.engine.load_unit(&unit_name, code);

        let diagnostics = code
            .lines()
            .enumerate()
            .filter_map(|(i, line)| {
                line.trim().strip_prefix("#warning").map(|message| Diagnostic {
                    line: i as i64 + 1,
                    severity: Severity::Warning,
                    message: message.trim().to_string(),
                })
            })
            .collect();

        Ok(CompiledUnit {
            unit_name,
            diagnostics,
        })
    }

    async fn unit_code(&self, unit: &str) -> Option<String> {
        self.numbering.unit_code(unit).await
    }

    async fn record_execution(&self, execution_count: u64, code: &str) {
        self.numbering.record_execution(execution_count, code).await;
        // the interpreter JIT-compiled it whether or not a cell was dumped
        self.engine
            .load_unit(&format!("input_line_{}", execution_count), code);
    }
}
