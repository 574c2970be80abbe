//! SF-006: Plan compiler — line-scanning state machine.
//!
//! States: `SeekStep` until the first step header, then `InStep` with one of
//! three modes:
//!
//! | mode             | line                 | transition                          |
//! |------------------|----------------------|-------------------------------------|
//! | Default          | step header          | flush step, open next (Default)     |
//! | Default          | `$x = [`             | MultilineArray                      |
//! | Default          | `For each $i in $l`  | ForEachBody                         |
//! | Default          | other recognized     | record, stay Default                |
//! | MultilineArray   | contains `]`         | assign, Default                     |
//! | MultilineArray   | step header          | error + partial assign, then header |
//! | ForEachBody      | bullet               | collect, stay                       |
//! | ForEachBody      | blank                | unroll, Default (line consumed)     |
//! | ForEachBody      | step header          | unroll, then header                 |
//! | ForEachBody      | other                | skip, stay                          |
//!
//! End of input finishes whatever mode is open, then flushes the step.
//! Function calls are simulated against the fixture table as they are seen;
//! loops are fully unrolled element-major, bullet-minor.

use super::classifier::{self, LineKind};
use super::extractor::ScriptSection;
use super::types::*;

/// Compiler inputs beyond the script itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions<'a> {
    pub fixtures: Option<&'a Fixtures>,

    /// Escalate warnings about undefined loop lists and missing fixtures to errors.
    pub strict: bool,
}

/// Compile an extracted script section into a plan.
pub fn compile(section: &ScriptSection<'_>, options: &CompileOptions<'_>) -> Plan {
    let mut compiler = Compiler::new(section.offset, options);
    for (i, line) in section.lines.iter().enumerate() {
        compiler.feed(i, line);
    }
    compiler.finish(section.lines.len())
}

/// A step whose actions are still being collected.
struct OpenStep {
    id: String,
    start: usize,
    actions: Vec<Action>,
}

enum Mode {
    Default,
    MultilineArray {
        name: String,
        parts: Vec<String>,
    },
    ForEachBody {
        iterator: String,
        items: Vec<Value>,
        bullets: Vec<(usize, String)>,
    },
}

enum State {
    SeekStep,
    InStep { step: OpenStep, mode: Mode },
}

impl State {
    fn open(id: &str, start: usize) -> Self {
        Self::InStep {
            step: OpenStep {
                id: id.to_string(),
                start,
                actions: Vec::new(),
            },
            mode: Mode::Default,
        }
    }
}

struct Compiler<'o> {
    offset: usize,
    options: &'o CompileOptions<'o>,
    state: State,
    plan: Plan,
}

impl<'o> Compiler<'o> {
    fn new(offset: usize, options: &'o CompileOptions<'o>) -> Self {
        Self {
            offset,
            options,
            state: State::SeekStep,
            plan: Plan::default(),
        }
    }

    /// Absolute 1-based line number of a local index.
    fn line_no(&self, local: usize) -> usize {
        self.offset + local + 1
    }

    fn feed(&mut self, i: usize, line: &str) {
        let state = std::mem::replace(&mut self.state, State::SeekStep);
        self.state = match state {
            State::SeekStep => match classifier::classify(line) {
                LineKind::StepHeader { id } => State::open(id, i),
                _ => State::SeekStep,
            },
            State::InStep { step, mode } => self.in_step(step, mode, i, line),
        };
    }

    fn in_step(&mut self, mut step: OpenStep, mode: Mode, i: usize, line: &str) -> State {
        match mode {
            Mode::Default => self.default_line(step, i, line),
            Mode::MultilineArray { name, mut parts } => {
                if classifier::is_step_header(line) {
                    self.close_array(&step.id, &name, &parts, Some(i));
                    return self.default_line(step, i, line);
                }
                match line.find(']') {
                    Some(idx) => {
                        parts.push(line[..idx].to_string());
                        self.close_array(&step.id, &name, &parts, None);
                        State::InStep {
                            step,
                            mode: Mode::Default,
                        }
                    }
                    None => {
                        parts.push(line.to_string());
                        State::InStep {
                            step,
                            mode: Mode::MultilineArray { name, parts },
                        }
                    }
                }
            }
            Mode::ForEachBody {
                iterator,
                items,
                mut bullets,
            } => {
                if classifier::is_step_header(line) {
                    self.unroll(&mut step, &iterator, &items, &bullets);
                    return self.default_line(step, i, line);
                }
                if line.trim().is_empty() {
                    self.unroll(&mut step, &iterator, &items, &bullets);
                    return State::InStep {
                        step,
                        mode: Mode::Default,
                    };
                }
                if classifier::is_bullet(line) {
                    bullets.push((i, line.to_string()));
                }
                State::InStep {
                    step,
                    mode: Mode::ForEachBody {
                        iterator,
                        items,
                        bullets,
                    },
                }
            }
        }
    }

    fn default_line(&mut self, mut step: OpenStep, i: usize, line: &str) -> State {
        let mode = match classifier::classify(line) {
            LineKind::StepHeader { id } => {
                self.flush(step, i);
                return State::open(id, i);
            }
            LineKind::InlineArray { name, items } => {
                self.set_list(name, items);
                Mode::Default
            }
            LineKind::ArrayOpen { name } => Mode::MultilineArray {
                name: name.to_string(),
                parts: Vec::new(),
            },
            LineKind::FunctionCall {
                target,
                function,
                args,
            } => {
                let call = self.function_call(&step.id, target, function, args, i);
                step.actions.push(Action::Function(call));
                Mode::Default
            }
            LineKind::ForEach { iterator, list } => {
                let items = self.loop_source(&step.id, list, i);
                Mode::ForEachBody {
                    iterator: iterator.to_string(),
                    items,
                    bullets: Vec::new(),
                }
            }
            LineKind::Assign { id } => {
                let action = assignment(&step.id, id, self.line_no(i));
                step.actions.push(action);
                Mode::Default
            }
            LineKind::OutputHint { .. } | LineKind::Blank | LineKind::Other => Mode::Default,
        };
        State::InStep { step, mode }
    }

    /// Close a step; `next` is the local index of the first line after it.
    fn flush(&mut self, step: OpenStep, next: usize) {
        self.plan.steps.push(Step {
            line_start: self.line_no(step.start),
            line_end: self.offset + next,
            id: step.id,
            actions: step.actions,
        });
    }

    fn finish(mut self, len: usize) -> Plan {
        let state = std::mem::replace(&mut self.state, State::SeekStep);
        if let State::InStep { mut step, mode } = state {
            match mode {
                Mode::Default => {}
                Mode::MultilineArray { name, parts } => {
                    self.close_array(&step.id, &name, &parts, Some(len));
                }
                Mode::ForEachBody {
                    iterator,
                    items,
                    bullets,
                } => self.unroll(&mut step, &iterator, &items, &bullets),
            }
            self.flush(step, len);
        }
        self.plan
    }

    fn set_list(&mut self, name: &str, items: Vec<String>) {
        let list = items.into_iter().map(Value::String).collect();
        self.plan
            .variables
            .insert(name.to_string(), Value::Array(list));
    }

    /// Assign accumulated items. `unterminated_at` is the local index where
    /// scanning stopped without a closing bracket.
    fn close_array(
        &mut self,
        step_id: &str,
        name: &str,
        parts: &[String],
        unterminated_at: Option<usize>,
    ) {
        if let Some(stop) = unterminated_at {
            self.plan.errors.push(Diagnostic {
                step_id: step_id.to_string(),
                message: format!("Unterminated array assignment for ${}", name),
                line: self.offset + stop,
            });
        }
        let items = classifier::split_array_literal(&parts.join(","));
        self.set_list(name, items);
    }

    fn function_call(
        &mut self,
        step_id: &str,
        target: &str,
        function: &str,
        args: CallArgs,
        i: usize,
    ) -> FunctionCall {
        let line = self.line_no(i);
        let simulated = self
            .options
            .fixtures
            .and_then(|f| f.lookup(function, args.reference.as_deref()))
            .cloned();

        match simulated {
            Some(ref value) => {
                self.plan
                    .variables
                    .insert(target.to_string(), value.clone());
            }
            None => {
                let reference = args
                    .reference
                    .as_deref()
                    .map(|r| format!(" {}", r))
                    .unwrap_or_default();
                self.warn(
                    step_id,
                    format!("No fixtures for {}{}; defaulting to []", function, reference),
                    line,
                    format!("Missing fixtures for {}", function),
                );
                self.plan
                    .variables
                    .insert(target.to_string(), Value::Array(Vec::new()));
            }
        }

        FunctionCall {
            step_id: step_id.to_string(),
            function_name: function.to_string(),
            target: target.to_string(),
            args,
            line,
            simulated_output: simulated,
        }
    }

    /// Look up the list a loop iterates; undefined or non-list sources
    /// iterate nothing.
    fn loop_source(&mut self, step_id: &str, list: &str, i: usize) -> Vec<Value> {
        match self.plan.variables.get(list) {
            Some(Value::Array(items)) => items.clone(),
            _ => {
                self.warn(
                    step_id,
                    format!("List variable ${} is not defined or not an array", list),
                    self.line_no(i),
                    format!("List variable ${} missing for for-each", list),
                );
                Vec::new()
            }
        }
    }

    /// Expand a loop body into assignment actions.
    fn unroll(
        &mut self,
        step: &mut OpenStep,
        iterator: &str,
        items: &[Value],
        bullets: &[(usize, String)],
    ) {
        for item in items {
            self.plan
                .variables
                .insert(iterator.to_string(), item.clone());
            for (idx, text) in bullets {
                let Some(token) = classifier::match_assignment(text) else {
                    // Output hints and other bullets document the loop only.
                    continue;
                };
                let id = self.substitute(token);
                step.actions
                    .push(assignment(&step.id, &id, self.line_no(*idx)));
            }
        }
    }

    /// `$name` tokens take the current value of `name`; undefined keeps the token.
    fn substitute(&self, token: &str) -> String {
        let Some(name) = token.strip_prefix('$') else {
            return token.to_string();
        };
        match self.plan.variables.get(name) {
            Some(Value::Null) | None => token.to_string(),
            Some(value) => value_to_string(value),
        }
    }

    /// Record a warning, plus an error in strict mode.
    fn warn(&mut self, step_id: &str, message: String, line: usize, strict_message: String) {
        self.plan.warnings.push(Diagnostic {
            step_id: step_id.to_string(),
            message,
            line,
        });
        if self.options.strict {
            self.plan.errors.push(Diagnostic {
                step_id: step_id.to_string(),
                message: strict_message,
                line,
            });
        }
    }
}

fn assignment(step_id: &str, id: &str, line: usize) -> Action {
    Action::Assignment(AssignmentAction {
        step_id: step_id.to_string(),
        assignment_id: id.to_string(),
        output_key: output_key(step_id, id),
        line,
    })
}
