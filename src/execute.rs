use crate::assembler::{identity_string_table, Assembler};
use crate::diagnostic::{ErrorKind, Result};
use crate::eval::Evaluation;
use crate::program::{matches, split_operands, Endian};
use crate::symbols::StackFrame;

/// A macro argument bound to its declared parameter kind, evaluated in
/// the caller's frame before the callee frame is pushed.
enum Binding {
    Define(String, String),
    Variable(String, i64),
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '#' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '#')
        }
        _ => false,
    }
}

impl Assembler {
    /// Run the analyzed program once under the current phase. Frame and
    /// cursor state is rebuilt from scratch so every pass observes the
    /// same initial conditions; only the constant table carries over.
    pub(crate) fn execute(&mut self) -> Result<()> {
        self.stack_frame.clear();
        self.stack_frame.push(StackFrame::new(0, false));
        self.if_stack.clear();
        self.ip = 0;
        self.macro_invocation_counter = 0;
        self.constant_names.clear();
        self.unknown_reads.clear();
        self.constants_changed = false;
        self.initialize();

        for (name, value) in self.terminal_defines.clone() {
            self.set_define(&name, &value, true)?;
        }
        self.seek(self.origin)?;

        while self.ip < self.program.len() {
            let index = self.ip;
            self.ip += 1;
            self.active_instruction = Some(index);
            self.execute_instruction(index)?;
        }
        Ok(())
    }

    fn initialize(&mut self) {
        self.push_stack.clear();
        self.scope.clear();
        self.string_table = identity_string_table();
        self.endian = Endian::Lsb;
        self.origin = 0;
        self.base = 0;
        self.last_label_counter = 1;
        self.next_label_counter = 1;
        self.table = None;
        self.user_functions.clear();
    }

    fn execute_instruction(&mut self, index: usize) -> Result<()> {
        let mut s = self.program[index].statement.clone();
        self.evaluate_defines(&mut s)?;
        let linked_ip = self.program[index].ip;

        // macro name(params) {  /  global macro name(params) {
        if matches(&s, "macro ?*(*) {") || matches(&s, "global macro ?*(*) {") {
            let local = !s.starts_with("global ");
            let t = s.strip_prefix("global ").unwrap_or(&s);
            let t = &t["macro ".len()..t.len() - ") {".len()];
            let Some((name, parameters)) = t.split_once('(') else {
                return Err(self.error(ErrorKind::Syntax, format!("malformed macro: {s}")));
            };
            let scoped = name.starts_with("scope ");
            let name = name.strip_prefix("scope ").unwrap_or(name).to_string();
            let parameters = if parameters.trim().is_empty() {
                Vec::new()
            } else {
                split_operands(parameters)
            };
            self.set_macro(&name, parameters, self.ip, scoped, local)?;
            self.ip = linked_ip;
            return Ok(());
        }

        if let Some((name, value, local)) = declaration(&s, "define ") {
            self.set_define(name, value, local)?;
            return Ok(());
        }

        if let Some((name, value, local)) = declaration(&s, "evaluate ") {
            let (name, value) = (name.to_string(), value.to_string());
            let value = self.evaluate(&value, Evaluation::Default)?;
            self.set_define(&name, &value.to_string(), local)?;
            return Ok(());
        }

        if let Some((name, value, local)) = declaration(&s, "variable ") {
            let (name, value) = (name.to_string(), value.to_string());
            let value = self.evaluate(&value, Evaluation::Default)?;
            self.set_variable(&name, value, local)?;
            return Ok(());
        }

        if matches(&s, "if ?* {") {
            let predicate = s["if ".len()..s.len() - " {".len()].to_string();
            let taken = self.evaluate(predicate.trim(), Evaluation::Strict)? != 0;
            self.if_stack.push(taken);
            if !taken {
                self.ip = linked_ip;
            }
            return Ok(());
        }

        if matches(&s, "} else if ?* {") {
            let Some(&taken_before) = self.if_stack.last() else {
                return Err(self.error(ErrorKind::Syntax, "else without matching if"));
            };
            if taken_before {
                self.ip = linked_ip;
            } else {
                let predicate = s["} else if ".len()..s.len() - " {".len()].to_string();
                let taken = self.evaluate(predicate.trim(), Evaluation::Strict)? != 0;
                if let Some(top) = self.if_stack.last_mut() {
                    *top = taken;
                }
                if !taken {
                    self.ip = linked_ip;
                }
            }
            return Ok(());
        }

        if s == "} else {" {
            let Some(top) = self.if_stack.last_mut() else {
                return Err(self.error(ErrorKind::Syntax, "else without matching if"));
            };
            if *top {
                self.ip = linked_ip;
            } else {
                *top = true;
            }
            return Ok(());
        }

        if s == "} endif" {
            self.if_stack.pop();
            return Ok(());
        }

        if matches(&s, "while ?* {") {
            let predicate = s["while ".len()..s.len() - " {".len()].to_string();
            if self.evaluate(predicate.trim(), Evaluation::Strict)? == 0 {
                self.ip = linked_ip;
            }
            return Ok(());
        }

        if s == "} endwhile" {
            self.ip = linked_ip;
            return Ok(());
        }

        // name(args): macro invocation with arity-overloaded dispatch
        if matches(&s, "?*(*)") {
            if let Some((name, arguments)) = s[..s.len() - 1].split_once('(') {
                if is_identifier(name) {
                    let name = name.to_string();
                    let arguments = if arguments.trim().is_empty() {
                        Vec::new()
                    } else {
                        split_operands(arguments)
                    };
                    if self.invoke_macro(&name, &arguments)? {
                        return Ok(());
                    }
                }
            }
        }

        if s == "} endmacro" {
            if self.stack_frame.len() <= 1 {
                return Err(self.error(ErrorKind::Syntax, "} endmacro outside of a macro"));
            }
            let Some(frame) = self.stack_frame.pop() else {
                return Err(self.error(ErrorKind::Syntax, "} endmacro outside of a macro"));
            };
            self.ip = frame.ip;
            if frame.scoped {
                self.scope.pop();
            }
            return Ok(());
        }

        if s.starts_with("global ") {
            return Err(self.error(
                ErrorKind::FrameSpecifierMisuse,
                format!("'global' applies only to declarations: {s}"),
            ));
        }

        if self.assemble_statement(&s)? {
            return Ok(());
        }

        if self.table_assemble(&s)? {
            return Ok(());
        }

        // Last resort: a bare expression (assignments are side effects).
        match self.evaluate(&s, Evaluation::Default) {
            Ok(_) => Ok(()),
            Err(e) => match e.kind {
                ErrorKind::InvalidExpression | ErrorKind::Syntax => {
                    if let Some(table) = &self.table {
                        let message =
                            format!("no matching pattern in '{}' for: {s}", table.name);
                        Err(self.error(ErrorKind::NoMatchingPattern, message))
                    } else {
                        Err(self.error(
                            ErrorKind::UnrecognizedDirective,
                            format!("unrecognized directive: {s}"),
                        ))
                    }
                }
                _ => Err(e),
            },
        }
    }

    /// Dispatch `name(arguments)` against the macro tables. Returns false
    /// when no overload exists at all, so the caller can try the
    /// directive assembler and the architecture table instead.
    fn invoke_macro(&mut self, name: &str, arguments: &[String]) -> Result<bool> {
        let Some(mac) = self.find_macro(name, arguments.len()) else {
            if self.macro_exists(name) {
                return Err(self.error(
                    ErrorKind::ArityMismatch,
                    format!(
                        "no overload of macro {name} takes {} argument(s)",
                        arguments.len()
                    ),
                ));
            }
            return Ok(false);
        };

        let mut bindings = Vec::with_capacity(arguments.len());
        for (parameter, argument) in mac.parameters.iter().zip(arguments) {
            let (kind, pname) = match parameter.split_once(' ') {
                Some((kind, pname)) => (kind.trim(), pname.trim()),
                None => ("define", parameter.as_str()),
            };
            let binding = match kind {
                "define" => Binding::Define(pname.to_string(), argument.clone()),
                "string" => Binding::Define(pname.to_string(), self.text(argument)?),
                "evaluate" => Binding::Define(
                    pname.to_string(),
                    self.evaluate(argument, Evaluation::Default)?.to_string(),
                ),
                "variable" => Binding::Variable(
                    pname.to_string(),
                    self.evaluate(argument, Evaluation::Default)?,
                ),
                other => {
                    return Err(self.error(
                        ErrorKind::Syntax,
                        format!("unsupported parameter type: {other}"),
                    ))
                }
            };
            bindings.push(binding);
        }

        self.stack_frame.push(StackFrame::new(self.ip, mac.scoped));
        if mac.scoped {
            self.scope.push(name.to_string());
        }
        let invocation = format!("_{}", self.macro_invocation_counter);
        self.macro_invocation_counter += 1;
        self.set_define("#", &invocation, true)?;
        for binding in bindings {
            match binding {
                Binding::Define(n, v) => self.set_define(&n, &v, true)?,
                Binding::Variable(n, v) => self.set_variable(&n, v, true)?,
            }
        }
        self.ip = mac.ip;
        Ok(true)
    }
}

/// Match `keyword name(value)` with an optional `global ` prefix,
/// returning `(name, value, local)`.
fn declaration<'a>(s: &'a str, keyword: &str) -> Option<(&'a str, &'a str, bool)> {
    let (t, local) = match s.strip_prefix("global ") {
        Some(rest) => (rest, false),
        None => (s, true),
    };
    let t = t.strip_prefix(keyword)?;
    let t = t.strip_suffix(')')?;
    let (name, value) = t.split_once('(')?;
    (!name.is_empty()).then_some((name, value, local))
}
