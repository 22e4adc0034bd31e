use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::diagnostic::{Diagnostic, ErrorKind, Result};
use crate::program::{Endian, Instruction, Phase};
use crate::symbols::StackFrame;
use crate::table::{Table, UserFunction};

/// Iteration cap for the query fix-point before the run is declared
/// divergent.
const MAX_QUERY_PASSES: u32 = 64;

/// A single assembler instance: program, symbol state, and target sink.
///
/// The driver runs the analyzed program once per phase. Analyze seeds the
/// constant table, Query iterates until every forward reference settles,
/// Write emits bytes. Instances are independent; there is no shared state.
pub struct Assembler {
    // program stream
    pub(crate) program: Vec<Instruction>,
    pub(crate) block_stack: Vec<crate::analyze::Block>,
    pub(crate) active_instruction: Option<usize>,
    pub(crate) source_filenames: Vec<String>,
    pub(crate) sources: Vec<String>,
    pub(crate) include_stack: Vec<PathBuf>,

    // symbol state
    pub(crate) stack_frame: Vec<StackFrame>,
    pub(crate) constants: HashMap<String, i64>,
    pub(crate) constant_names: HashSet<String>,
    pub(crate) unknown_reads: HashSet<String>,
    pub(crate) constants_changed: bool,
    pub(crate) scope: Vec<String>,
    pub(crate) terminal_defines: Vec<(String, String)>,
    pub(crate) terminal_constants: Vec<(String, String)>,

    // control flow
    pub(crate) if_stack: Vec<bool>,
    pub(crate) push_stack: Vec<i64>,
    pub(crate) ip: usize,
    pub(crate) phase: Phase,
    pub(crate) macro_invocation_counter: u32,
    pub(crate) last_label_counter: i64,
    pub(crate) next_label_counter: i64,

    // output sink
    pub(crate) target_file: Option<fs::File>,
    pub(crate) string_table: [i64; 256],
    pub(crate) endian: Endian,
    pub(crate) origin: u64,
    pub(crate) base: i64,

    // architecture table
    pub(crate) table: Option<Table>,
    pub(crate) user_functions: HashMap<String, UserFunction>,

    pub(crate) strict: bool,
    pub(crate) eval_depth: u32,
    pub(crate) warning_count: u32,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            program: Vec::new(),
            block_stack: Vec::new(),
            active_instruction: None,
            source_filenames: Vec::new(),
            sources: Vec::new(),
            include_stack: Vec::new(),
            stack_frame: vec![StackFrame::new(0, false)],
            constants: HashMap::new(),
            constant_names: HashSet::new(),
            unknown_reads: HashSet::new(),
            constants_changed: false,
            scope: Vec::new(),
            terminal_defines: Vec::new(),
            terminal_constants: Vec::new(),
            if_stack: Vec::new(),
            push_stack: Vec::new(),
            ip: 0,
            phase: Phase::Analyze,
            macro_invocation_counter: 0,
            last_label_counter: 1,
            next_label_counter: 1,
            target_file: None,
            string_table: identity_string_table(),
            endian: Endian::Lsb,
            origin: 0,
            base: 0,
            table: None,
            user_functions: HashMap::new(),
            strict: false,
            eval_depth: 0,
            warning_count: 0,
        }
    }

    /// Pre-seed a define, as from the terminal (`-d name[=value]`).
    /// Applied into the global frame at the start of every pass.
    pub fn define(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.terminal_defines.push((name.into(), value.into()));
    }

    /// Pre-seed a constant, as from the terminal (`-c name[=value]`).
    pub fn constant(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.terminal_constants.push((name.into(), value.into()));
    }

    /// Run all phases over the loaded program. On success the target file
    /// holds the assembled output; the first error aborts the run.
    pub fn assemble(&mut self, strict: bool) -> Result<()> {
        self.strict = strict;

        for (name, value) in self.terminal_constants.clone() {
            let value = crate::eval::parse_integer(&value).ok_or_else(|| {
                Diagnostic::error(
                    ErrorKind::InvalidExpression,
                    format!("invalid constant value: {value}"),
                )
            })?;
            self.constants.insert(name, value);
        }

        self.analyze()?;

        self.phase = Phase::Analyze;
        self.execute()?;

        let mut passes = 0;
        loop {
            self.phase = Phase::Query;
            self.execute()?;
            if self.settled() {
                break;
            }
            passes += 1;
            if passes >= MAX_QUERY_PASSES {
                return Err(Diagnostic::error(
                    ErrorKind::ConstantsDiverged,
                    "constants failed to converge; oscillating or divergent forward references",
                ));
            }
        }

        self.phase = Phase::Write;
        self.execute()?;
        Ok(())
    }

    /// A query pass has settled when no constant changed value and no
    /// name that was read while unknown has since become known. Demands
    /// that never resolve are left for the write phase to report.
    fn settled(&self) -> bool {
        if self.constants_changed {
            return false;
        }
        !self
            .unknown_reads
            .iter()
            .any(|name| self.constants.contains_key(name))
    }

    /// Logical program counter: origin displaced by the active base.
    pub fn pc(&self) -> i64 {
        self.origin as i64 + self.base
    }

    /// Warnings reported during the write pass.
    pub fn warnings(&self) -> u32 {
        self.warning_count
    }

    /// Directory of the source file that produced the active instruction,
    /// used to resolve `include`, `insert`, `output`, and `arch` paths.
    pub(crate) fn filepath(&self) -> PathBuf {
        let file = self
            .active_instruction
            .and_then(|i| self.program.get(i))
            .map(|i| i.file_number)
            .unwrap_or(0);
        Path::new(self.source_filenames.get(file).map_or("", |s| s.as_str()))
            .parent()
            .map_or_else(PathBuf::new, Path::to_path_buf)
    }

    /// Retained source text for a filename, for diagnostic rendering.
    pub fn source_text(&self, filename: &str) -> Option<&str> {
        self.source_filenames
            .iter()
            .position(|f| f == filename)
            .map(|n| self.sources[n].as_str())
    }

    /// Attach the active instruction's origin and the scope chain.
    pub(crate) fn locate(&self, mut diagnostic: Diagnostic) -> Diagnostic {
        if let Some(i) = self.active_instruction.and_then(|i| self.program.get(i)) {
            diagnostic = diagnostic.at(
                self.source_filenames
                    .get(i.file_number)
                    .map_or("<input>", |s| s.as_str()),
                i.line_number,
            );
        }
        diagnostic.in_scope(&self.scope)
    }

    pub(crate) fn error(&self, kind: ErrorKind, message: impl Into<String>) -> Diagnostic {
        self.locate(Diagnostic::error(kind, message))
    }

    /// Report a warning. Strict mode upgrades it to an error; otherwise it
    /// is printed during the write pass only, so repeated passes do not
    /// repeat the report.
    pub(crate) fn warn(&mut self, kind: ErrorKind, message: impl Into<String>) -> Result<()> {
        let diagnostic = self.locate(Diagnostic::warning(kind, message));
        if self.strict {
            return Err(diagnostic.upgrade());
        }
        if self.phase.is_write() {
            eprintln!("{diagnostic}");
            self.warning_count += 1;
        }
        Ok(())
    }

    pub(crate) fn notice(&self, message: impl Into<String>) {
        if self.phase.is_write() {
            eprintln!("{}", self.locate(Diagnostic::notice(message)));
        }
    }

    /// Unquote a string operand and apply the escape set
    /// `\s → ' \d → " \b → ; \n → newline \\ → \`.
    pub(crate) fn text(&mut self, s: &str) -> Result<String> {
        let inner = if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
            &s[1..s.len() - 1]
        } else {
            self.warn(
                ErrorKind::Syntax,
                format!("string value is unquoted: {s}"),
            )?;
            s
        };
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('s') => out.push('\''),
                Some('d') => out.push('"'),
                Some('b') => out.push(';'),
                Some('n') => out.push('\n'),
                Some('\\') => out.push('\\'),
                other => {
                    out.push('\\');
                    if let Some(o) = other {
                        out.push(o);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Value of a character literal `'c'` or `'\c'` with the same escape
    /// set as [`Assembler::text`]. Unrecognized forms warn and yield 0.
    pub(crate) fn character(&mut self, s: &str) -> Result<i64> {
        let bytes = s.as_bytes();
        if bytes.len() == 3 && bytes[0] == b'\'' && bytes[2] == b'\'' {
            return Ok(bytes[1] as i64);
        }
        if bytes.len() == 4 && bytes[0] == b'\'' && bytes[1] == b'\\' && bytes[3] == b'\'' {
            match bytes[2] {
                b's' => return Ok('\'' as i64),
                b'd' => return Ok('"' as i64),
                b'b' => return Ok(';' as i64),
                b'n' => return Ok('\n' as i64),
                b'\\' => return Ok('\\' as i64),
                _ => {}
            }
        }
        self.warn(
            ErrorKind::Syntax,
            format!("unrecognized character constant: {s}"),
        )?;
        Ok(0)
    }
}

pub(crate) fn identity_string_table() -> [i64; 256] {
    let mut table = [0i64; 256];
    for (n, entry) in table.iter_mut().enumerate() {
        *entry = n as i64;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pc_is_origin_plus_base() {
        let mut asm = Assembler::new();
        asm.origin = 0x100;
        asm.base = 0x8000 - 0x100;
        assert_eq!(asm.pc(), 0x8000);
    }

    #[test]
    fn test_text_escapes() {
        let mut asm = Assembler::new();
        assert_eq!(asm.text("\"a\\nb\"").unwrap(), "a\nb");
        assert_eq!(asm.text("\"\\s\\d\\b\"").unwrap(), "'\";");
        assert_eq!(asm.text("\"back\\\\slash\"").unwrap(), "back\\slash");
    }

    #[test]
    fn test_character_literals() {
        let mut asm = Assembler::new();
        assert_eq!(asm.character("'A'").unwrap(), 65);
        assert_eq!(asm.character("'\\n'").unwrap(), 10);
        assert_eq!(asm.character("'\\s'").unwrap(), 39);
        assert_eq!(asm.character("'??'").unwrap(), 0);
    }

    #[test]
    fn test_string_table_identity() {
        let asm = Assembler::new();
        assert_eq!(asm.string_table[0], 0);
        assert_eq!(asm.string_table[65], 65);
        assert_eq!(asm.string_table[255], 255);
    }
}
