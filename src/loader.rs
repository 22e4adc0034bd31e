use std::fs;
use std::path::{Path, PathBuf};

use crate::assembler::Assembler;
use crate::diagnostic::{Diagnostic, ErrorKind, Result};
use crate::program::{matches, Instruction};

impl Assembler {
    /// Load one root source file: strip comments, join continuations,
    /// split statements, splice `include`s, and append the result to the
    /// program stream. May be called more than once; the streams
    /// concatenate in call order.
    pub fn source(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.load_source(path.as_ref())
    }

    fn load_source(&mut self, path: &Path) -> Result<()> {
        let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if self.include_stack.contains(&canonical) {
            return Err(Diagnostic::error(
                ErrorKind::IncludeCycle,
                format!("include cycle through '{}'", path.display()),
            ));
        }

        let text = fs::read_to_string(path).map_err(|e| {
            Diagnostic::error(
                ErrorKind::IoFailure,
                format!("cannot open source file '{}': {e}", path.display()),
            )
        })?;

        let file_number = self.source_filenames.len();
        self.source_filenames.push(path.display().to_string());
        self.sources.push(text.clone());
        self.include_stack.push(canonical);

        let result = self.load_lines(&text, file_number, path);
        self.include_stack.pop();
        result
    }

    fn load_lines(&mut self, text: &str, file_number: usize, path: &Path) -> Result<()> {
        let lines: Vec<&str> = text.lines().collect();
        let mut n = 0;
        while n < lines.len() {
            let line_number = n as u32 + 1;
            let mut line = lines[n].to_string();

            // Explicit continuations: a trailing backslash joins the
            // next physical line onto this statement.
            while line.trim_end().ends_with('\\') && n + 1 < lines.len() {
                let end = line.trim_end().len() - 1;
                line.truncate(end);
                n += 1;
                line.push_str(lines[n]);
            }
            n += 1;

            for statement in split_statements(&line).map_err(|message| {
                Diagnostic::error(ErrorKind::Syntax, message)
                    .at(path.display().to_string(), line_number)
            })? {
                if matches(&statement, "include \"*\"") {
                    let name = statement["include \"".len()..statement.len() - 1].to_string();
                    let parent = path.parent().map_or_else(PathBuf::new, Path::to_path_buf);
                    self.load_source(&parent.join(name))?;
                } else {
                    self.program.push(Instruction {
                        statement,
                        ip: 0,
                        file_number,
                        line_number,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Split one logical line into statements: drop `//` comments, cut on
/// `;`, collapse whitespace runs, and detach inline block braces, all
/// of it outside double quotes. Empty statements are dropped.
///
/// A `{` that is delimited by whitespace on both sides closes the
/// statement it ends (`while n < 4 { db n` splits after the brace); a
/// whitespace-preceded `}` opens a fresh one. Braces hugging text, like
/// define references `{name}`, are left alone.
fn split_statements(line: &str) -> std::result::Result<Vec<String>, String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut pending_space = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if quoted {
            current.push(c);
            if c == '"' {
                quoted = false;
            }
            continue;
        }
        match c {
            '"' => {
                quoted = true;
                if pending_space && !current.is_empty() {
                    current.push(' ');
                }
                pending_space = false;
                current.push(c);
            }
            '/' if chars.peek() == Some(&'/') => break,
            ';' => {
                statements.push(std::mem::take(&mut current));
                pending_space = false;
            }
            '{' if (pending_space || current.is_empty())
                && chars.peek().map_or(true, |n| n.is_whitespace()) =>
            {
                if pending_space && !current.is_empty() {
                    current.push(' ');
                }
                current.push('{');
                statements.push(std::mem::take(&mut current));
                pending_space = false;
            }
            '}' if pending_space || current.is_empty() => {
                if !current.is_empty() {
                    statements.push(std::mem::take(&mut current));
                }
                current.push('}');
                pending_space = false;
            }
            c if c.is_whitespace() => pending_space = !current.is_empty(),
            _ => {
                if pending_space {
                    current.push(' ');
                    pending_space = false;
                }
                current.push(c);
            }
        }
    }
    if quoted {
        return Err("unterminated string".into());
    }
    statements.push(current);
    statements.retain(|s| !s.is_empty());
    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::Assembler;

    #[test]
    fn test_split_statements() {
        assert_eq!(
            split_statements("db 1; db 2 // trailing").unwrap(),
            vec!["db 1", "db 2"]
        );
        assert_eq!(
            split_statements("  db   1,   2  ").unwrap(),
            vec!["db 1, 2"]
        );
        assert_eq!(split_statements("// only a comment").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_split_statements_inline_blocks() {
        assert_eq!(
            split_statements("while n < 4 { db n; variable n(n+1) }").unwrap(),
            vec!["while n < 4 {", "db n", "variable n(n+1)", "}"]
        );
        assert_eq!(
            split_statements("if x { db 1 } else { db 2 }").unwrap(),
            vec!["if x {", "db 1", "} else {", "db 2", "}"]
        );
        assert_eq!(split_statements("{ db 1 }").unwrap(), vec!["{", "db 1", "}"]);
        // Define references hug their braces and are not block syntax.
        assert_eq!(
            split_statements("db {x}, {defined y}").unwrap(),
            vec!["db {x}, {defined y}"]
        );
        assert_eq!(split_statements("entry{#}:").unwrap(), vec!["entry{#}:"]);
    }

    #[test]
    fn test_split_statements_quotes() {
        assert_eq!(
            split_statements("print \"a; b // c\"; db 0").unwrap(),
            vec!["print \"a; b // c\"", "db 0"]
        );
        assert_eq!(
            split_statements("db \"two  spaces\"").unwrap(),
            vec!["db \"two  spaces\""]
        );
        assert!(split_statements("db \"open").is_err());
    }

    #[test]
    fn test_source_loading_and_includes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("inner.asm"), "db 2\n").unwrap();
        std::fs::write(
            dir.path().join("main.asm"),
            "db 1\ninclude \"inner.asm\"\ndb 3\n",
        )
        .unwrap();

        let mut asm = Assembler::new();
        asm.source(dir.path().join("main.asm")).unwrap();
        let statements: Vec<&str> = asm.program.iter().map(|i| i.statement.as_str()).collect();
        assert_eq!(statements, vec!["db 1", "db 2", "db 3"]);
        assert_eq!(asm.program[0].file_number, 0);
        assert_eq!(asm.program[1].file_number, 1);
        assert_eq!(asm.program[2].line_number, 3);
    }

    #[test]
    fn test_continuation_joins_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.asm"), "db 1, \\\n   2\n").unwrap();
        let mut asm = Assembler::new();
        asm.source(dir.path().join("main.asm")).unwrap();
        assert_eq!(asm.program[0].statement, "db 1, 2");
    }

    #[test]
    fn test_include_cycle_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.asm"), "include \"b.asm\"\n").unwrap();
        std::fs::write(dir.path().join("b.asm"), "include \"a.asm\"\n").unwrap();
        let mut asm = Assembler::new();
        let err = asm.source(dir.path().join("a.asm")).unwrap_err();
        assert_eq!(err.kind, crate::diagnostic::ErrorKind::IncludeCycle);
    }

    #[test]
    fn test_missing_file() {
        let mut asm = Assembler::new();
        let err = asm.source("/no/such/file.asm").unwrap_err();
        assert_eq!(err.kind, crate::diagnostic::ErrorKind::IoFailure);
    }
}
