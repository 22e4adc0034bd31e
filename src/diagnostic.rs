use std::fmt;

/// An assembler diagnostic (notice, warning, or error).
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: ErrorKind,
    pub message: String,
    /// Source file of the statement being executed, when known.
    pub file: Option<String>,
    pub line: u32,
    /// Scope chain at the point of the diagnostic, outermost first.
    pub scope: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Notice,
    Warning,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    UnterminatedBlock,
    InvalidIdentifier,
    DuplicateConstant,
    UnknownConstantAtWrite,
    UnknownMacro,
    ArityMismatch,
    InvalidExpression,
    DivisionByZero,
    IoFailure,
    NoMatchingPattern,
    OutOfRangeField,
    IncludeCycle,
    UnrecognizedDirective,
    FrameSpecifierMisuse,
    ConstantsDiverged,
    /// Raised by the `error` directive in source programs.
    UserError,
}

pub type Result<T> = std::result::Result<T, Diagnostic>;

impl Diagnostic {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            message: message.into(),
            file: None,
            line: 0,
            scope: Vec::new(),
        }
    }

    pub fn warning(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(kind, message)
        }
    }

    pub fn notice(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Notice,
            ..Self::error(ErrorKind::UserError, message)
        }
    }

    pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self
    }

    pub fn in_scope(mut self, scope: &[String]) -> Self {
        self.scope = scope.to_vec();
        self
    }

    /// Turn a warning into an error without losing its kind (strict mode).
    pub fn upgrade(mut self) -> Self {
        self.severity = Severity::Error;
        self
    }

    /// Render the diagnostic to stderr as a rich report against the
    /// retained source text. The span covers the offending line; the
    /// statement-stream model keeps no finer positions.
    pub fn render(&self, source: &str) {
        use ariadne::{Color, Label, Report, ReportKind, Source};

        let filename = self.file.as_deref().unwrap_or("<input>");
        let kind = match self.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
            Severity::Notice => ReportKind::Advice,
        };
        let color = match self.severity {
            Severity::Error => Color::Red,
            Severity::Warning => Color::Yellow,
            Severity::Notice => Color::Cyan,
        };

        let (start, end) = line_span(source, self.line);
        Report::build(kind, filename, start)
            .with_message(&self.message)
            .with_label(
                Label::new((filename, start..end))
                    .with_message(&self.message)
                    .with_color(color),
            )
            .finish()
            .eprint((filename, Source::from(source)))
            .ok();
    }
}

/// Byte range of a 1-based line within `source`.
fn line_span(source: &str, line: u32) -> (usize, usize) {
    let mut start = 0;
    let mut current = 1;
    for (offset, c) in source.char_indices() {
        if current == line.max(1) {
            let end = source[offset..]
                .find('\n')
                .map_or(source.len(), |n| offset + n);
            return (start, end);
        }
        if c == '\n' {
            current += 1;
            start = offset + 1;
        }
    }
    (start, source.len())
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(file) = &self.file {
            write!(f, "{}:{}: ", file, self.line)?;
        }
        match self.severity {
            Severity::Notice => write!(f, "notice: ")?,
            Severity::Warning => write!(f, "warning: ")?,
            Severity::Error => write!(f, "error: ")?,
        }
        write!(f, "{}", self.message)?;
        if !self.scope.is_empty() {
            write!(f, " [in scope {}]", self.scope.join("."))?;
        }
        Ok(())
    }
}
