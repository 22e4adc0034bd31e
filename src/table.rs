use std::fs;
use std::path::PathBuf;

use crate::assembler::Assembler;
use crate::diagnostic::{ErrorKind, Result};
use crate::eval::{parse_expression, Evaluation};
use crate::symbols::StackFrame;

/// The active architecture: an ordered list of instruction patterns.
/// Selection is first-match-wins in declaration order.
#[derive(Clone, Debug)]
pub struct Table {
    pub name: String,
    pub patterns: Vec<Pattern>,
}

/// One instruction pattern: a mnemonic template with operand slots and
/// the encoder lines that emit its bytes.
#[derive(Clone, Debug)]
pub struct Pattern {
    pub template: String,
    pub encoders: Vec<Encoder>,
}

#[derive(Clone, Debug)]
pub enum Encoder {
    /// `db|dw|dl|dd|dq expr[, expr ...]`: fixed-width emission.
    Data { unit: usize, exprs: Vec<String> },
    /// `%width = expr`: append a bit field to the composite word.
    Bits { width: u32, expr: String },
}

/// A function registered by an architecture table, first-class in the
/// expression evaluator.
#[derive(Clone, Debug)]
pub struct UserFunction {
    pub parameters: Vec<String>,
    pub body: String,
}

impl Assembler {
    /// Load `<name>.arch` relative to the active source file (or its
    /// `arch/` sibling directory) and make it the active table.
    pub(crate) fn arch_load(&mut self, name: &str) -> Result<()> {
        let path = self.arch_locate(name).ok_or_else(|| {
            self.error(
                ErrorKind::IoFailure,
                format!("architecture table not found: {name}"),
            )
        })?;
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                return Err(self.error(
                    ErrorKind::IoFailure,
                    format!("cannot read architecture table '{}': {e}", path.display()),
                ))
            }
        };

        self.user_functions.clear();
        let mut patterns: Vec<Pattern> = Vec::new();
        for raw in text.lines() {
            let line = strip_comment(raw);
            if line.trim().is_empty() {
                continue;
            }
            let indented = line.starts_with(' ') || line.starts_with('\t');
            let line = line.trim();

            if indented {
                let Some(pattern) = patterns.last_mut() else {
                    return Err(self.error(
                        ErrorKind::Syntax,
                        format!("encoder line before any pattern: {line}"),
                    ));
                };
                let Some(encoder) = parse_encoder(line) else {
                    return Err(self.error(
                        ErrorKind::Syntax,
                        format!("unrecognized encoder line: {line}"),
                    ));
                };
                pattern.encoders.push(encoder);
                continue;
            }

            if let Some(rest) = line.strip_prefix("function ") {
                let Some((key, function)) = parse_function(rest) else {
                    return Err(self.error(
                        ErrorKind::Syntax,
                        format!("malformed function: {line}"),
                    ));
                };
                self.user_functions.insert(key, function);
                continue;
            }

            if let Some(rest) = line.strip_prefix("constant ") {
                let Some((cname, value)) = rest
                    .strip_suffix(')')
                    .and_then(|t| t.split_once('('))
                else {
                    return Err(self.error(
                        ErrorKind::Syntax,
                        format!("malformed constant: {line}"),
                    ));
                };
                let (cname, value) = (cname.to_string(), value.to_string());
                let value = self.evaluate(&value, Evaluation::Default)?;
                self.set_constant(&cname, value)?;
                continue;
            }

            patterns.push(Pattern {
                template: canonical(line),
                encoders: Vec::new(),
            });
        }

        self.table = Some(Table {
            name: name.to_string(),
            patterns,
        });
        Ok(())
    }

    fn arch_locate(&self, name: &str) -> Option<PathBuf> {
        let dir = self.filepath();
        let mut candidates = vec![dir.join(name)];
        if !name.contains('.') {
            candidates.push(dir.join(format!("{name}.arch")));
        }
        candidates.push(dir.join("arch").join(name));
        if !name.contains('.') {
            candidates.push(dir.join("arch").join(format!("{name}.arch")));
        }
        candidates.into_iter().find(|c| c.is_file())
    }

    /// Try the statement against the active table. Returns false when no
    /// table is loaded or no pattern matches; encoder failures are hard
    /// errors, not fall-through.
    pub(crate) fn table_assemble(&mut self, s: &str) -> Result<bool> {
        let found = {
            let Some(table) = self.table.as_ref() else {
                return Ok(false);
            };
            let statement = canonical(s);
            let mut found = None;
            for pattern in &table.patterns {
                let mut captures = Vec::new();
                if match_template(
                    pattern.template.as_bytes(),
                    statement.as_bytes(),
                    &mut captures,
                ) && captures
                    .iter()
                    .all(|(kind, text)| *kind != b'%' || parse_expression(text).is_ok())
                {
                    found = Some((pattern.encoders.clone(), captures));
                    break;
                }
            }
            found
        };
        let Some((encoders, captures)) = found else {
            return Ok(false);
        };

        self.stack_frame.push(StackFrame::new(self.ip, false));
        let result = self.encode(&encoders, &captures);
        self.stack_frame.pop();
        result.map(|()| true)
    }

    /// Bind operand slots as `op1`..`opN`, then run the encoder lines.
    /// Bit fields accumulate MSB-first and flush as one endian-ordered
    /// word at a data line or at the end of the block.
    fn encode(&mut self, encoders: &[Encoder], captures: &[(u8, String)]) -> Result<()> {
        for (n, (_, text)) in captures.iter().enumerate() {
            let value = self.evaluate(text, Evaluation::Default)?;
            self.set_variable(&format!("op{}", n + 1), value, true)?;
        }

        let mut accumulator: u64 = 0;
        let mut bits: u32 = 0;
        for encoder in encoders {
            match encoder {
                Encoder::Data { unit, exprs } => {
                    self.flush_bits(&mut accumulator, &mut bits)?;
                    for expr in exprs {
                        let value = self.evaluate(expr, Evaluation::Default)?;
                        self.write(value as u64, *unit)?;
                    }
                }
                Encoder::Bits { width, expr } => {
                    let value = self.evaluate(expr, Evaluation::Default)?;
                    if !field_fits(value, *width) {
                        self.warn(
                            ErrorKind::OutOfRangeField,
                            format!("value {value} does not fit in a {width}-bit field"),
                        )?;
                    }
                    if bits + width > 64 {
                        return Err(self.error(
                            ErrorKind::Syntax,
                            "bit fields exceed 64 bits in one word",
                        ));
                    }
                    let mask = if *width >= 64 {
                        u64::MAX
                    } else {
                        (1u64 << width) - 1
                    };
                    accumulator = (accumulator << width) | (value as u64 & mask);
                    bits += width;
                }
            }
        }
        self.flush_bits(&mut accumulator, &mut bits)
    }

    fn flush_bits(&mut self, accumulator: &mut u64, bits: &mut u32) -> Result<()> {
        if *bits == 0 {
            return Ok(());
        }
        if *bits % 8 != 0 {
            return Err(self.error(
                ErrorKind::Syntax,
                format!("bit fields total {bits} bits; not byte aligned"),
            ));
        }
        self.write(*accumulator, (*bits / 8) as usize)?;
        *accumulator = 0;
        *bits = 0;
        Ok(())
    }
}

/// `value` representable in `width` bits, as an unsigned field or a
/// two's-complement negative.
fn field_fits(value: i64, width: u32) -> bool {
    if width >= 64 {
        return true;
    }
    value >= -(1i64 << (width - 1)) && value < (1i64 << width)
}

/// Strip a `#` comment, honoring single and double quotes.
fn strip_comment(line: &str) -> &str {
    let mut double = false;
    let mut single = false;
    for (n, c) in line.char_indices() {
        match c {
            '"' if !single => double = !double,
            '\'' if !double => single = !single,
            '#' if !double && !single => return &line[..n],
            _ => {}
        }
    }
    line
}

/// Normalize a template or statement for matching: collapse whitespace
/// and drop spaces that touch commas or parentheses, so patterns are
/// spacing-tolerant.
fn canonical(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending = false;
    for c in s.trim().chars() {
        if c.is_whitespace() {
            pending = true;
            continue;
        }
        if pending {
            let prev = out.chars().last();
            if !matches!(prev, Some('(') | Some(',')) && !matches!(c, ')' | ',') {
                out.push(' ');
            }
            pending = false;
        }
        out.push(c);
    }
    out
}

/// Match a canonicalized statement against a template. `*` and `%`
/// capture a non-empty balanced operand; everything else is literal.
fn match_template(template: &[u8], statement: &[u8], captures: &mut Vec<(u8, String)>) -> bool {
    match template.first() {
        None => statement.is_empty(),
        Some(&slot @ (b'*' | b'%')) => {
            for end in 1..=statement.len() {
                let capture = &statement[..end];
                if !balanced(capture) {
                    continue;
                }
                captures.push((slot, String::from_utf8_lossy(capture).into_owned()));
                if match_template(&template[1..], &statement[end..], captures) {
                    return true;
                }
                captures.pop();
            }
            false
        }
        Some(&c) => {
            statement.first() == Some(&c)
                && match_template(&template[1..], &statement[1..], captures)
        }
    }
}

/// Parentheses balanced and quotes closed; a capture may not split a
/// nested operand.
fn balanced(text: &[u8]) -> bool {
    let mut depth = 0i32;
    let mut double = false;
    let mut single = false;
    for &b in text {
        match b {
            b'"' if !single => double = !double,
            b'\'' if !double => single = !single,
            b'(' if !double && !single => depth += 1,
            b')' if !double && !single => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0 && !double && !single
}

fn parse_encoder(line: &str) -> Option<Encoder> {
    let unit = match line.get(..3) {
        Some("db ") => 1,
        Some("dw ") => 2,
        Some("dl ") => 3,
        Some("dd ") => 4,
        Some("dq ") => 8,
        _ => 0,
    };
    if unit > 0 {
        let exprs = crate::program::split_operands(&line[3..]);
        if exprs.is_empty() || exprs.iter().any(String::is_empty) {
            return None;
        }
        return Some(Encoder::Data { unit, exprs });
    }

    let rest = line.strip_prefix('%')?;
    let (width, expr) = rest.split_once('=')?;
    let width: u32 = width.trim().parse().ok()?;
    if !(1..=64).contains(&width) || expr.trim().is_empty() {
        return None;
    }
    Some(Encoder::Bits {
        width,
        expr: expr.trim().to_string(),
    })
}

/// `name(a, b) = expr` → (`name:2`, function).
fn parse_function(rest: &str) -> Option<(String, UserFunction)> {
    let (head, body) = rest.split_once('=')?;
    let head = head.trim().strip_suffix(')')?;
    let (name, parameters) = head.split_once('(')?;
    let parameters: Vec<String> = if parameters.trim().is_empty() {
        Vec::new()
    } else {
        crate::program::split_operands(parameters)
    };
    let body = body.trim();
    if name.is_empty() || body.is_empty() {
        return None;
    }
    Some((
        format!("{}:{}", name.trim(), parameters.len()),
        UserFunction {
            parameters,
            body: body.to_string(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_spacing() {
        assert_eq!(canonical("  lda   #%"), "lda #%");
        assert_eq!(canonical("ld *, *"), "ld *,*");
        assert_eq!(canonical("ld a , b"), "ld a,b");
        assert_eq!(canonical("nop"), "nop");
    }

    #[test]
    fn test_match_template_literals_and_slots() {
        let mut caps = Vec::new();
        assert!(match_template(b"nop", b"nop", &mut caps));
        assert!(caps.is_empty());

        let mut caps = Vec::new();
        assert!(match_template(b"lda #%", b"lda #$42", &mut caps));
        assert_eq!(caps, vec![(b'%', "$42".to_string())]);

        let mut caps = Vec::new();
        assert!(match_template(b"ld *,*", b"ld (x+1),y", &mut caps));
        assert_eq!(
            caps,
            vec![(b'*', "(x+1)".to_string()), (b'*', "y".to_string())]
        );

        let mut caps = Vec::new();
        assert!(!match_template(b"lda #%", b"ldx #$42", &mut caps));
    }

    #[test]
    fn test_captures_stay_balanced() {
        let mut caps = Vec::new();
        assert!(match_template(b"f(*)", b"f(g(1),2)", &mut caps));
        assert_eq!(caps, vec![(b'*', "g(1),2".to_string())]);
    }

    #[test]
    fn test_field_fits() {
        assert!(field_fits(255, 8));
        assert!(!field_fits(256, 8));
        assert!(field_fits(-128, 8));
        assert!(!field_fits(-129, 8));
        assert!(field_fits(i64::MAX, 64));
    }

    #[test]
    fn test_strip_comment() {
        assert_eq!(strip_comment("nop # no operation"), "nop ");
        assert_eq!(strip_comment("db '#'"), "db '#'");
        assert_eq!(strip_comment("plain"), "plain");
    }

    #[test]
    fn test_parse_encoder() {
        assert!(matches!(
            parse_encoder("db $a9, op1"),
            Some(Encoder::Data { unit: 1, .. })
        ));
        assert!(matches!(
            parse_encoder("dw op1 + 1"),
            Some(Encoder::Data { unit: 2, .. })
        ));
        assert!(matches!(
            parse_encoder("%4 = 2"),
            Some(Encoder::Bits { width: 4, .. })
        ));
        assert!(parse_encoder("%0 = 2").is_none());
        assert!(parse_encoder("junk").is_none());
    }

    #[test]
    fn test_parse_function() {
        let (key, f) = parse_function("reg(r) = r & 7").unwrap();
        assert_eq!(key, "reg:1");
        assert_eq!(f.parameters, vec!["r"]);
        assert_eq!(f.body, "r & 7");
    }
}
