use std::fs;

use crate::assembler::Assembler;
use crate::diagnostic::{ErrorKind, Result};
use crate::eval::Evaluation;
use crate::program::{matches, split_operands, Endian};

impl Assembler {
    /// Core directive dispatch, tried after the executor's own control
    /// flow and before the architecture table. Returns false when the
    /// statement is not a core directive.
    pub(crate) fn assemble_statement(&mut self, s: &str) -> Result<bool> {
        if s == "block {" || s == "} endblock" {
            return Ok(true);
        }

        // constant name(value)
        if matches(s, "constant ?*(*)") {
            let t = &s["constant ".len()..s.len() - 1];
            let Some((name, value)) = t.split_once('(') else {
                return Err(self.error(ErrorKind::Syntax, format!("malformed constant: {s}")));
            };
            let (name, value) = (name.to_string(), value.to_string());
            let value = self.evaluate(&value, Evaluation::Default)?;
            self.set_constant(&name, value)?;
            return Ok(true);
        }

        // scope name { / scope name: { / scope {
        if matches(s, "scope ?* {") || s == "scope {" {
            let name = s["scope ".len()..].trim_end_matches('{').trim();
            let mut name = name.to_string();
            if let Some(label) = name.strip_suffix(':') {
                let label = label.to_string();
                let pc = self.pc();
                self.set_constant(&label, pc)?;
                name = label;
            }
            if !name.is_empty() {
                self.validate_name(&name, false)?;
            }
            self.scope.push(name);
            return Ok(true);
        }

        if s == "} endscope" {
            self.scope.pop();
            return Ok(true);
        }

        // label: / label: {
        if matches(s, "?*:") || matches(s, "?*: {") {
            let t = s.strip_suffix(" {").unwrap_or(s);
            if let Some(name) = t.strip_suffix(':') {
                let name = name.to_string();
                let pc = self.pc();
                self.set_constant(&name, pc)?;
                return Ok(true);
            }
        }

        // anonymous backward label
        if s == "-" || s == "- {" {
            let name = format!("lastLabel#{}", self.last_label_counter);
            self.last_label_counter += 1;
            let pc = self.pc();
            self.set_constant(&name, pc)?;
            return Ok(true);
        }

        // anonymous forward label
        if s == "+" || s == "+ {" {
            let name = format!("nextLabel#{}", self.next_label_counter);
            self.next_label_counter += 1;
            let pc = self.pc();
            self.set_constant(&name, pc)?;
            return Ok(true);
        }

        if s == "} endconstant" {
            return Ok(true);
        }

        // output "filename" [, create]
        if matches(s, "output ?*") {
            let mut p = split_operands(&s["output ".len()..]);
            if p.is_empty() || !matches(&p[0], "\"*\"") {
                return Err(self.error(ErrorKind::Syntax, "missing filename"));
            }
            let quoted = p.remove(0);
            let filename = quoted[1..quoted.len() - 1].to_string();
            let create = p.first().is_some_and(|t| t == "create");
            let path = self.filepath().join(filename);
            self.target(path, create)?;
            return Ok(true);
        }

        // arch name / arch none
        if matches(s, "arch ?*") {
            let name = s["arch ".len()..].trim().to_string();
            if name == "none" {
                self.table = None;
                self.user_functions.clear();
            } else {
                self.arch_load(&name)?;
            }
            return Ok(true);
        }

        // endian (lsb|msb)
        if matches(s, "endian ?*") {
            match &s["endian ".len()..] {
                "lsb" => self.endian = Endian::Lsb,
                "msb" => self.endian = Endian::Msb,
                _ => return Err(self.error(ErrorKind::Syntax, "invalid endian mode")),
            }
            return Ok(true);
        }

        // origin offset
        if matches(s, "origin ?*") {
            let expr = s["origin ".len()..].to_string();
            self.origin = self.evaluate(&expr, Evaluation::Default)? as u64;
            let origin = self.origin;
            self.seek(origin)?;
            return Ok(true);
        }

        // base offset
        if matches(s, "base ?*") {
            let expr = s["base ".len()..].to_string();
            self.base = self.evaluate(&expr, Evaluation::Default)? - self.origin as i64;
            return Ok(true);
        }

        // push (origin|base|pc), ...
        if matches(s, "push ?*") {
            for t in split_operands(&s["push ".len()..]) {
                match t.as_str() {
                    "origin" => self.push_stack.push(self.origin as i64),
                    "base" => self.push_stack.push(self.base),
                    "pc" => {
                        self.push_stack.push(self.origin as i64);
                        self.push_stack.push(self.base);
                    }
                    _ => {
                        return Err(self.error(
                            ErrorKind::Syntax,
                            format!("unrecognized push variable: {t}"),
                        ))
                    }
                }
            }
            return Ok(true);
        }

        // pull (origin|base|pc), ...
        if matches(s, "pull ?*") {
            for t in split_operands(&s["pull ".len()..]) {
                match t.as_str() {
                    "origin" => {
                        self.origin = self.pull_value()? as u64;
                        let origin = self.origin;
                        self.seek(origin)?;
                    }
                    "base" => self.base = self.pull_value()?,
                    "pc" => {
                        // base was pushed last, so it is restored first
                        self.base = self.pull_value()?;
                        self.origin = self.pull_value()? as u64;
                        let origin = self.origin;
                        self.seek(origin)?;
                    }
                    _ => {
                        return Err(self.error(
                            ErrorKind::Syntax,
                            format!("unrecognized pull variable: {t}"),
                        ))
                    }
                }
            }
            return Ok(true);
        }

        // insert [name, ] "filename" [, offset] [, length]
        if matches(s, "insert ?*") {
            return self.insert(&s["insert ".len()..]).map(|()| true);
        }

        // fill length [, with]
        if matches(s, "fill ?*") {
            let p = split_operands(&s["fill ".len()..]);
            if p.is_empty() {
                return Err(self.error(ErrorKind::Syntax, "missing fill length"));
            }
            let length = self.evaluate(&p[0], Evaluation::Default)?.max(0);
            let byte = match p.get(1) {
                Some(b) => self.evaluate(b, Evaluation::Default)?,
                None => 0,
            };
            for _ in 0..length {
                self.write(byte as u64, 1)?;
            }
            return Ok(true);
        }

        // map index [, value] [, length]
        if matches(s, "map ?*") {
            let p = split_operands(&s["map ".len()..]);
            if p.is_empty() {
                return Err(self.error(ErrorKind::Syntax, "missing map index"));
            }
            let index = (self.evaluate(&p[0], Evaluation::Default)? & 0xff) as usize;
            let value = match p.get(1) {
                Some(v) => self.evaluate(v, Evaluation::Default)?,
                None => 0,
            };
            let length = match p.get(2) {
                Some(l) => self.evaluate(l, Evaluation::Default)?.max(0),
                None => 1,
            };
            for n in 0..length {
                let slot = index + n as usize;
                if slot > 255 {
                    break;
                }
                self.string_table[slot] = value + n;
            }
            return Ok(true);
        }

        // d[bwldq] ("string"|expression) [, ...]
        let unit = match s.get(..3) {
            Some("db ") => 1,
            Some("dw ") => 2,
            Some("dl ") => 3,
            Some("dd ") => 4,
            Some("dq ") => 8,
            _ => 0,
        };
        if unit > 0 {
            for t in split_operands(&s[3..]) {
                if matches(&t, "\"*\"") {
                    let text = self.text(&t)?;
                    for b in text.bytes() {
                        let value = self.string_table[b as usize];
                        self.write(value as u64, unit)?;
                    }
                } else {
                    let value = self.evaluate(&t, Evaluation::Default)?;
                    self.write(value as u64, unit)?;
                }
            }
            return Ok(true);
        }

        // print ("string"|expression) [, ...]
        if matches(s, "print ?*") {
            if self.phase.is_write() {
                for t in split_operands(&s["print ".len()..]) {
                    if matches(&t, "\"*\"") {
                        eprint!("{}", self.text(&t)?);
                    } else {
                        let value = self.evaluate(&t, Evaluation::Default)?;
                        eprint!("{value}");
                    }
                }
            }
            return Ok(true);
        }

        if matches(s, "notice \"*\"") {
            if self.phase.is_write() {
                let text = self.text(&s["notice ".len()..])?;
                self.notice(text);
            }
            return Ok(true);
        }

        if matches(s, "warning \"*\"") {
            if self.phase.is_write() {
                let text = self.text(&s["warning ".len()..])?;
                self.warn(ErrorKind::UserError, text)?;
            }
            return Ok(true);
        }

        if matches(s, "error \"*\"") {
            if self.phase.is_write() {
                let text = self.text(&s["error ".len()..])?;
                return Err(self.error(ErrorKind::UserError, text));
            }
            return Ok(true);
        }

        Ok(false)
    }

    fn pull_value(&mut self) -> Result<i64> {
        self.push_stack
            .pop()
            .ok_or_else(|| self.error(ErrorKind::Syntax, "pull without matching push"))
    }

    fn insert(&mut self, operands: &str) -> Result<()> {
        let mut p = split_operands(operands);
        let mut name = None;
        if p.first().is_some_and(|t| !matches(t, "\"*\"")) {
            name = Some(p.remove(0));
        }
        if p.is_empty() || !matches(&p[0], "\"*\"") {
            return Err(self.error(ErrorKind::Syntax, "missing filename"));
        }
        let quoted = p.remove(0);
        let filename = quoted[1..quoted.len() - 1].to_string();
        let path = self.filepath().join(filename);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(_) => {
                return Err(self.error(
                    ErrorKind::IoFailure,
                    format!("file not found: {}", path.display()),
                ))
            }
        };

        let mut offset = if p.is_empty() {
            0
        } else {
            self.evaluate(&p.remove(0), Evaluation::Default)?.max(0) as usize
        };
        offset = offset.min(data.len());
        let mut length = if p.is_empty() {
            0
        } else {
            self.evaluate(&p.remove(0), Evaluation::Default)?.max(0) as usize
        };
        if length == 0 {
            length = data.len() - offset;
        }
        length = length.min(data.len() - offset);

        if let Some(name) = name {
            let pc = self.pc();
            self.set_constant(&name, pc)?;
            self.set_constant(&format!("{name}.size"), length as i64)?;
        }
        for &byte in &data[offset..offset + length] {
            self.write(byte as u64, 1)?;
        }
        Ok(())
    }
}
