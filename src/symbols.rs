use std::collections::HashMap;

use crate::assembler::Assembler;
use crate::diagnostic::{ErrorKind, Result};

/// A macro body: parameter declarations, entry point, and whether the
/// invocation pushes the macro's name onto the scope stack.
#[derive(Clone, Debug)]
pub struct Macro {
    pub parameters: Vec<String>,
    pub ip: usize,
    pub scoped: bool,
}

/// One macro invocation's private symbol tables plus its return address.
/// The frame at index 0 is the global frame.
#[derive(Clone, Debug, Default)]
pub struct StackFrame {
    pub ip: usize,
    pub scoped: bool,
    pub macros: HashMap<String, Macro>,
    pub defines: HashMap<String, String>,
    pub variables: HashMap<String, i64>,
}

impl StackFrame {
    pub fn new(ip: usize, scoped: bool) -> Self {
        Self {
            ip,
            scoped,
            ..Self::default()
        }
    }
}

impl Assembler {
    /// Fully qualified storage key for `name` under the current scope.
    /// A `::` prefix pins the name to the root scope.
    pub(crate) fn qualify(&self, name: &str) -> String {
        if let Some(root) = name.strip_prefix("::") {
            return root.to_string();
        }
        if self.scope.is_empty() {
            return name.to_string();
        }
        format!("{}.{}", self.scope.join("."), name)
    }

    /// Lookup candidates for `name`, innermost scope first, bare name
    /// last. Root-scoped names skip the walk entirely.
    pub(crate) fn scoped_candidates(&self, name: &str) -> Vec<String> {
        if let Some(root) = name.strip_prefix("::") {
            return vec![root.to_string()];
        }
        let mut out = Vec::with_capacity(self.scope.len() + 1);
        for n in (0..=self.scope.len()).rev() {
            if n == 0 {
                out.push(name.to_string());
            } else {
                out.push(format!("{}.{}", self.scope[..n].join("."), name));
            }
        }
        out
    }

    /// Frames to search: top first, then the global frame.
    fn search_frames(&self) -> impl Iterator<Item = &StackFrame> {
        let top = self.stack_frame.len() - 1;
        std::iter::once(&self.stack_frame[top])
            .chain((top != 0).then(|| &self.stack_frame[0]))
    }

    fn frame_mut(&mut self, local: bool) -> &mut StackFrame {
        let index = if local { self.stack_frame.len() - 1 } else { 0 };
        &mut self.stack_frame[index]
    }

    /// `[A-Za-z_#][A-Za-z0-9_.#]*`, optionally behind a `::` prefix.
    /// Violations are warnings, upgraded by strict mode.
    pub(crate) fn validate_name(&mut self, name: &str, allow_root: bool) -> Result<()> {
        let bare = if allow_root {
            name.strip_prefix("::").unwrap_or(name)
        } else {
            name
        };
        let mut chars = bare.chars();
        let valid = match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '#' => chars
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '#'),
            _ => false,
        };
        if !valid {
            return self.warn(
                ErrorKind::InvalidIdentifier,
                format!("invalid name: {name}"),
            );
        }
        Ok(())
    }

    // ─── Macros ──────────────────────────────────────────────────────

    pub(crate) fn set_macro(
        &mut self,
        name: &str,
        parameters: Vec<String>,
        ip: usize,
        scoped: bool,
        local: bool,
    ) -> Result<()> {
        self.validate_name(name, false)?;
        for parameter in &parameters {
            let pname = parameter.rsplit(' ').next().unwrap_or(parameter);
            self.validate_name(pname, false)?;
        }
        let key = format!("{}:{}", self.qualify(name), parameters.len());
        self.frame_mut(local).macros.insert(
            key,
            Macro {
                parameters,
                ip,
                scoped,
            },
        );
        Ok(())
    }

    pub(crate) fn find_macro(&self, name: &str, arity: usize) -> Option<Macro> {
        let candidates = self.scoped_candidates(name);
        for frame in self.search_frames() {
            for candidate in &candidates {
                if let Some(m) = frame.macros.get(&format!("{candidate}:{arity}")) {
                    return Some(m.clone());
                }
            }
        }
        None
    }

    /// True when some overload of `name` exists at any arity; used to
    /// tell an arity mismatch apart from an unknown statement.
    pub(crate) fn macro_exists(&self, name: &str) -> bool {
        let prefixes: Vec<String> = self
            .scoped_candidates(name)
            .into_iter()
            .map(|c| format!("{c}:"))
            .collect();
        self.search_frames().any(|frame| {
            frame
                .macros
                .keys()
                .any(|k| prefixes.iter().any(|p| k.starts_with(p.as_str())))
        })
    }

    // ─── Defines ─────────────────────────────────────────────────────

    pub(crate) fn set_define(&mut self, name: &str, value: &str, local: bool) -> Result<()> {
        self.validate_name(name, true)?;
        let key = self.qualify(name);
        self.frame_mut(local).defines.insert(key, value.to_string());
        Ok(())
    }

    pub(crate) fn find_define(&self, name: &str) -> Option<String> {
        let candidates = self.scoped_candidates(name);
        for frame in self.search_frames() {
            for candidate in &candidates {
                if let Some(v) = frame.defines.get(candidate) {
                    return Some(v.clone());
                }
            }
        }
        None
    }

    // ─── Variables ───────────────────────────────────────────────────

    pub(crate) fn set_variable(&mut self, name: &str, value: i64, local: bool) -> Result<()> {
        self.validate_name(name, true)?;
        let key = self.qualify(name);
        self.frame_mut(local).variables.insert(key, value);
        Ok(())
    }

    pub(crate) fn find_variable(&self, name: &str) -> Option<i64> {
        let candidates = self.scoped_candidates(name);
        for frame in self.search_frames() {
            for candidate in &candidates {
                if let Some(&v) = frame.variables.get(candidate) {
                    return Some(v);
                }
            }
        }
        None
    }

    // ─── Constants ───────────────────────────────────────────────────

    /// Bind a constant. Constants live in the global table and support
    /// forward declaration across passes, so the rules are phase-bound:
    /// a query pass rejects two bindings of different values to one name,
    /// and the write pass may neither introduce a name nor move one.
    pub(crate) fn set_constant(&mut self, name: &str, value: i64) -> Result<()> {
        self.validate_name(name, true)?;
        let key = self.qualify(name);

        if self.phase.is_write() {
            return match self.constants.get(&key) {
                Some(&v) if v == value => Ok(()),
                Some(&v) => Err(self.error(
                    ErrorKind::DuplicateConstant,
                    format!("constant {key} changed value in write phase ({v} -> {value})"),
                )),
                None => Err(self.error(
                    ErrorKind::DuplicateConstant,
                    format!("constant {key} first defined in write phase"),
                )),
            };
        }

        if !self.constant_names.insert(key.clone())
            && self.phase.is_query()
            && self.constants.get(&key) != Some(&value)
        {
            return Err(self.error(
                ErrorKind::DuplicateConstant,
                format!("constant cannot be modified: {key}"),
            ));
        }
        if self.constants.insert(key, value) != Some(value) {
            self.constants_changed = true;
        }
        Ok(())
    }

    pub(crate) fn find_constant(&self, name: &str) -> Option<i64> {
        self.scoped_candidates(name)
            .iter()
            .find_map(|candidate| self.constants.get(candidate).copied())
    }

    /// A lookup missed. During analyze/query this records demand and the
    /// caller substitutes zero; at write time the value is authoritative
    /// and the miss is fatal.
    pub(crate) fn constant_unknown(&mut self, name: &str) -> Result<i64> {
        if self.phase.is_write() {
            return Err(self.error(
                ErrorKind::UnknownConstantAtWrite,
                format!("constant value unknown at write phase: {}", self.qualify(name)),
            ));
        }
        for candidate in self.scoped_candidates(name) {
            self.unknown_reads.insert(candidate);
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Phase;

    fn asm() -> Assembler {
        Assembler::new()
    }

    #[test]
    fn test_qualify_with_scope() {
        let mut a = asm();
        assert_eq!(a.qualify("x"), "x");
        a.scope.push("outer".into());
        a.scope.push("inner".into());
        assert_eq!(a.qualify("x"), "outer.inner.x");
        assert_eq!(a.qualify("::x"), "x");
    }

    #[test]
    fn test_scope_walk_order() {
        let mut a = asm();
        a.scope = vec!["a".into(), "b".into()];
        assert_eq!(a.scoped_candidates("x"), vec!["a.b.x", "a.x", "x"]);
        assert_eq!(a.scoped_candidates("::x"), vec!["x"]);
    }

    #[test]
    fn test_define_shadowing_across_frames() {
        let mut a = asm();
        a.set_define("x", "global", true).unwrap();
        a.stack_frame.push(StackFrame::new(0, false));
        a.set_define("x", "local", true).unwrap();
        assert_eq!(a.find_define("x").as_deref(), Some("local"));
        a.stack_frame.pop();
        assert_eq!(a.find_define("x").as_deref(), Some("global"));
    }

    #[test]
    fn test_global_declaration_lands_in_frame_zero() {
        let mut a = asm();
        a.stack_frame.push(StackFrame::new(0, false));
        a.set_variable("v", 7, false).unwrap();
        a.stack_frame.pop();
        assert_eq!(a.find_variable("v"), Some(7));
    }

    #[test]
    fn test_macro_arity_overloading() {
        let mut a = asm();
        a.set_macro("foo", vec!["a".into()], 10, false, true).unwrap();
        a.set_macro("foo", vec!["a".into(), "b".into()], 20, false, true)
            .unwrap();
        assert_eq!(a.find_macro("foo", 1).unwrap().ip, 10);
        assert_eq!(a.find_macro("foo", 2).unwrap().ip, 20);
        assert!(a.find_macro("foo", 3).is_none());
        assert!(a.macro_exists("foo"));
        assert!(!a.macro_exists("bar"));
    }

    #[test]
    fn test_constant_scope_walk() {
        let mut a = asm();
        a.scope = vec!["s".into()];
        a.set_constant("x", 1).unwrap();
        assert_eq!(a.find_constant("x"), Some(1));
        assert_eq!(a.constants.get("s.x"), Some(&1));
        a.scope.clear();
        assert_eq!(a.find_constant("x"), None);
        assert_eq!(a.find_constant("s.x"), Some(1));
    }

    #[test]
    fn test_constant_redefinition_same_pass() {
        let mut a = asm();
        a.phase = Phase::Query;
        a.set_constant("x", 1).unwrap();
        assert!(a.set_constant("x", 2).is_err());
        // Re-binding the same value is tolerated.
        a.set_constant("x", 1).unwrap();
    }

    #[test]
    fn test_constant_fixed_at_write() {
        let mut a = asm();
        a.phase = Phase::Query;
        a.set_constant("x", 1).unwrap();
        a.phase = Phase::Write;
        a.set_constant("x", 1).unwrap();
        assert!(a.set_constant("x", 2).is_err());
        assert!(a.set_constant("fresh", 0).is_err());
    }

    #[test]
    fn test_unknown_read_records_demand() {
        let mut a = asm();
        a.phase = Phase::Query;
        a.scope = vec!["s".into()];
        assert_eq!(a.constant_unknown("x").unwrap(), 0);
        assert!(a.unknown_reads.contains("s.x"));
        assert!(a.unknown_reads.contains("x"));
        a.phase = Phase::Write;
        assert!(a.constant_unknown("x").is_err());
    }

    #[test]
    fn test_validate_name() {
        let mut a = asm();
        a.strict = true;
        assert!(a.validate_name("good_name.sub#1", true).is_ok());
        assert!(a.validate_name("#", true).is_ok());
        assert!(a.validate_name("::rooted", true).is_ok());
        assert!(a.validate_name("1bad", true).is_err());
        assert!(a.validate_name("", true).is_err());
        assert!(a.validate_name("::rooted", false).is_err());
    }
}
