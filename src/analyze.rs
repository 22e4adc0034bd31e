use crate::assembler::Assembler;
use crate::diagnostic::{ErrorKind, Result};
use crate::program::matches;

/// An open block header during analysis.
#[derive(Clone, Debug)]
pub struct Block {
    pub ip: usize,
    pub kind: BlockKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Block,
    Scope,
    Macro,
    /// A label with a body: `name: {`, `- {`, `+ {`.
    Constant,
    If,
    While,
}

impl Assembler {
    /// Single pass over the program: rewrite block statements into their
    /// canonical closed forms and pre-link every control-flow jump. After
    /// this the block stack must be empty and every opener's `ip` points
    /// past its matching closer.
    pub(crate) fn analyze(&mut self) -> Result<()> {
        self.block_stack.clear();
        for index in 0..self.program.len() {
            self.active_instruction = Some(index);
            self.analyze_instruction(index)?;
        }
        if let Some(open) = self.block_stack.last() {
            self.active_instruction = Some(open.ip);
            return Err(self.error(ErrorKind::UnterminatedBlock, "{ without matching }"));
        }
        Ok(())
    }

    fn analyze_instruction(&mut self, index: usize) -> Result<()> {
        let s = self.program[index].statement.clone();

        if s == "{" {
            self.block_stack.push(Block {
                ip: index,
                kind: BlockKind::Block,
            });
            self.program[index].statement = "block {".into();
            return Ok(());
        }

        if s == "}" {
            let Some(open) = self.block_stack.pop() else {
                return Err(self.error(ErrorKind::UnterminatedBlock, "} without matching {"));
            };
            match open.kind {
                BlockKind::Block => self.program[index].statement = "} endblock".into(),
                BlockKind::Scope => self.program[index].statement = "} endscope".into(),
                BlockKind::Macro => {
                    // Let the executor skip the body on definition.
                    self.program[open.ip].ip = index + 1;
                    self.program[index].statement = "} endmacro".into();
                }
                BlockKind::Constant => self.program[index].statement = "} endconstant".into(),
                BlockKind::If => {
                    // Close the last link of the if/else chain.
                    self.program[open.ip].ip = index;
                    self.program[index].statement = "} endif".into();
                }
                BlockKind::While => {
                    self.program[open.ip].ip = index + 1;
                    self.program[index].statement = "} endwhile".into();
                    self.program[index].ip = open.ip;
                }
            }
            return Ok(());
        }

        if matches(&s, "scope ?* {") || s == "scope {" {
            self.block_stack.push(Block {
                ip: index,
                kind: BlockKind::Scope,
            });
            return Ok(());
        }

        if matches(&s, "macro ?*(*) {") || matches(&s, "global macro ?*(*) {") {
            self.block_stack.push(Block {
                ip: index,
                kind: BlockKind::Macro,
            });
            return Ok(());
        }

        if matches(&s, "?*: {") || s == "- {" || s == "+ {" {
            self.block_stack.push(Block {
                ip: index,
                kind: BlockKind::Constant,
            });
            return Ok(());
        }

        if matches(&s, "if ?* {") {
            self.block_stack.push(Block {
                ip: index,
                kind: BlockKind::If,
            });
            return Ok(());
        }

        if matches(&s, "} else if ?* {") || s == "} else {" {
            let Some(open) = self.block_stack.last_mut() else {
                return Err(self.error(ErrorKind::Syntax, "else without matching if"));
            };
            if open.kind != BlockKind::If {
                return Err(self.error(ErrorKind::Syntax, "else without matching if"));
            }
            // Chain link: a failed predicate jumps here, a satisfied arm
            // jumps from here toward the endif.
            let previous = open.ip;
            open.ip = index;
            self.program[previous].ip = index;
            return Ok(());
        }

        if matches(&s, "while ?* {") {
            self.block_stack.push(Block {
                ip: index,
                kind: BlockKind::While,
            });
            return Ok(());
        }

        Ok(())
    }
}
