use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::assembler::Assembler;
use crate::diagnostic::{Diagnostic, ErrorKind, Result};
use crate::program::Endian;

impl Assembler {
    /// Open the output file. `create` truncates; otherwise the file is
    /// opened read-write in place, which permits patching an existing
    /// image at arbitrary origins.
    pub fn target(&mut self, path: impl AsRef<Path>, create: bool) -> Result<()> {
        let path = path.as_ref();
        let file = if create {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
        } else {
            OpenOptions::new().read(true).write(true).open(path)
        };
        self.target_file = Some(file.map_err(|e| {
            Diagnostic::error(
                ErrorKind::IoFailure,
                format!("cannot open target file '{}': {e}", path.display()),
            )
        })?);
        Ok(())
    }

    /// Move the write cursor. Touches the file only during the write
    /// phase; earlier phases just track `origin`.
    pub(crate) fn seek(&mut self, offset: u64) -> Result<()> {
        if !self.phase.is_write() {
            return Ok(());
        }
        if let Some(file) = self.target_file.as_mut() {
            if let Err(e) = file.seek(SeekFrom::Start(offset)) {
                return Err(self.error(ErrorKind::IoFailure, format!("seek failed: {e}")));
            }
        }
        Ok(())
    }

    /// Emit the low `length` bytes of `data` in the active byte order and
    /// advance `origin`. Output is suppressed outside the write phase so
    /// the query passes still observe correct cursor movement.
    pub(crate) fn write(&mut self, data: u64, length: usize) -> Result<()> {
        if self.phase.is_write() {
            let endian = self.endian;
            if let Some(file) = self.target_file.as_mut() {
                let result = match endian {
                    Endian::Lsb => file.write_all(&data.to_le_bytes()[..length]),
                    Endian::Msb => file.write_all(&data.to_be_bytes()[8 - length..]),
                };
                if let Err(e) = result {
                    return Err(self.error(ErrorKind::IoFailure, format!("write failed: {e}")));
                }
            }
        }
        self.origin += length as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Phase;

    #[test]
    fn test_writes_only_in_write_phase() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let mut asm = Assembler::new();
        asm.target(&path, true).unwrap();

        asm.phase = Phase::Query;
        asm.write(0xaa, 1).unwrap();
        assert_eq!(asm.origin, 1);

        asm.phase = Phase::Write;
        asm.seek(0).unwrap();
        asm.origin = 0;
        asm.write(0xaa, 1).unwrap();
        assert_eq!(asm.origin, 1);

        drop(asm);
        assert_eq!(std::fs::read(&path).unwrap(), vec![0xaa]);
    }

    #[test]
    fn test_endian_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let mut asm = Assembler::new();
        asm.target(&path, true).unwrap();
        asm.phase = Phase::Write;

        asm.write(0x1234, 2).unwrap();
        asm.endian = Endian::Msb;
        asm.write(0x1234, 2).unwrap();
        asm.write(0x123456, 3).unwrap();

        drop(asm);
        assert_eq!(
            std::fs::read(&path).unwrap(),
            vec![0x34, 0x12, 0x12, 0x34, 0x12, 0x34, 0x56]
        );
    }

    #[test]
    fn test_modify_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut asm = Assembler::new();
        assert!(asm.target(dir.path().join("absent.bin"), false).is_err());
    }
}
