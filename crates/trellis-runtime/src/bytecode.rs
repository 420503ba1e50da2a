//! Bytecode instruction set and wire codec.
//!
//! Eleven opcodes drive navigation, content loading and page output.
//! The wire format is big-endian and length-prefixed throughout:
//! - Opcode: 2 bytes
//! - String section: `u8 count | (u8 len | bytes)*`
//! - Arg section: `u8 len | bytes`
//! - Flag section: `u8 count | bytes`
//!
//! Each opcode encodes only the sections its payload uses, in the fixed
//! order strings / arg / flags. Every instruction starts at a byte
//! boundary; the stream is a plain concatenation.

use crate::error::RuntimeError;

/// Instruction opcode.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Skip.
    Noop = 0x00,
    /// Replace navigation with a named node if a flag matches.
    Catch = 0x01,
    /// Abort the session if a flag matches.
    Croak = 0x02,
    /// Resolve a dynamic value into the cache.
    Load = 0x03,
    /// Re-resolve an already-loaded symbol.
    Reload = 0x04,
    /// Expose a loaded symbol to the renderer.
    Map = 0x05,
    /// Push a navigation frame.
    Move = 0x06,
    /// Stop execution; the caller renders.
    Halt = 0x07,
    /// Compare input against a pattern, moving on match.
    InCmp = 0x08,
    /// Declare the menu byte budget.
    MSize = 0x09,
    /// Emit a menu choice.
    MOut = 0x0a,
}

impl TryFrom<u16> for Opcode {
    type Error = RuntimeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Opcode::Noop),
            0x01 => Ok(Opcode::Catch),
            0x02 => Ok(Opcode::Croak),
            0x03 => Ok(Opcode::Load),
            0x04 => Ok(Opcode::Reload),
            0x05 => Ok(Opcode::Map),
            0x06 => Ok(Opcode::Move),
            0x07 => Ok(Opcode::Halt),
            0x08 => Ok(Opcode::InCmp),
            0x09 => Ok(Opcode::MSize),
            0x0a => Ok(Opcode::MOut),
            other => Err(RuntimeError::BadInstruction(other)),
        }
    }
}

impl Opcode {
    /// Assembly mnemonic for listings and logs.
    pub const fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Noop => "NOOP",
            Opcode::Catch => "CATCH",
            Opcode::Croak => "CROAK",
            Opcode::Load => "LOAD",
            Opcode::Reload => "RELOAD",
            Opcode::Map => "MAP",
            Opcode::Move => "MOVE",
            Opcode::Halt => "HALT",
            Opcode::InCmp => "INCMP",
            Opcode::MSize => "MSIZE",
            Opcode::MOut => "MOUT",
        }
    }
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    Noop,
    /// If flag `flag` equals `!invert`, replace the current navigation
    /// frame with `sym` and discard the rest of the buffer.
    Catch { sym: String, flag: u8, invert: bool },
    /// If flag `flag` equals `!invert`, terminate the session.
    Croak { flag: u8, invert: bool },
    /// Resolve `sym` and cache it under a declared byte budget
    /// (`size` 0 = unbounded, subject to the cache total).
    Load { sym: String, size: u16 },
    Reload { sym: String },
    Map { sym: String },
    Move { sym: String },
    Halt,
    /// If the input equals `pattern`, move to `target` and skip the
    /// remaining siblings through the next HALT.
    InCmp { pattern: String, target: String },
    MSize { size: u16 },
    MOut { selector: String, label: String },
}

impl Instr {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instr::Noop => Opcode::Noop,
            Instr::Catch { .. } => Opcode::Catch,
            Instr::Croak { .. } => Opcode::Croak,
            Instr::Load { .. } => Opcode::Load,
            Instr::Reload { .. } => Opcode::Reload,
            Instr::Map { .. } => Opcode::Map,
            Instr::Move { .. } => Opcode::Move,
            Instr::Halt => Opcode::Halt,
            Instr::InCmp { .. } => Opcode::InCmp,
            Instr::MSize { .. } => Opcode::MSize,
            Instr::MOut { .. } => Opcode::MOut,
        }
    }

    /// Encode this instruction alone.
    pub fn encode(&self) -> Result<Vec<u8>, RuntimeError> {
        let mut buf = Vec::new();
        append(&mut buf, self)?;
        Ok(buf)
    }
}

// ===== Writer =====

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_counted(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<(), RuntimeError> {
    if bytes.len() > u8::MAX as usize {
        return Err(RuntimeError::OverBudget {
            size: bytes.len(),
            budget: u8::MAX as usize,
        });
    }
    buf.push(bytes.len() as u8);
    buf.extend_from_slice(bytes);
    Ok(())
}

fn put_strings(buf: &mut Vec<u8>, strings: &[&str]) -> Result<(), RuntimeError> {
    buf.push(strings.len() as u8);
    for s in strings {
        put_counted(buf, s.as_bytes())?;
    }
    Ok(())
}

/// Append one instruction to a bytecode buffer.
pub fn append(buf: &mut Vec<u8>, instr: &Instr) -> Result<(), RuntimeError> {
    put_u16(buf, instr.opcode() as u16);
    match instr {
        Instr::Noop | Instr::Halt => {}
        Instr::Catch { sym, flag, invert } => {
            put_strings(buf, &[sym])?;
            put_counted(buf, &[*invert as u8])?;
            put_counted(buf, &[*flag])?;
        }
        Instr::Croak { flag, invert } => {
            put_counted(buf, &[*invert as u8])?;
            put_counted(buf, &[*flag])?;
        }
        Instr::Load { sym, size } => {
            put_strings(buf, &[sym])?;
            put_counted(buf, &size.to_be_bytes())?;
        }
        Instr::Reload { sym } | Instr::Map { sym } | Instr::Move { sym } => {
            put_strings(buf, &[sym])?;
        }
        Instr::InCmp { pattern, target } => {
            put_strings(buf, &[pattern, target])?;
        }
        Instr::MSize { size } => {
            put_counted(buf, &size.to_be_bytes())?;
        }
        Instr::MOut { selector, label } => {
            put_strings(buf, &[selector, label])?;
        }
    }
    Ok(())
}

// ===== Reader =====

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], RuntimeError> {
        if self.pos + n > self.buf.len() {
            return Err(RuntimeError::TruncatedCode(self.pos));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, RuntimeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, RuntimeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn counted(&mut self) -> Result<&'a [u8], RuntimeError> {
        let len = self.u8()? as usize;
        self.take(len)
    }

    fn strings(&mut self, op: u16, want: usize) -> Result<Vec<String>, RuntimeError> {
        let count = self.u8()? as usize;
        if count != want {
            return Err(RuntimeError::BadInstruction(op));
        }
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let bytes = self.counted()?;
            let s = String::from_utf8(bytes.to_vec())
                .map_err(|_| RuntimeError::BadInstruction(op))?;
            out.push(s);
        }
        Ok(out)
    }

    fn arg(&mut self, op: u16, want: usize) -> Result<&'a [u8], RuntimeError> {
        let bytes = self.counted()?;
        if bytes.len() != want {
            return Err(RuntimeError::BadInstruction(op));
        }
        Ok(bytes)
    }

    fn flags(&mut self, op: u16, want: usize) -> Result<&'a [u8], RuntimeError> {
        let count = self.u8()? as usize;
        if count != want {
            return Err(RuntimeError::BadInstruction(op));
        }
        self.take(count)
    }
}

/// Decode the next instruction, returning it and the unconsumed tail.
pub fn next(buf: &[u8]) -> Result<(Instr, &[u8]), RuntimeError> {
    let mut r = Reader::new(buf);
    let raw = r.u16()?;
    let op = Opcode::try_from(raw)?;

    let instr = match op {
        Opcode::Noop => Instr::Noop,
        Opcode::Halt => Instr::Halt,
        Opcode::Catch => {
            let mut syms = r.strings(raw, 1)?;
            let invert = r.arg(raw, 1)?[0] != 0;
            let flag = r.flags(raw, 1)?[0];
            Instr::Catch {
                sym: syms.remove(0),
                flag,
                invert,
            }
        }
        Opcode::Croak => {
            let invert = r.arg(raw, 1)?[0] != 0;
            let flag = r.flags(raw, 1)?[0];
            Instr::Croak { flag, invert }
        }
        Opcode::Load => {
            let mut syms = r.strings(raw, 1)?;
            let arg = r.arg(raw, 2)?;
            Instr::Load {
                sym: syms.remove(0),
                size: u16::from_be_bytes([arg[0], arg[1]]),
            }
        }
        Opcode::Reload => Instr::Reload {
            sym: r.strings(raw, 1)?.remove(0),
        },
        Opcode::Map => Instr::Map {
            sym: r.strings(raw, 1)?.remove(0),
        },
        Opcode::Move => Instr::Move {
            sym: r.strings(raw, 1)?.remove(0),
        },
        Opcode::InCmp => {
            let mut syms = r.strings(raw, 2)?;
            let target = syms.remove(1);
            Instr::InCmp {
                pattern: syms.remove(0),
                target,
            }
        }
        Opcode::MSize => {
            let arg = r.arg(raw, 2)?;
            Instr::MSize {
                size: u16::from_be_bytes([arg[0], arg[1]]),
            }
        }
        Opcode::MOut => {
            let mut syms = r.strings(raw, 2)?;
            let label = syms.remove(1);
            Instr::MOut {
                selector: syms.remove(0),
                label,
            }
        }
    };
    Ok((instr, &buf[r.pos..]))
}

/// Render a bytecode stream as mnemonic lines, one instruction per line.
pub fn disassemble(code: &[u8]) -> Result<String, RuntimeError> {
    let mut out = String::new();
    let mut rest = code;
    while !rest.is_empty() {
        let (instr, tail) = next(rest)?;
        rest = tail;
        out.push_str(instr.opcode().mnemonic());
        match &instr {
            Instr::Noop | Instr::Halt => {}
            Instr::Catch { sym, flag, invert } => {
                out.push_str(&format!(" {} {} {}", sym, flag, *invert as u8));
            }
            Instr::Croak { flag, invert } => {
                out.push_str(&format!(" {} {}", flag, *invert as u8));
            }
            Instr::Load { sym, size } => out.push_str(&format!(" {} {}", sym, size)),
            Instr::Reload { sym } | Instr::Map { sym } | Instr::Move { sym } => {
                out.push_str(&format!(" {}", sym));
            }
            Instr::InCmp { pattern, target } => {
                out.push_str(&format!(" {} {}", pattern, target));
            }
            Instr::MSize { size } => out.push_str(&format!(" {}", size)),
            Instr::MOut { selector, label } => {
                out.push_str(&format!(" {} {}", selector, label));
            }
        }
        out.push('\n');
    }
    Ok(out)
}
