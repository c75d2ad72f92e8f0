use std::fmt;

/// The machine word: the unit of value on the stack and in memory.
pub type MWord = i32;

/// Width of a machine word in bytes.
pub const MWORD_SIZE: MWord = 4;

/// Fixed capacity of the VM's byte memory.
pub const MEM_CAPACITY: MWord = to_ptr(1024);

/// Convert a word index to a byte offset.
pub const fn to_ptr(n: MWord) -> MWord {
    n * MWORD_SIZE
}

/// Round a byte count up to the next word boundary.
pub const fn align(n: MWord) -> MWord {
    (n + MWORD_SIZE - 1) / MWORD_SIZE * MWORD_SIZE
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpKind {
    Halt,
    // Stack
    Push,
    Pop,
    Rot,
    Dup,
    // Frame (addressed relative to vtos)
    VLoad,
    VStore,
    VIncr,
    VDecr,
    // Control flow
    Call,
    Ret,
    Jmp,
    JmpZ,
    JmpNZ,
    // Arithmetic
    Add,
    Sub,
    Shl,
    Shr,
    And,
    Or,
    // Memory
    Load,
    Store,
    // I/O
    Print,
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Halt => "Halt",
            OpKind::Push => "Push",
            OpKind::Pop => "Pop",
            OpKind::Rot => "Rot",
            OpKind::Dup => "Dup",
            OpKind::VLoad => "VLoad",
            OpKind::VStore => "VStore",
            OpKind::VIncr => "VIncr",
            OpKind::VDecr => "VDecr",
            OpKind::Call => "Call",
            OpKind::Ret => "Ret",
            OpKind::Jmp => "Jmp",
            OpKind::JmpZ => "JmpZ",
            OpKind::JmpNZ => "JmpNZ",
            OpKind::Add => "Add",
            OpKind::Sub => "Sub",
            OpKind::Shl => "Shl",
            OpKind::Shr => "Shr",
            OpKind::And => "And",
            OpKind::Or => "Or",
            OpKind::Load => "Load",
            OpKind::Store => "Store",
            OpKind::Print => "Print",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// A single machine instruction. Ops without an operand carry 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Op {
    pub kind: OpKind,
    pub arg: MWord,
}

impl Op {
    pub fn new(kind: OpKind, arg: MWord) -> Self {
        Self { kind, arg }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<8} {:>4}", self.kind, self.arg)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VmError {
    StackUnderflow {
        op: OpKind,
        pc: usize,
        wanted: usize,
        depth: usize,
    },
    NullPointer {
        pc: usize,
    },
    OutOfBounds {
        ptr: MWord,
        pc: usize,
    },
    Misaligned {
        ptr: MWord,
        pc: usize,
    },
    InvalidPc {
        pc: MWord,
    },
    Halted,
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::StackUnderflow {
                op,
                pc,
                wanted,
                depth,
            } => write!(
                f,
                "{} @ {}: expected at least {} items on stack, got {}",
                op, pc, wanted, depth
            ),
            VmError::NullPointer { pc } => {
                write!(f, "@ {}: tried to dereference a NULL pointer", pc)
            }
            VmError::OutOfBounds { ptr, pc } => {
                write!(f, "@ {}: memory address out of bounds: {}", pc, ptr)
            }
            VmError::Misaligned { ptr, pc } => {
                write!(f, "@ {}: misaligned memory address: {}", pc, ptr)
            }
            VmError::InvalidPc { pc } => write!(f, "invalid pc value: {}", pc),
            VmError::Halted => write!(f, "VM is halted"),
        }
    }
}

impl std::error::Error for VmError {}

/// The virtual machine: a linked instruction vector, a value stack, a
/// fixed byte memory, and a frame base pointer (`vtos`) into it.
pub struct Vm {
    pub ops: Vec<Op>,
    pub pc: usize,
    pub vtos: MWord,
    pub stack: Vec<MWord>,
    pub mem: Vec<u8>,
    pub halted: bool,
    /// Bytes emitted by `Print`, collected for the caller to flush.
    pub output: Vec<u8>,
}

impl Vm {
    pub fn new(ops: Vec<Op>, mem: Vec<u8>, vtos: MWord) -> Self {
        Self {
            ops,
            pc: 0,
            vtos,
            stack: Vec::new(),
            mem,
            halted: false,
            output: Vec::new(),
        }
    }

    /// Execute one instruction. `pc` advances by one after every op,
    /// including the ones that set it; jump targets are therefore
    /// linked as `target - 1`.
    pub fn step(&mut self) -> Result<(), VmError> {
        if self.halted {
            return Err(VmError::Halted);
        }
        if self.pc >= self.ops.len() {
            return Err(VmError::InvalidPc {
                pc: self.pc as MWord,
            });
        }
        let Op { kind, arg } = self.ops[self.pc];

        match kind {
            // Stack
            OpKind::Push => self.stack.push(arg),
            OpKind::Pop => {
                self.need_depth(1, kind)?;
                self.stack.pop();
            }
            OpKind::Rot => {
                self.need_depth(2, kind)?;
                let top = self.stack.len() - 1;
                self.stack.swap(top, top - 1);
            }
            OpKind::Dup => {
                self.need_depth(1, kind)?;
                let top = self.stack[self.stack.len() - 1];
                self.stack.push(top);
            }

            // Arithmetic
            OpKind::Add => self.binop(kind, MWord::wrapping_add)?,
            OpKind::Sub => self.binop(kind, MWord::wrapping_sub)?,
            OpKind::Shl => self.binop(kind, |a, b| a.wrapping_shl(b as u32))?,
            OpKind::Shr => self.binop(kind, |a, b| a.wrapping_shr(b as u32))?,
            OpKind::And => self.binop(kind, |a, b| a & b)?,
            OpKind::Or => self.binop(kind, |a, b| a | b)?,

            // Frame
            OpKind::VLoad => {
                let val = self.load_word(self.vtos.wrapping_add(arg))?;
                self.stack.push(val);
            }
            OpKind::VStore => {
                self.need_depth(1, kind)?;
                let val = self.stack.pop().unwrap_or_default();
                self.store_word(self.vtos.wrapping_add(arg), val)?;
            }
            OpKind::VIncr => self.vtos = self.vtos.wrapping_add(arg),
            OpKind::VDecr => self.vtos = self.vtos.wrapping_sub(arg),

            // Control flow
            OpKind::Call => {
                self.check_pc(arg)?;
                self.store_word(self.vtos, self.pc as MWord)?;
                self.pc = arg as usize;
            }
            OpKind::Ret => {
                let pc = self.load_word(self.vtos)?;
                self.check_pc(pc)?;
                self.pc = pc as usize;
            }
            OpKind::Jmp => {
                self.check_pc(arg)?;
                self.pc = arg as usize;
            }
            OpKind::JmpZ => {
                self.need_depth(1, kind)?;
                self.check_pc(arg)?;
                let guard = self.stack.pop().unwrap_or_default();
                if guard == 0 {
                    self.pc = arg as usize;
                }
            }
            OpKind::JmpNZ => {
                self.need_depth(1, kind)?;
                self.check_pc(arg)?;
                let guard = self.stack.pop().unwrap_or_default();
                if guard != 0 {
                    self.pc = arg as usize;
                }
            }

            // Memory
            OpKind::Load => {
                self.need_depth(1, kind)?;
                let ptr = self.stack.pop().unwrap_or_default();
                let val = self.load_word(ptr)?;
                self.stack.push(val);
            }
            OpKind::Store => {
                self.need_depth(2, kind)?;
                let ptr = self.stack.pop().unwrap_or_default();
                let val = self.stack.pop().unwrap_or_default();
                self.store_word(ptr, val)?;
            }

            // I/O
            OpKind::Print => {
                self.need_depth(1, kind)?;
                let val = self.stack.pop().unwrap_or_default();
                self.output.push(val as u8);
            }

            // System
            OpKind::Halt => self.halted = true,
        }

        self.pc += 1;
        Ok(())
    }

    /// Execute until `Halt`.
    pub fn run(&mut self) -> Result<(), VmError> {
        while !self.halted {
            self.step()?;
        }
        Ok(())
    }

    fn binop(&mut self, kind: OpKind, f: impl Fn(MWord, MWord) -> MWord) -> Result<(), VmError> {
        self.need_depth(2, kind)?;
        let b = self.stack.pop().unwrap_or_default();
        let a = self.stack.pop().unwrap_or_default();
        self.stack.push(f(a, b));
        Ok(())
    }

    /// Read one word at a byte address, with full pointer validation.
    pub fn load_word(&self, ptr: MWord) -> Result<MWord, VmError> {
        self.check_ptr(ptr)?;
        let p = ptr as usize;
        let bytes = [self.mem[p], self.mem[p + 1], self.mem[p + 2], self.mem[p + 3]];
        Ok(MWord::from_le_bytes(bytes))
    }

    /// Write one word at a byte address, with full pointer validation.
    pub fn store_word(&mut self, ptr: MWord, val: MWord) -> Result<(), VmError> {
        self.check_ptr(ptr)?;
        let p = ptr as usize;
        self.mem[p..p + MWORD_SIZE as usize].copy_from_slice(&val.to_le_bytes());
        Ok(())
    }

    fn check_ptr(&self, ptr: MWord) -> Result<(), VmError> {
        if ptr == 0 {
            return Err(VmError::NullPointer { pc: self.pc });
        }
        if ptr < 0 || ptr as usize + MWORD_SIZE as usize > self.mem.len() {
            return Err(VmError::OutOfBounds { ptr, pc: self.pc });
        }
        if ptr % MWORD_SIZE != 0 {
            return Err(VmError::Misaligned { ptr, pc: self.pc });
        }
        Ok(())
    }

    fn check_pc(&self, pc: MWord) -> Result<(), VmError> {
        if pc < 0 || pc as usize >= self.ops.len() {
            return Err(VmError::InvalidPc { pc });
        }
        Ok(())
    }

    fn need_depth(&self, wanted: usize, op: OpKind) -> Result<(), VmError> {
        if self.stack.len() < wanted {
            return Err(VmError::StackUnderflow {
                op,
                pc: self.pc,
                wanted,
                depth: self.stack.len(),
            });
        }
        Ok(())
    }
}
