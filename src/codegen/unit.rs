use std::collections::BTreeMap;
use std::fmt;

use super::CodegenError;
use crate::vm::{to_ptr, MWord, Op, OpKind};

/// Placeholder operand for not-yet-linked jumps and calls.
pub const DUMMY_ADDR: MWord = 0;

/// A concatenable instruction fragment: an op vector plus symbolic
/// label tables. `target_addrs` maps a label to the op index it names;
/// `jmp_addrs` maps the index of a jump/call op to the label it still
/// needs. Appending one unit to another shifts both tables by the
/// host's op count. Linking resolves every pending jump in place.
#[derive(Clone, Debug, Default)]
pub struct Unit {
    pub ops: Vec<Op>,
    pub target_addrs: BTreeMap<String, usize>,
    pub jmp_addrs: BTreeMap<usize, String>,
}

impl Unit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the address of the next op to be emitted.
    pub fn target_addr(mut self, name: &str) -> Self {
        self.target_addrs.insert(name.to_string(), self.ops.len());
        self
    }

    /// Record a pending jump for the next op to be emitted. Must be
    /// called immediately before the jump/call op itself.
    pub fn jmp_addr(mut self, name: &str) -> Self {
        self.jmp_addrs.insert(self.ops.len(), name.to_string());
        self
    }

    fn op(mut self, kind: OpKind, arg: MWord) -> Self {
        self.ops.push(Op::new(kind, arg));
        self
    }

    pub fn halt(self) -> Self {
        self.op(OpKind::Halt, 0)
    }

    pub fn print(self) -> Self {
        self.op(OpKind::Print, 0)
    }

    pub fn push(self, arg: MWord) -> Self {
        self.op(OpKind::Push, arg)
    }

    pub fn pop(self) -> Self {
        self.op(OpKind::Pop, 0)
    }

    pub fn rot(self) -> Self {
        self.op(OpKind::Rot, 0)
    }

    pub fn dup(self) -> Self {
        self.op(OpKind::Dup, 0)
    }

    pub fn v_load(self, arg: MWord) -> Self {
        self.op(OpKind::VLoad, arg)
    }

    pub fn v_store(self, arg: MWord) -> Self {
        self.op(OpKind::VStore, arg)
    }

    pub fn v_incr(self, arg: MWord) -> Self {
        self.op(OpKind::VIncr, arg)
    }

    pub fn v_decr(self, arg: MWord) -> Self {
        self.op(OpKind::VDecr, arg)
    }

    pub fn call(self, arg: MWord) -> Self {
        self.op(OpKind::Call, arg)
    }

    pub fn ret(self) -> Self {
        self.op(OpKind::Ret, 0)
    }

    pub fn jmp(self, arg: MWord) -> Self {
        self.op(OpKind::Jmp, arg)
    }

    pub fn jmp_z(self, arg: MWord) -> Self {
        self.op(OpKind::JmpZ, arg)
    }

    pub fn jmp_nz(self, arg: MWord) -> Self {
        self.op(OpKind::JmpNZ, arg)
    }

    pub fn add(self) -> Self {
        self.op(OpKind::Add, 0)
    }

    pub fn sub(self) -> Self {
        self.op(OpKind::Sub, 0)
    }

    pub fn shl(self) -> Self {
        self.op(OpKind::Shl, 0)
    }

    pub fn shr(self) -> Self {
        self.op(OpKind::Shr, 0)
    }

    pub fn and(self) -> Self {
        self.op(OpKind::And, 0)
    }

    pub fn or(self) -> Self {
        self.op(OpKind::Or, 0)
    }

    pub fn load(self) -> Self {
        self.op(OpKind::Load, 0)
    }

    pub fn store(self) -> Self {
        self.op(OpKind::Store, 0)
    }

    /// Concatenate `other` onto this unit, shifting its label tables
    /// by this unit's current op count.
    pub fn append(mut self, other: Unit) -> Self {
        let addr_offset = self.ops.len();
        for (name, addr) in other.target_addrs {
            self.target_addrs.insert(name, addr + addr_offset);
        }
        for (addr, name) in other.jmp_addrs {
            self.jmp_addrs.insert(addr + addr_offset, name);
        }
        self.ops.extend(other.ops);
        self
    }

    /// Prepend the program entry preamble: `Call main; Halt`.
    pub fn entrypoint(self) -> Self {
        Unit::new()
            .jmp_addr("main")
            .call(DUMMY_ADDR)
            .halt()
            .append(self)
    }

    /// Append the builtin thunks. Each loads its arguments from the
    /// well-known slots above the caller's frame base, performs one
    /// machine op, and returns; none of them opens a frame of its own.
    pub fn builtins(self) -> Self {
        self.target_addr("print_char")
            .v_load(to_ptr(1))
            .print()
            .push(0)
            .ret()
            .target_addr("add")
            .v_load(to_ptr(1))
            .v_load(to_ptr(2))
            .add()
            .ret()
            .target_addr("sub")
            .v_load(to_ptr(1))
            .v_load(to_ptr(2))
            .sub()
            .ret()
            .target_addr("shl")
            .v_load(to_ptr(1))
            .v_load(to_ptr(2))
            .shl()
            .ret()
            .target_addr("shr")
            .v_load(to_ptr(1))
            .v_load(to_ptr(2))
            .shr()
            .ret()
            .target_addr("and")
            .v_load(to_ptr(1))
            .v_load(to_ptr(2))
            .and()
            .ret()
            .target_addr("or")
            .v_load(to_ptr(1))
            .v_load(to_ptr(2))
            .or()
            .ret()
            .target_addr("mload")
            .v_load(to_ptr(1))
            .load()
            .ret()
            .target_addr("mstore")
            .v_load(to_ptr(2))
            .v_load(to_ptr(1))
            .store()
            .v_load(to_ptr(2))
            .ret()
    }

    /// Resolve every pending jump to `target - 1`; the machine applies
    /// `pc += 1` after control-flow ops too, so the stored operand is
    /// one less than the target index.
    pub fn link(mut self) -> Result<Self, CodegenError> {
        let pending: Vec<(usize, String)> = self
            .jmp_addrs
            .iter()
            .map(|(&addr, name)| (addr, name.clone()))
            .collect();
        for (addr, name) in pending {
            let Some(&target) = self.target_addrs.get(&name) else {
                return Err(CodegenError::UnknownTarget(name));
            };
            let op = &mut self.ops[addr];
            debug_assert!(matches!(
                op.kind,
                OpKind::Jmp | OpKind::JmpZ | OpKind::JmpNZ | OpKind::Call
            ));
            debug_assert_eq!(op.arg, DUMMY_ADDR);
            op.arg = target as MWord - 1;
        }
        Ok(self)
    }
}

/// The `asm` listing: one op per line in fixed-width columns, with
/// label names in a trailing column at their target addresses.
impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: BTreeMap<usize, &str> = self
            .target_addrs
            .iter()
            .map(|(name, &addr)| (addr, name.as_str()))
            .collect();
        for (i, op) in self.ops.iter().enumerate() {
            match labels.get(&i) {
                Some(name) => writeln!(f, "{:03} {:<18}{}", i, op.to_string(), name)?,
                None => writeln!(f, "{:03} {}", i, op)?,
            }
        }
        Ok(())
    }
}
