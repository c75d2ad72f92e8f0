use std::collections::HashMap;

use super::{CodegenError, Context};
use crate::ast::VarDecl;
use crate::span::Spanned;
use crate::vm::{to_ptr, MWord};

/// A lexically scoped mapping of names to frame slot indices. Scopes
/// form a parent chain; lookup walks outward, so an inner declaration
/// shadows an outer one. The globals table is recorded for
/// program-level declarations but lookup never consults it.
pub struct Namespace<'a> {
    globals: &'a HashMap<String, usize>,
    parent: Option<&'a Namespace<'a>>,
    indices: HashMap<String, usize>,
}

impl<'a> Namespace<'a> {
    pub fn new(globals: &'a HashMap<String, usize>) -> Self {
        Self {
            globals,
            parent: None,
            indices: HashMap::new(),
        }
    }

    /// Open a child scope that inherits this one.
    pub fn push_block(&'a self) -> Namespace<'a> {
        Namespace {
            globals: self.globals,
            parent: Some(self),
            indices: HashMap::new(),
        }
    }

    /// Assign contiguous frame indices to this scope's declarations,
    /// starting at the parent chain's height.
    pub fn set_var_decls(&mut self, var_decls: &[Spanned<VarDecl>]) -> Result<(), CodegenError> {
        debug_assert!(self.indices.is_empty());
        let height = self.height();
        for (idx, var_decl) in var_decls.iter().enumerate() {
            let name = &var_decl.node.name;
            if self.indices.contains_key(name) {
                return Err(CodegenError::DuplicateName(name.clone()));
            }
            self.indices.insert(name.clone(), idx + height);
        }
        Ok(())
    }

    pub fn get_index(&self, name: &str) -> Option<usize> {
        if let Some(&idx) = self.indices.get(name) {
            return Some(idx);
        }
        self.parent.and_then(|p| p.get_index(name))
    }

    /// Total number of slots bound by this scope and its ancestors.
    pub fn height(&self) -> usize {
        self.parent.map_or(0, Namespace::height) + self.indices.len()
    }

    /// Byte offset of `name`'s slot, measured from the function's
    /// post-prologue `vtos`: slot `i` sits at `to_ptr(1 + i)` above the
    /// frame base, which is `stack_ptr_offset` below the current vtos.
    pub fn get_offset(&self, name: &str, ctx: &Context) -> Result<MWord, CodegenError> {
        let Some(idx) = self.get_index(name) else {
            let mut available: Vec<&str> = self.indices.keys().map(String::as_str).collect();
            available.sort_unstable();
            return Err(CodegenError::UnknownIdent {
                name: name.to_string(),
                available: available.join(", "),
            });
        };
        Ok(to_ptr(1 + idx as MWord) - ctx.stack_ptr_offset)
    }

    pub fn globals(&self) -> &HashMap<String, usize> {
        self.globals
    }
}
