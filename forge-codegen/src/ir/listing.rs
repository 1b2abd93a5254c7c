//! `Listing`: the IR container -- instructions, the variable/part scope
//! graph, labels, parameters and the function's result type.

use cranelift_entity::{PrimaryMap, SecondaryMap};

use crate::ir::entities::{Part, Variable};
use crate::ir::instr::Instr;
use crate::reference::Reference;
use crate::size::Size;
use crate::typedesc::TypeDesc;

/// What happens to a variable's storage when its owning block exits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeOpt {
    /// Call the destructor (if any) when the owning block is left, on every
    /// exit path including unwinding.
    pub free_on_block_exit: bool,
    /// Pass a pointer to the destructor rather than the value itself
    /// (`dtor(&v)` vs `dtor(v)`).
    pub free_ptr: bool,
}

impl FreeOpt {
    pub const NONE: FreeOpt = FreeOpt {
        free_on_block_exit: false,
        free_ptr: false,
    };

    pub const ON_BLOCK_EXIT: FreeOpt = FreeOpt {
        free_on_block_exit: true,
        free_ptr: false,
    };

    pub const ON_BLOCK_EXIT_PTR: FreeOpt = FreeOpt {
        free_on_block_exit: true,
        free_ptr: true,
    };
}

#[derive(Clone)]
struct VarInfo {
    size: Size,
    part: Part,
    dtor: Option<Reference>,
    free_opt: FreeOpt,
    /// `Some` iff this variable is a function parameter; carries its ABI
    /// type.
    param: Option<TypeDesc>,
}

#[derive(Clone, Default)]
struct PartInfo {
    parent: Option<Part>,
    /// Is this part a `Block` (may be entered/exited), as opposed to a
    /// plain scope produced e.g. by the calling convention materializer?
    is_block: bool,
}

/// Errors from violating the part-graph invariants during construction or
/// frame lowering.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PartGraphError {
    #[error("cannot begin part {part:?}: current part {current:?} is not its parent")]
    NotChildOfCurrent { part: Part, current: Part },
    #[error("cannot end part {part:?}: it is not the current part ({current:?})")]
    NotCurrent { part: Part, current: Part },
    #[error("{0:?} is not a block and cannot be entered/exited")]
    NotABlock(Part),
}

/// The IR container for one function body.
pub struct Listing {
    instrs: Vec<Instr>,
    /// Labels attached just before the instruction at the same index.
    labels_before: SecondaryMap<InstrIdx, Vec<crate::reg::Label>>,
    vars: PrimaryMap<Variable, VarInfo>,
    parts: PrimaryMap<Part, PartInfo>,
    params: Vec<Variable>,
    pub result: Option<TypeDesc>,
    next_label: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct InstrIdx(u32);
cranelift_entity::entity_impl!(InstrIdx, "instr");

impl Listing {
    pub fn new() -> Self {
        let mut parts = PrimaryMap::new();
        parts.push(PartInfo {
            parent: None,
            is_block: true,
        });
        Listing {
            instrs: Vec::new(),
            labels_before: SecondaryMap::new(),
            vars: PrimaryMap::new(),
            parts,
            params: Vec::new(),
            result: None,
            next_label: 0,
        }
    }

    pub fn root(&self) -> Part {
        Part::ROOT
    }

    /// Start a new listing that shares this one's variable/part graph,
    /// parameters and result type, but has no instructions yet. Used by
    /// `Transform` to produce its lowered output: the same `Variable`/`Part`
    /// handles from `src` stay valid in the new listing, and the lowering
    /// pass may still extend the graph (e.g. the complex-parameter copy
    /// materializer allocates new blocks and variables).
    pub fn fork(&self) -> Self {
        Listing {
            instrs: Vec::new(),
            labels_before: SecondaryMap::new(),
            vars: self.vars.clone(),
            parts: self.parts.clone(),
            params: self.params.clone(),
            result: self.result.clone(),
            next_label: self.next_label,
        }
    }

    pub fn new_label(&mut self) -> crate::reg::Label {
        let l = crate::reg::Label::new(self.next_label);
        self.next_label += 1;
        l
    }

    pub fn create_block(&mut self, parent: Part) -> Part {
        self.parts.push(PartInfo {
            parent: Some(parent),
            is_block: true,
        })
    }

    pub fn create_part(&mut self, parent: Part) -> Part {
        self.parts.push(PartInfo {
            parent: Some(parent),
            is_block: false,
        })
    }

    pub fn create_var(
        &mut self,
        part: Part,
        size: Size,
        dtor: Option<Reference>,
        free_opt: FreeOpt,
    ) -> Variable {
        self.vars.push(VarInfo {
            size,
            part,
            dtor,
            free_opt,
            param: None,
        })
    }

    pub fn create_param(&mut self, desc: TypeDesc) -> Variable {
        let size = desc.size();
        let v = self.vars.push(VarInfo {
            size,
            part: Part::ROOT,
            dtor: None,
            free_opt: FreeOpt::NONE,
            param: Some(desc),
        });
        self.params.push(v);
        v
    }

    pub fn push(&mut self, instr: Instr) -> InstrIdx {
        let idx = InstrIdx(self.instrs.len() as u32);
        self.instrs.push(instr);
        idx
    }

    pub fn push_label(&mut self, label: crate::reg::Label) {
        let next = InstrIdx(self.instrs.len() as u32);
        self.labels_before[next].push(label);
    }

    pub fn count(&self) -> usize {
        self.instrs.len()
    }

    pub fn at(&self, i: usize) -> &Instr {
        &self.instrs[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Instr)> {
        self.instrs.iter().enumerate()
    }

    pub fn labels(&self, i: usize) -> &[crate::reg::Label] {
        self.labels_before.get(InstrIdx(i as u32)).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn all_vars(&self) -> impl Iterator<Item = Variable> + '_ {
        self.vars.keys()
    }

    pub fn all_vars_in_block(&self, block: Part) -> Vec<Variable> {
        self.vars
            .keys()
            .filter(|&v| self.descends_from(self.vars[v].part, block))
            .collect()
    }

    /// Variables created directly within `part` (not descendant parts).
    pub fn part_vars(&self, part: Part) -> Vec<Variable> {
        self.vars.keys().filter(|&v| self.vars[v].part == part).collect()
    }

    pub fn parent(&self, part: Part) -> Option<Part> {
        self.parts[part].parent
    }

    pub fn is_block(&self, part: Part) -> bool {
        self.parts[part].is_block
    }

    pub fn var_size(&self, var: Variable) -> Size {
        self.vars[var].size
    }

    pub fn var_part(&self, var: Variable) -> Part {
        self.vars[var].part
    }

    pub fn is_param(&self, var: Variable) -> bool {
        self.vars[var].param.is_some()
    }

    pub fn param_desc(&self, var: Variable) -> Option<&TypeDesc> {
        self.vars[var].param.as_ref()
    }

    pub fn params(&self) -> &[Variable] {
        &self.params
    }

    pub fn free_fn(&self, var: Variable) -> Option<&Reference> {
        self.vars[var].dtor.as_ref()
    }

    pub fn free_opt(&self, var: Variable) -> FreeOpt {
        self.vars[var].free_opt
    }

    fn descends_from(&self, mut part: Part, ancestor: Part) -> bool {
        loop {
            if part == ancestor {
                return true;
            }
            match self.parts[part].parent {
                Some(p) => part = p,
                None => return false,
            }
        }
    }

    /// Non-parameter variables are accessible only within parts descended
    /// from the block that created them. Parameters are accessible
    /// everywhere.
    pub fn accessible(&self, var: Variable, part: Part) -> bool {
        if self.is_param(var) {
            return true;
        }
        self.descends_from(part, self.vars[var].part)
    }

    pub fn begin_block(&self, current: Part, part: Part) -> Result<(), PartGraphError> {
        if !self.is_block(part) {
            return Err(PartGraphError::NotABlock(part));
        }
        if self.parts[part].parent != Some(current) {
            return Err(PartGraphError::NotChildOfCurrent { part, current });
        }
        Ok(())
    }

    pub fn end_block(&self, current: Part, part: Part) -> Result<Part, PartGraphError> {
        if !self.is_block(part) {
            return Err(PartGraphError::NotABlock(part));
        }
        if current != part {
            return Err(PartGraphError::NotCurrent { part, current });
        }
        self.parts[part]
            .parent
            .ok_or(PartGraphError::NotCurrent { part, current })
    }
}

impl Default for Listing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::size::s_int;

    #[test]
    fn nested_block_variable_accessible_only_in_descendants() {
        let mut l = Listing::new();
        let root = l.root();
        let inner = l.create_block(root);
        let v = l.create_var(inner, s_int(), None, FreeOpt::ON_BLOCK_EXIT);
        assert!(l.accessible(v, inner));
        assert!(!l.accessible(v, root));

        let sibling = l.create_block(root);
        assert!(!l.accessible(v, sibling));
    }

    #[test]
    fn begin_block_requires_current_to_be_parent() {
        let mut l = Listing::new();
        let root = l.root();
        let a = l.create_block(root);
        let b = l.create_block(a);
        assert!(l.begin_block(root, a).is_ok());
        assert!(l.begin_block(root, b).is_err());
    }

    #[test]
    fn end_block_requires_current_part() {
        let mut l = Listing::new();
        let root = l.root();
        let a = l.create_block(root);
        assert_eq!(l.end_block(a, a).unwrap(), root);
        assert!(l.end_block(root, a).is_err());
    }

    #[test]
    fn params_are_always_accessible() {
        let mut l = Listing::new();
        let p = l.create_param(TypeDesc::Primitive {
            kind: crate::typedesc::PrimitiveKind::Integer,
            size: s_int(),
        });
        let inner = l.create_block(l.root());
        assert!(l.accessible(p, inner));
    }
}
