//! x86-64 stack frame layout.
//!
//! Extends the generic variable layout with System V parameter offsets
//! (above the saved return address and frame pointer) and the two EH
//! metadata slots (part id, owning arena pointer) that the frame lowering
//! reads at unwind time.

use cranelift_entity::SecondaryMap;

use crate::ir::entities::Variable;
use crate::ir::listing::Listing;
use crate::isa::x64::params::{ParamClass, Params};
use crate::layout::VarLayout;
use crate::size::{s_ptr, Offset};

/// Saved `rbp` and the return address each take one pointer-sized slot
/// below the first stack parameter.
const PARAM_AREA_BASE: i64 = 16;

pub struct X64Layout {
    pub vars: VarLayout,
    /// Stack offset (relative to `rbp`, growing down) reserved for the
    /// EH part-id/owner pair, written by the prolog.
    pub eh_slot: Offset,
    pub frame_size: Offset,
    pub incoming_stack_params: SecondaryMap<Variable, Option<i64>>,
}

pub fn layout(src: &Listing) -> X64Layout {
    let vars = crate::layout::layout(src);
    let mut incoming_stack_params: SecondaryMap<Variable, Option<i64>> = SecondaryMap::new();

    let mut params = Params::new();
    let mut stack_offset = PARAM_AREA_BASE;
    for &p in src.params() {
        let desc = src.param_desc(p).expect("listing param without TypeDesc");
        let classified = params.classify(desc);
        let all_stack = classified
            .classes
            .iter()
            .all(|c| matches!(c, ParamClass::Stack(_)));
        if all_stack {
            incoming_stack_params[p] = Some(stack_offset);
            stack_offset += 8;
        }
    }

    let eh_slot = Offset::same(-(vars.frame_size.offset64() + s_ptr().size64() as i64 * 2));
    let frame_size = Offset::same(-eh_slot.offset64());

    X64Layout {
        vars,
        eh_slot,
        frame_size,
        incoming_stack_params,
    }
}

impl X64Layout {
    /// A variable's frame-relative offset: parameters that arrived on the
    /// stack read from the positive incoming-parameter area, spilled
    /// parameters and locals from the negative local area.
    pub fn offset(&self, src: &Listing, v: Variable) -> Offset {
        if let Some(stack_off) = self.incoming_stack_params[v] {
            return Offset::same(stack_off);
        }
        if src.is_param(v) {
            // Register-passed parameters are copied into local slots by the
            // frame prolog, at the same index-ordered offsets as any other
            // local.
        }
        self.vars.offset(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::size::s_int;
    use crate::typedesc::{PrimitiveKind, TypeDesc};

    #[test]
    fn eh_slot_sits_below_the_frame() {
        let l = Listing::new();
        let lay = layout(&l);
        assert!(lay.eh_slot.offset64() < 0);
    }

    #[test]
    fn seventh_integer_param_reads_from_incoming_stack_area() {
        let mut l = Listing::new();
        for _ in 0..7 {
            l.create_param(TypeDesc::Primitive {
                kind: PrimitiveKind::Integer,
                size: s_int(),
            });
        }
        let lay = layout(&l);
        let seventh = l.params()[6];
        assert_eq!(lay.incoming_stack_params[seventh], Some(PARAM_AREA_BASE));
    }
}
