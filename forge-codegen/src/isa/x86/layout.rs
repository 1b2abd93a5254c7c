//! x86-32 stack frame layout: cdecl parameters sit above the saved `ebp`
//! and return address, locals below.

use cranelift_entity::SecondaryMap;

use crate::ir::entities::Variable;
use crate::ir::listing::Listing;
use crate::isa::x86::params::Params;
use crate::layout::VarLayout;
use crate::size::Offset;

const PARAM_AREA_BASE: i32 = 8;

pub struct X86Layout {
    pub vars: VarLayout,
    pub frame_size: Offset,
    pub incoming_stack_params: SecondaryMap<Variable, Option<i32>>,
}

pub fn layout(src: &Listing) -> X86Layout {
    let vars = crate::layout::layout(src);
    let mut incoming_stack_params: SecondaryMap<Variable, Option<i32>> = SecondaryMap::new();
    let mut params = Params::new();
    let mut offset = PARAM_AREA_BASE;
    for &p in src.params() {
        let desc = src.param_desc(p).expect("listing param without TypeDesc");
        let _ = params.classify(desc);
        incoming_stack_params[p] = Some(offset);
        offset += 4;
    }
    let frame_size = Offset::same(vars.frame_size.offset32() as i64);
    X86Layout {
        vars,
        frame_size,
        incoming_stack_params,
    }
}

impl X86Layout {
    pub fn offset(&self, _src: &Listing, v: Variable) -> Offset {
        if let Some(stack_off) = self.incoming_stack_params[v] {
            return Offset::same(stack_off as i64);
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
    fn first_param_sits_above_return_address() {
        let mut l = Listing::new();
        let p = l.create_param(TypeDesc::Primitive { kind: PrimitiveKind::Integer, size: s_int() });
        let lay = layout(&l);
        assert_eq!(lay.incoming_stack_params[p], Some(PARAM_AREA_BASE));
    }
}
