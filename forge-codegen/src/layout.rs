//! Generic (target-independent) variable layout.
//!
//! Non-parameter variables are packed in index order starting at offset 0,
//! each aligned to its own size's alignment. Parameters get
//! `Offset::default()` here; platform layouts (`isa::x64::layout`,
//! `isa::x86::layout`) extend this with parameter offsets, spill slots and
//! EH frame slots.

use cranelift_entity::SecondaryMap;

use crate::ir::entities::Variable;
use crate::ir::listing::Listing;
use crate::size::{s_ptr, Offset, Size};

fn round_up(offset: i64, align: u32) -> i64 {
    if align <= 1 {
        return offset;
    }
    let align = align as i64;
    (offset + align - 1) / align * align
}

fn align_offset(o: Offset, size: Size) -> Offset {
    Offset::new(
        round_up(o.offset32() as i64, size.align32()) as i32,
        round_up(o.offset64(), size.align64()),
    )
}

/// Per-variable frame offsets, plus the total frame size (last entry's
/// counterpart) aligned to pointer size.
pub struct VarLayout {
    offsets: SecondaryMap<Variable, Offset>,
    pub frame_size: Offset,
}

impl VarLayout {
    pub fn offset(&self, v: Variable) -> Offset {
        self.offsets[v]
    }
}

pub fn layout(src: &Listing) -> VarLayout {
    let mut offsets: SecondaryMap<Variable, Offset> = SecondaryMap::new();
    let mut cursor = Offset::default();
    let mut worst = Offset::default();

    let mut vars: Vec<Variable> = src.all_vars().collect();
    vars.sort_by_key(|v| cranelift_entity::EntityRef::index(*v));

    for v in vars {
        if src.is_param(v) {
            offsets[v] = Offset::default();
            continue;
        }
        let size = src.var_size(v);
        cursor = align_offset(cursor, size);
        offsets[v] = cursor;
        cursor = Offset::new(
            cursor.offset32() + size.size32() as i32,
            cursor.offset64() + size.size64() as i64,
        );
        let end = align_offset(cursor, s_ptr());
        if end.offset64() > worst.offset64() {
            worst = end;
        }
    }

    VarLayout {
        offsets,
        frame_size: worst,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::listing::FreeOpt;
    use crate::size::{s_byte, s_int, s_long};

    #[test]
    fn non_overlapping_variables() {
        let mut l = Listing::new();
        let root = l.root();
        let a = l.create_var(root, s_byte(), None, FreeOpt::NONE);
        let b = l.create_var(root, s_long(), None, FreeOpt::NONE);
        let c = l.create_var(root, s_int(), None, FreeOpt::NONE);
        let lay = layout(&l);

        let intervals = [
            (lay.offset(a).offset64(), s_byte().size64()),
            (lay.offset(b).offset64(), s_long().size64()),
            (lay.offset(c).offset64(), s_int().size64()),
        ];
        for i in 0..intervals.len() {
            for j in 0..intervals.len() {
                if i == j {
                    continue;
                }
                let (o1, s1) = intervals[i];
                let (o2, s2) = intervals[j];
                let overlap = o1 < o2 + s2 as i64 && o2 < o1 + s1 as i64;
                assert!(!overlap, "{:?} and {:?} overlap", intervals[i], intervals[j]);
            }
        }
    }

    #[test]
    fn params_get_zero_offset() {
        let mut l = Listing::new();
        let p = l.create_param(crate::typedesc::TypeDesc::Primitive {
            kind: crate::typedesc::PrimitiveKind::Integer,
            size: s_int(),
        });
        let lay = layout(&l);
        assert_eq!(lay.offset(p), Offset::default());
    }
}
