//! Rank-polymorphic application: mapping scalar callables over lists.
//!
//! A primitive declares per-argument automap behaviour with a mask
//! character: `a` takes the argument as-is, `z` maps when the argument is
//! a value list (its elements are themselves streams or scalars), `k`
//! maps over any list. When at least one argument wants mapping, the
//! call is rebuilt as a lazy list whose generator pulls one element from
//! each mapped argument per item and applies the callable.
//!
//! Scalars broadcast (they are repeated, not cycled); the shortest finite
//! mapped input sets the result length; indefinite inputs never shorten
//! it.

use std::sync::Arc;

use crate::array::Array;
use crate::code::EachOp;
use crate::error::Result;
use crate::input::BothIn;
use crate::list::{Gen, List, Pulled, BLOCK_SIZE};
use crate::thread::Thread;
use crate::value::{ItemKind, V};

/// Whether an argument triggers automapping under the given mask char.
pub fn wants_map(mask: u8, arg: &V) -> bool {
    match mask {
        b'z' => arg.is_vlist() && !no_each(arg),
        b'k' => arg.is_list() && !no_each(arg),
        _ => false,
    }
}

fn no_each(arg: &V) -> bool {
    matches!(arg, V::List(l) if l.is_no_each())
}

struct EachArg {
    cursor: BothIn,
}

/// Pulls one element from every mapped argument per output item, applies
/// the callable, and blocks up the results. Ends as soon as any mapped
/// argument ends.
struct EachGen {
    callable: V,
    args: Vec<EachArg>,
}

impl Gen for EachGen {
    fn name(&self) -> &'static str {
        "each"
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let mut out: Vec<V> = Vec::with_capacity(BLOCK_SIZE);
        let mut ended = false;
        'items: for _ in 0..BLOCK_SIZE {
            let mut items: Vec<V> = Vec::with_capacity(self.args.len());
            for arg in &mut self.args {
                let mut item = V::default();
                if arg.cursor.one(th, &mut item)? {
                    ended = true;
                    break 'items;
                }
                items.push(item);
            }
            for item in items {
                th.push(item)?;
            }
            crate::interpreter::apply(th, &self.callable)?;
            out.push(th.pop()?);
        }
        if out.is_empty() {
            return Ok(Pulled::End);
        }
        let array = Array::from_vs(out);
        Ok(if ended {
            Pulled::Last(array)
        } else {
            Pulled::Block(array)
        })
    }
}

/// Rebuild a call whose arguments are already popped (deepest first) as a
/// lazy mapped list.
pub fn map_call(
    th: &mut Thread,
    callable: V,
    args: Vec<V>,
    mapped: Vec<bool>,
) -> Result<()> {
    debug_assert_eq!(args.len(), mapped.len());
    let finite = args
        .iter()
        .zip(mapped.iter())
        .any(|(arg, &m)| m && arg.is_finite());
    let each_args: Vec<EachArg> = args
        .into_iter()
        .zip(mapped)
        .map(|(arg, m)| EachArg {
            cursor: if m {
                BothIn::new(arg)
            } else {
                BothIn::constant(arg)
            },
        })
        .collect();
    let gen = Box::new(EachGen {
        callable,
        args: each_args,
    });
    th.push(V::List(List::from_gen(gen, ItemKind::V, finite)))
}

/// Apply an each-op wrapper: map its callable over whichever of the
/// masked arguments are lists.
pub fn apply_each(th: &mut Thread, each: &Arc<EachOp>) -> Result<()> {
    let takes = each.v.takes() as usize;
    let args = th.pop_n(takes)?;
    let mapped: Vec<bool> = args
        .iter()
        .enumerate()
        .map(|(i, arg)| {
            each.maps_arg(i as u16) && arg.is_list() && !no_each(arg)
        })
        .collect();
    if !mapped.iter().any(|&m| m) {
        for arg in args {
            th.push(arg)?;
        }
        return crate::interpreter::apply(th, &each.v);
    }
    map_call(th, each.v.clone(), args, mapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_thread;

    fn packed_zs(th: &mut Thread, v: &V) -> Vec<f64> {
        match v {
            V::List(l) => {
                let p = l.pack(th, None).unwrap().unwrap();
                p.packed_array().unwrap().to_zs()
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn all_scalar_arguments_are_a_no_op() {
        let mut th = test_thread();
        // `at` automaps its index argument; scalar index stays direct
        let v = th.eval("[10 20 30] 1 at").unwrap();
        assert_eq!(v.as_float(), 20.0);
    }

    #[test]
    fn one_list_argument_maps_elementwise() {
        let mut th = test_thread();
        let v = th.eval("[10 20 30] [0 2] at").unwrap();
        assert!(v.is_list());
        assert_eq!(packed_zs(&mut th, &v), vec![10.0, 30.0]);
    }

    #[test]
    fn two_finite_lists_zip_to_min_length() {
        let mut th = test_thread();
        // wrap a two-argument lambda in an each-op
        let v = th
            .eval("[1 2 3] [10 20] \\x y [x y +] @ !")
            .unwrap();
        assert_eq!(packed_zs(&mut th, &v), vec![11.0, 22.0]);
    }

    #[test]
    fn scalars_broadcast_across_the_mapped_list() {
        let mut th = test_thread();
        let v = th.eval("[1 2 3] 100 \\x y [x y +] @ !").unwrap();
        assert_eq!(packed_zs(&mut th, &v), vec![101.0, 102.0, 103.0]);
    }

    #[test]
    fn each_over_scalars_falls_through_to_direct_application() {
        let mut th = test_thread();
        let v = th.eval("4 5 \\x y [x y *] @ !").unwrap();
        assert_eq!(v.as_float(), 20.0);
    }

    #[test]
    fn mapped_result_is_lazy() {
        let mut th = test_thread();
        // mapping over an indefinite stream must not hang
        let v = th.eval("0 sinosc [0 1 2] \\f i [i] @ !").unwrap();
        assert!(v.is_list());
        let _ = v;
    }
}
