//! Decides which shards must be fused, compose-merges their engines
//! into one, and rewrites local indices.

use std::cell::RefCell;
use std::rc::Rc;

use crate::engine::{self, dense::DenseEngine, Engine};
use crate::error::Result;
use crate::math::N;
use crate::shard::ShardUnit;
use crate::shard_map::ShardMap;

/// Materializes a single joint subsystem containing every logical
/// position in `bits`, fusing as few engines as necessary. Returns the
/// surviving engine and the local index inside it for each of `bits`,
/// in the same order.
pub fn entangle_in_current_basis(
    shards: &mut ShardMap,
    bits: &[N],
) -> Result<(Rc<RefCell<Box<dyn Engine>>>, Vec<N>)> {
    // Step 1: synthesize a 1-qubit engine for every detached participant.
    for &bit in bits {
        let shard = shards.get_mut(bit);
        if shard.is_detached() {
            let mut engine = DenseEngine::new(1);
            engine.set_amplitude(0, shard.amp0);
            engine.set_amplitude(1, shard.amp1);
            let boxed: Box<dyn Engine> = Box::new(engine);
            shard.unit = ShardUnit::Attached(Rc::new(RefCell::new(boxed)));
            shard.mapped = 0;
        }
    }

    // Step 2: collect the distinct engine handles among the participants,
    // in the order each first appears.
    let mut handles: Vec<Rc<RefCell<Box<dyn Engine>>>> = Vec::new();
    for &bit in bits {
        let engine = shards.get(bit).unit.engine().cloned().expect("entangled above");
        if !handles.iter().any(|h| Rc::ptr_eq(h, &engine)) {
            handles.push(engine);
        }
    }

    // Step 3: repeatedly fuse pairs until one handle remains. Every fuse
    // folds the second engine's amplitudes into the first and rewrites
    // every shard pointing at the second to point at the first, offset
    // by the first engine's prior qubit count.
    while handles.len() > 1 {
        let mut next_round = Vec::with_capacity((handles.len() + 1) / 2);
        let mut it = handles.into_iter();
        while let Some(first) = it.next() {
            if let Some(second) = it.next() {
                let offset = {
                    let donor = second.borrow().clone_engine();
                    engine::compose(&mut **first.borrow_mut(), donor)?
                };
                let ids: Vec<_> = shards.ids().collect();
                for id in ids {
                    let shard = shards.by_id_mut(id);
                    if let ShardUnit::Attached(e) = &shard.unit {
                        if Rc::ptr_eq(e, &second) {
                            shard.mapped += offset;
                            shard.unit = ShardUnit::Attached(first.clone());
                        }
                    }
                }
                next_round.push(first);
            } else {
                next_round.push(first);
            }
        }
        handles = next_round;
    }

    let surviving = handles.into_iter().next().expect("bits is non-empty");
    let mapped = bits.iter().map(|&b| shards.get(b).mapped).collect();
    Ok((surviving, mapped))
}

/// Sorts the shards belonging to `engine` by external logical position,
/// swapping the engine's local indices to match so that a contiguous
/// logical range also occupies a contiguous local range.
pub fn order_contiguous(shards: &mut ShardMap, engine: &Rc<RefCell<Box<dyn Engine>>>) {
    let mut positions: Vec<N> = (0..shards.len())
        .filter(|&pos| shards.get(pos).unit.engine().map(|e| Rc::ptr_eq(e, engine)).unwrap_or(false))
        .collect();
    positions.sort_by_key(|&pos| shards.get(pos).mapped);

    for (target_local, &pos) in positions.iter().enumerate() {
        let current_local = shards.get(pos).mapped;
        if current_local == target_local {
            continue;
        }
        engine.borrow_mut().swap(current_local, target_local);
        for other_pos in &positions {
            let shard = shards.get_mut(*other_pos);
            if shard.mapped == target_local {
                shard.mapped = current_local;
            }
        }
        shards.get_mut(pos).mapped = target_local;
    }
}

/// Fuses a contiguous logical range `[start, start+length)` and returns
/// the surviving engine together with the local index of `start`.
pub fn entangle_range(
    shards: &mut ShardMap,
    start: N,
    length: N,
) -> Result<(Rc<RefCell<Box<dyn Engine>>>, N)> {
    let bits: Vec<N> = (start..start + length).collect();
    let (engine, _) = entangle_in_current_basis(shards, &bits)?;
    order_contiguous(shards, &engine);
    let base = shards.get(start).mapped;
    Ok((engine, base))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::Shard;

    #[test]
    fn entangling_two_detached_shards_yields_one_engine() {
        let mut shards = ShardMap::new();
        shards.push(Shard::zero());
        shards.push(Shard::zero());

        let (engine, mapped) = entangle_in_current_basis(&mut shards, &[0, 1]).unwrap();
        assert_eq!(engine.borrow().qubit_count(), 2);
        assert_eq!(mapped.len(), 2);
        assert_ne!(mapped[0], mapped[1]);
    }
}
