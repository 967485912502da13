mod common;

use common::Harness;
use rand::{Rng as _, SeedableRng as _};
use std::{collections::HashMap, thread};

const THREADS: u64 = 4;
const BLOCKS: u64 = 32;
const OPS: usize = 2_000;

// Each thread owns the blocks whose index is congruent to its number and reads all of them.
#[test]
fn pinning_under_contention_never_loses_writes() {
    let h = Harness::new(8);

    let finals: Vec<HashMap<u64, u64>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let h = &h;
                scope.spawn(move || {
                    let mut seed = [0; 16];
                    seed[0] = t as u8;
                    let mut rng = rand_pcg::Lcg64Xsh32::from_seed(seed);
                    let mut latest = HashMap::new();

                    for op in 0..OPS as u64 {
                        let index = rng.gen_range(0..BLOCKS);
                        if index % THREADS == t && rng.gen_bool(0.5) {
                            h.write(index, &op.to_le_bytes());
                            latest.insert(index, op);
                        } else {
                            let bytes = h.read(index, 8);
                            if index % THREADS == t {
                                let expected = latest.get(&index).copied().unwrap_or(0);
                                assert_eq!(bytes, expected.to_le_bytes());
                            }
                        }
                    }
                    latest
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    h.manager.flush().unwrap();
    let mem = h.mem.clone();
    let ids: Vec<_> = (0..BLOCKS).map(|index| h.id(index)).collect();
    drop(h);

    for latest in finals {
        for (index, value) in latest {
            assert_eq!(
                &mem.contents(ids[index as usize])[..8],
                &value.to_le_bytes()
            );
        }
    }
}
