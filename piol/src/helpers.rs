//! Helper functions used in testing sort and I/O implementations,
//! specifically seeded metadata generators.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::meta::param::TraceMetadata;
use crate::meta::rule::{Key, Rule};

/// Metadata fixture for testing: `n` records with coordinates drawn
/// uniformly from a small integer grid, so comparator ties occur, and
/// consecutive global trace numbers from `first_gtn`.
///
/// Only keys present in `rule` are populated. The same seed always yields
/// the same records.
///
/// # Arguments
/// * `rule` - Schema for the generated store.
/// * `n` - Number of records to generate.
/// * `first_gtn` - Global trace number of the first record.
/// * `seed` - Random seed.
pub fn random_metadata(rule: &Arc<Rule>, n: usize, first_gtn: u64, seed: u64) -> TraceMetadata {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut prm = TraceMetadata::new(Arc::clone(rule), n);
    for i in 0..n {
        for key in [Key::XSrc, Key::YSrc, Key::XRcv, Key::YRcv, Key::XCmp, Key::YCmp] {
            let val = f64::from(rng.gen_range(0..100i32));
            let _ = prm.set_f64(i, key, val);
        }
        for key in [Key::Il, Key::Xl, Key::Offset] {
            let _ = prm.set_i64(i, key, i64::from(rng.gen_range(0..50i32)));
        }
        let _ = prm.set_i64(i, Key::Tn, (first_gtn + i as u64) as i64);
        let _ = prm.set_index(i, Key::Ltn, i as u64);
        let _ = prm.set_index(i, Key::Gtn, first_gtn + i as u64);
    }
    prm
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fixture_is_deterministic() {
        let rule = Arc::new(Rule::default_rule());
        let a = random_metadata(&rule, 8, 3, 11);
        let b = random_metadata(&rule, 8, 3, 11);
        for i in 0..8 {
            assert_eq!(
                a.get_f64(i, Key::XSrc).unwrap(),
                b.get_f64(i, Key::XSrc).unwrap()
            );
            assert_eq!(a.get_index(i, Key::Gtn).unwrap(), 3 + i as u64);
            assert_eq!(a.get_index(i, Key::Ltn).unwrap(), i as u64);
        }
    }
}
