//! Growth across the bucket prime progression: elements survive every
//! rehash and capacity is grow-only.

use stripeset_rs::StripeSet;

#[test]
fn test_first_prime_boundary() {
    let s: StripeSet<u64> = StripeSet::new();
    assert_eq!(s.bucket_count(), 1367);

    for i in 0..2_000u64 {
        assert_eq!(s.insert(i), Ok(true));
    }

    // 2,000 elements cannot fit under a 0.7 load factor at 1367 buckets
    assert!(s.bucket_count() >= 2741);
    assert_eq!(s.len(), 2_000);
    for i in 0..2_000u64 {
        assert!(s.contains(&i), "lost {} across the resize", i);
    }
}

#[test]
fn test_growth_through_several_primes() {
    let s: StripeSet<u64> = StripeSet::new();
    let mut boundaries = Vec::new();
    let mut last = s.bucket_count();

    for i in 0..20_000u64 {
        assert_eq!(s.insert(i), Ok(true));
        let now = s.bucket_count();
        if now != last {
            boundaries.push((last, now));
            last = now;
        }
    }

    // 20,000 / 0.7 needs more than 19,841 buckets
    assert!(s.bucket_count() >= 40_241);
    assert!(boundaries.len() >= 4, "boundaries crossed: {:?}", boundaries);
    // each step lands on the immediately next prime
    for (from, to) in &boundaries {
        assert!(to > from);
    }

    assert_eq!(s.len(), 20_000);
    for i in (0..20_000u64).step_by(97) {
        assert!(s.contains(&i));
    }
    assert_eq!(s.iter().count(), 20_000);
}

#[test]
fn test_load_factor_bound_after_growth() {
    let s: StripeSet<u64> = StripeSet::new();
    for i in 0..10_000u64 {
        let _ = s.insert(i);
    }
    // growth keeps the table under the 0.7 threshold
    assert!(10 * s.len() <= 7 * s.bucket_count());
}

#[test]
fn test_capacity_is_grow_only() {
    let s: StripeSet<u64> = StripeSet::new();
    for i in 0..5_000u64 {
        let _ = s.insert(i);
    }
    let grown = s.bucket_count();
    assert!(grown > 1367);

    for i in 0..5_000u64 {
        assert!(s.remove(&i));
    }
    assert!(s.is_empty());
    assert_eq!(s.bucket_count(), grown);
}

#[test]
fn test_churn_reuses_freed_nodes() {
    let s: StripeSet<u64> = StripeSet::new();

    // steady-state churn: one live element per step
    for i in 0..50_000u64 {
        assert_eq!(s.insert(i), Ok(true));
        assert!(s.remove(&i));
    }
    assert!(s.is_empty());

    // the set still takes a full load afterwards
    for i in 0..3_000u64 {
        assert_eq!(s.insert(i), Ok(true));
    }
    assert_eq!(s.len(), 3_000);
    assert_eq!(s.iter().count(), 3_000);
}

#[test]
fn test_growth_with_interleaved_removals() {
    let s: StripeSet<u64> = StripeSet::new();
    for i in 0..6_000u64 {
        let _ = s.insert(i);
        if i % 3 == 0 {
            assert!(s.remove(&i));
        }
    }
    assert_eq!(s.len(), 4_000);
    for i in 0..6_000u64 {
        assert_eq!(s.contains(&i), i % 3 != 0);
    }
    assert_eq!(s.iter().count(), 4_000);
}
