use stripeset_rs::StripeSet;

#[test]
fn test_insert_contains_remove_string() {
    let s: StripeSet<String> = StripeSet::new();
    assert!(s.is_empty());

    // insert new
    assert_eq!(s.insert("abc".to_string()), Ok(true));
    assert_eq!(s.insert("def".to_string()), Ok(true));
    assert_eq!(s.insert("ghi".to_string()), Ok(true));
    assert_eq!(s.len(), 3);

    // duplicate insert is a no-op
    assert_eq!(s.insert("abc".to_string()), Ok(false));
    assert_eq!(s.len(), 3);

    // remove existing
    assert!(s.remove(&"abc".to_string()));
    assert_eq!(s.len(), 2);
    assert!(!s.contains(&"abc".to_string()));

    // the survivors, in some order
    let mut remaining: Vec<String> = s.iter().cloned().collect();
    remaining.sort();
    assert_eq!(remaining, vec!["def".to_string(), "ghi".to_string()]);
}

#[test]
fn test_basic_integer_values() {
    let s: StripeSet<i32> = StripeSet::new();
    assert!(!s.contains(&1));
    assert_eq!(s.insert(1), Ok(true));
    assert!(s.contains(&1));
    assert_eq!(s.insert(1), Ok(false));
    assert!(s.remove(&1));
    assert!(!s.contains(&1));
    assert!(!s.remove(&1));
}

#[test]
fn test_remove_absent_leaves_len_unchanged() {
    let s: StripeSet<u64> = StripeSet::new();
    for i in 0..10u64 {
        assert_eq!(s.insert(i), Ok(true));
    }
    assert!(!s.remove(&999));
    assert_eq!(s.len(), 10);
}

#[test]
fn test_insert_remove_round_trip() {
    let s: StripeSet<u64> = StripeSet::new();
    for i in 0..32u64 {
        let _ = s.insert(i);
    }
    let before = s.len();
    assert!(!s.contains(&77));

    // insert-then-remove restores both predicates
    assert_eq!(s.insert(77), Ok(true));
    assert!(s.contains(&77));
    assert!(s.remove(&77));
    assert!(!s.contains(&77));
    assert_eq!(s.len(), before);
}

#[test]
fn test_len_and_is_empty_semantics() {
    let s: StripeSet<i32> = StripeSet::new();
    assert!(s.is_empty());
    assert_eq!(s.len(), 0);

    for i in 0..10 {
        assert_eq!(s.insert(i), Ok(true));
        assert_eq!(s.len(), (i + 1) as usize);
        assert!(!s.is_empty());
    }

    for i in 0..10 {
        assert!(s.remove(&i));
        assert_eq!(s.len(), (9 - i) as usize);
    }
    assert!(s.is_empty());
}

#[test]
fn test_multiple_values_and_deletions() {
    let s: StripeSet<String> = StripeSet::new();

    for i in 0..100 {
        assert_eq!(s.insert(format!("value_{}", i)), Ok(true));
    }
    for i in 0..100 {
        assert!(s.contains(&format!("value_{}", i)));
    }

    // delete even entries
    for i in (0..100).step_by(2) {
        assert!(s.remove(&format!("value_{}", i)));
    }

    for i in 0..100 {
        let present = s.contains(&format!("value_{}", i));
        assert_eq!(present, i % 2 == 1);
    }
    assert_eq!(s.len(), 50);
}

#[test]
fn test_iteration_visits_each_element_once() {
    let s: StripeSet<u64> = StripeSet::new();
    for i in 0..50u64 {
        let _ = s.insert(i);
    }
    // mixed workload before iterating
    for i in (0..50u64).step_by(3) {
        assert!(s.remove(&i));
    }

    let mut seen: Vec<u64> = s.iter().copied().collect();
    seen.sort_unstable();
    let unique = seen.len();
    seen.dedup();
    assert_eq!(seen.len(), unique, "iteration yielded a duplicate");
    assert_eq!(seen.len(), s.len());
    for v in &seen {
        assert!(v % 3 != 0);
        assert!(s.contains(v));
    }
}

#[test]
fn test_iter_early_termination() {
    let s: StripeSet<i32> = StripeSet::new();
    for i in 0..20 {
        let _ = s.insert(i);
    }

    let mut count = 0;
    for _ in s.iter() {
        count += 1;
        if count >= 5 {
            break;
        }
    }
    assert_eq!(count, 5);
}

#[test]
fn test_from_iterator_and_extend() {
    let mut s: StripeSet<u32> = (0..100u32).collect();
    assert_eq!(s.len(), 100);
    for i in 0..100u32 {
        assert!(s.contains(&i));
    }

    s.extend(50..150u32);
    assert_eq!(s.len(), 150);
    assert!(s.contains(&149));
}

#[test]
fn test_into_iterator_for_ref() {
    let s: StripeSet<u64> = (0..10u64).collect();
    let mut sum = 0u64;
    for v in &s {
        sum += v;
    }
    assert_eq!(sum, (0..10).sum());
}

#[test]
fn test_debug_format_reports_len() {
    let s: StripeSet<i32> = StripeSet::new();
    let _ = s.insert(1);
    let _ = s.insert(2);
    let rendered = format!("{:?}", s);
    assert!(rendered.contains("len: 2"));
}
