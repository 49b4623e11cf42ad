//! Entry selection: unsent-first uniform random choice.

use keepsake_core::types::Entry;
use rand::Rng;

/// Pick exactly one entry to send.
///
/// Never-sent entries are preferred; once a user has used up all fresh
/// entries, delivery continues by resending a uniform random choice
/// over the whole set. An empty set selects nothing. Ties break by a
/// uniform draw, not recency, so resurfacing stays unpredictable.
pub fn pick_entry<'a, R: Rng>(entries: &'a [Entry], rng: &mut R) -> Option<&'a Entry> {
    if entries.is_empty() {
        return None;
    }
    let unsent: Vec<&Entry> = entries.iter().filter(|e| !e.sent).collect();
    if !unsent.is_empty() {
        return Some(unsent[rng.gen_range(0..unsent.len())]);
    }
    Some(&entries[rng.gen_range(0..entries.len())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn entry(id: &str, sent: bool) -> Entry {
        let mut e = Entry::new("u1", format!("entry {id}"));
        e.id = id.into();
        e.sent = sent;
        e
    }

    #[test]
    fn test_empty_selects_nothing() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(pick_entry(&[], &mut rng).is_none());
    }

    #[test]
    fn test_unsent_preferred_over_sent() {
        let entries = vec![
            entry("a", true),
            entry("b", false),
            entry("c", true),
            entry("d", false),
        ];
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let picked = pick_entry(&entries, &mut rng).unwrap();
            assert!(!picked.sent, "picked a sent entry while unsent exist");
        }
    }

    #[test]
    fn test_all_sent_falls_back_to_resend() {
        let entries = vec![entry("a", true), entry("b", true)];
        let mut rng = StdRng::seed_from_u64(1);
        let picked = pick_entry(&entries, &mut rng).unwrap();
        assert!(entries.iter().any(|e| e.id == picked.id));
    }

    #[test]
    fn test_selection_is_roughly_uniform() {
        // With N unsent entries each should be picked with frequency
        // about 1/N over many trials.
        let n = 5;
        let entries: Vec<Entry> = (0..n).map(|i| entry(&format!("e{i}"), false)).collect();
        let mut rng = StdRng::seed_from_u64(1234);

        let trials = 20_000;
        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..trials {
            let picked = pick_entry(&entries, &mut rng).unwrap();
            *counts.entry(picked.id.clone()).or_default() += 1;
        }

        let expected = trials as f64 / n as f64;
        for (id, count) in counts {
            let deviation = (f64::from(count) - expected).abs() / expected;
            assert!(deviation < 0.1, "entry {id}: {count} picks, off by {deviation:.3}");
        }
    }

    #[test]
    fn test_deterministic_for_fixed_seed() {
        let entries = vec![entry("a", false), entry("b", false), entry("c", false)];
        let first = pick_entry(&entries, &mut StdRng::seed_from_u64(99)).unwrap();
        let second = pick_entry(&entries, &mut StdRng::seed_from_u64(99)).unwrap();
        assert_eq!(first.id, second.id);
    }
}
