use std::collections::HashSet;

use crate::food::CanonicalFood;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleOutcome {
    pub foods: Vec<CanonicalFood>,
    /// Later occurrences of an already-seen `external_id`.
    pub duplicates: usize,
    /// Unique records left out because the sample was full.
    pub truncated: usize,
}

/// Keeps the first occurrence of every `external_id` and truncates to the
/// first `sample_size` unique records in source order. `None` keeps all.
///
/// Deterministic: the same input and size always give the same output.
/// Duplicates are counted across the whole input, including records past the
/// truncation point, so the count does not depend on the sample size.
pub fn dedup_and_sample<I>(foods: I, sample_size: Option<usize>) -> SampleOutcome
where
    I: IntoIterator<Item = CanonicalFood>,
{
    let mut seen = HashSet::new();
    let mut outcome = SampleOutcome::default();

    for food in foods {
        if !seen.insert(food.external_id.clone()) {
            outcome.duplicates += 1;
            continue;
        }
        match sample_size {
            Some(limit) if outcome.foods.len() >= limit => outcome.truncated += 1,
            _ => outcome.foods.push(food),
        }
    }
    outcome
}
