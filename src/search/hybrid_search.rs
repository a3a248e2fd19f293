use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::food::CanonicalFood;

pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.78;
pub const DEFAULT_MATCH_COUNT: usize = 20;

/// Structured filters. `None` never constrains the result; a bound of zero
/// is a real bound. Contradictory bounds (min > max) are not rejected, they
/// simply match nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub min_calories: Option<f64>,
    pub max_calories: Option<f64>,
    pub min_protein: Option<f64>,
    pub max_protein: Option<f64>,
    pub min_carbs: Option<f64>,
    pub max_carbs: Option<f64>,
    pub min_fat: Option<f64>,
    pub max_fat: Option<f64>,
    pub max_sugar: Option<f64>,
    pub min_sodium: Option<f64>,
    pub max_sodium: Option<f64>,
    /// Case-insensitive substring of the category.
    pub category: Option<String>,
}

fn within(value: f64, min: Option<f64>, max: Option<f64>) -> bool {
    min.map_or(true, |lo| value >= lo) && max.map_or(true, |hi| value <= hi)
}

impl SearchFilters {
    pub fn matches(&self, food: &CanonicalFood) -> bool {
        within(food.calories_per_100g, self.min_calories, self.max_calories)
            && within(food.protein_per_100g, self.min_protein, self.max_protein)
            && within(food.carbs_per_100g, self.min_carbs, self.max_carbs)
            && within(food.fat_per_100g, self.min_fat, self.max_fat)
            && within(food.sugar_per_100g, None, self.max_sugar)
            && within(food.sodium_per_100g, self.min_sodium, self.max_sodium)
            && self.category.as_ref().map_or(true, |needle| {
                food.category.to_lowercase().contains(&needle.to_lowercase())
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    pub match_threshold: f64,
    pub match_count: usize,
    pub filters: SearchFilters,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            match_count: DEFAULT_MATCH_COUNT,
            filters: SearchFilters::default(),
        }
    }
}

/// One ranked row of a hybrid query. `id` is the food's external id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub name: String,
    pub category: String,
    pub calories_per_100g: f64,
    pub protein_per_100g: f64,
    pub fat_per_100g: f64,
    pub carbs_per_100g: f64,
    pub fiber_per_100g: f64,
    pub sugar_per_100g: f64,
    pub sodium_per_100g: f64,
    pub similarity: f64,
}

impl SearchHit {
    fn from_food(food: &CanonicalFood, similarity: f64) -> Self {
        Self {
            id: food.external_id.clone(),
            name: food.name.clone(),
            category: food.category.clone(),
            calories_per_100g: food.calories_per_100g,
            protein_per_100g: food.protein_per_100g,
            fat_per_100g: food.fat_per_100g,
            carbs_per_100g: food.carbs_per_100g,
            fiber_per_100g: food.fiber_per_100g,
            sugar_per_100g: food.sugar_per_100g,
            sodium_per_100g: food.sodium_per_100g,
            similarity,
        }
    }
}

/// A stored food paired with its vector.
#[derive(Debug, Clone, Copy)]
pub struct SearchCandidate<'a> {
    pub food: &'a CanonicalFood,
    pub embedding: &'a [f32],
}

/// `1 - cosine_distance`. Zero-length vectors or mismatched lengths score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Similarity threshold, then filters, then similarity-descending order
/// (ties by id), then truncation to `match_count`.
pub fn hybrid_search(candidates: &[SearchCandidate<'_>], query: &[f32], params: &SearchParams) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = candidates
        .par_iter()
        .filter_map(|candidate| {
            let similarity = cosine_similarity(query, candidate.embedding);
            // NaN never passes the threshold.
            if !(similarity >= params.match_threshold) || !params.filters.matches(candidate.food) {
                return None;
            }
            Some(SearchHit::from_food(candidate.food, similarity))
        })
        .collect();

    hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity).then_with(|| a.id.cmp(&b.id)));
    hits.truncate(params.match_count);
    hits
}

/// Runs [`hybrid_search`] over foods that carry their embedding inline.
/// Foods without an embedding are not candidates.
pub fn search_foods(foods: &[CanonicalFood], query: &[f32], params: &SearchParams) -> Vec<SearchHit> {
    let candidates: Vec<SearchCandidate<'_>> = foods
        .iter()
        .filter_map(|food| {
            food.embedding
                .as_deref()
                .map(|embedding| SearchCandidate { food, embedding })
        })
        .collect();
    hybrid_search(&candidates, query, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::food::Micronutrients;

    fn food(id: &str, category: &str, protein: f64, sugar: f64, embedding: Vec<f32>) -> CanonicalFood {
        CanonicalFood {
            external_id: id.to_string(),
            name: format!("food {}", id),
            description: None,
            brand: None,
            category: category.to_string(),
            calories_per_100g: 150.0,
            protein_per_100g: protein,
            fat_per_100g: 5.0,
            carbs_per_100g: 10.0,
            fiber_per_100g: 1.0,
            sugar_per_100g: sugar,
            sodium_per_100g: 100.0,
            nutrients: Micronutrients::default(),
            calories_derived: false,
            data_source: "usda".into(),
            embedding_text: String::new(),
            embedding: Some(embedding),
        }
    }

    fn corpus() -> Vec<CanonicalFood> {
        vec![
            food("a", "Poultry Products", 25.0, 0.0, vec![1.0, 0.0, 0.0]),
            food("b", "Dairy and Egg Products", 20.0, 4.0, vec![0.9, 0.1, 0.0]),
            food("c", "Sweets", 2.0, 60.0, vec![0.8, 0.2, 0.0]),
            food("d", "Poultry Products", 31.0, 0.0, vec![0.95, 0.05, 0.0]),
            food("e", "Vegetables", 30.0, 1.0, vec![0.0, 1.0, 0.0]),
        ]
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-12);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-12);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-12);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_protein_range_is_inclusive() {
        let params = SearchParams {
            match_threshold: -1.0,
            filters: SearchFilters { min_protein: Some(20.0), max_protein: Some(30.0), ..Default::default() },
            ..Default::default()
        };
        let hits = search_foods(&corpus(), &[1.0, 0.0, 0.0], &params);
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "e"]);
        assert!(hits.iter().all(|h| (20.0..=30.0).contains(&h.protein_per_100g)));
    }

    #[test]
    fn test_unset_filters_never_remove_candidates() {
        let params = SearchParams { match_threshold: -1.0, ..Default::default() };
        assert_eq!(search_foods(&corpus(), &[1.0, 0.0, 0.0], &params).len(), 5);
    }

    #[test]
    fn test_zero_bound_is_a_real_bound() {
        let params = SearchParams {
            match_threshold: -1.0,
            filters: SearchFilters { max_sugar: Some(0.0), ..Default::default() },
            ..Default::default()
        };
        let ids: Vec<_> = search_foods(&corpus(), &[1.0, 0.0, 0.0], &params).into_iter().map(|h| h.id).collect();
        assert_eq!(ids, ["a", "d"]);
    }

    #[test]
    fn test_threshold_and_ordering() {
        let hits = search_foods(&corpus(), &[1.0, 0.0, 0.0], &SearchParams::default());
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        // "e" is orthogonal to the query and falls below 0.78.
        assert_eq!(ids, ["a", "d", "b", "c"]);
        assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        assert!(hits.iter().all(|h| h.similarity >= DEFAULT_MATCH_THRESHOLD));
    }

    #[test]
    fn test_non_finite_scores_never_match() {
        let mut foods = corpus();
        foods[1].embedding = Some(vec![f32::NAN, 1.0, 0.0]);
        let ids: Vec<_> = search_foods(&foods, &[1.0, 0.0, 0.0], &SearchParams::default())
            .into_iter()
            .map(|h| h.id)
            .collect();
        assert_eq!(ids, ["a", "d", "c"]);

        let open = SearchParams { match_threshold: -1.0, ..Default::default() };
        assert!(search_foods(&corpus(), &[f32::NAN, 0.0, 0.0], &open).is_empty());
        let hits = search_foods(&foods, &[1.0, 0.0, 0.0], &open);
        assert!(hits.iter().all(|h| h.similarity.is_finite()));
    }

    #[test]
    fn test_category_is_case_insensitive_substring() {
        let params = SearchParams {
            match_threshold: -1.0,
            filters: SearchFilters { category: Some("POULTRY".into()), ..Default::default() },
            ..Default::default()
        };
        let ids: Vec<_> = search_foods(&corpus(), &[1.0, 0.0, 0.0], &params).into_iter().map(|h| h.id).collect();
        assert_eq!(ids, ["a", "d"]);
    }

    #[test]
    fn test_contradictory_filters_yield_empty_result() {
        let params = SearchParams {
            match_threshold: -1.0,
            filters: SearchFilters { min_protein: Some(30.0), max_protein: Some(10.0), ..Default::default() },
            ..Default::default()
        };
        assert!(search_foods(&corpus(), &[1.0, 0.0, 0.0], &params).is_empty());
    }

    #[test]
    fn test_match_count_truncates_and_missing_embedding_skipped() {
        let mut foods = corpus();
        foods[0].embedding = None;
        let params = SearchParams { match_threshold: -1.0, match_count: 2, ..Default::default() };
        let ids: Vec<_> = search_foods(&foods, &[1.0, 0.0, 0.0], &params).into_iter().map(|h| h.id).collect();
        assert_eq!(ids, ["d", "b"]);
    }
}
