use crate::food::CanonicalFood;

// Nutrient values enter the text only as categorical bands, never as numbers.

fn calorie_band(kcal: f64) -> &'static str {
    if kcal <= 50.0 {
        "very low calorie"
    } else if kcal <= 100.0 {
        "low calorie"
    } else if kcal <= 200.0 {
        "moderate calorie"
    } else if kcal <= 400.0 {
        "high calorie"
    } else {
        "very high calorie"
    }
}

fn protein_band(protein: f64) -> &'static str {
    if protein >= 20.0 {
        "very high protein"
    } else if protein >= 15.0 {
        "high protein"
    } else if protein >= 10.0 {
        "moderate protein"
    } else if protein >= 5.0 {
        "some protein"
    } else {
        "low protein"
    }
}

fn fat_band(fat: f64) -> &'static str {
    if fat <= 3.0 {
        "low fat"
    } else if fat <= 10.0 {
        "moderate fat"
    } else {
        "high fat"
    }
}

fn carb_band(carbs: f64) -> &'static str {
    if carbs <= 5.0 {
        "very low carb keto friendly"
    } else if carbs <= 20.0 {
        "low carb"
    } else if carbs <= 45.0 {
        "moderate carb"
    } else {
        "high carb"
    }
}

fn fiber_band(fiber: f64) -> Option<&'static str> {
    if fiber >= 10.0 {
        Some("very high fiber")
    } else if fiber >= 5.0 {
        Some("high fiber")
    } else {
        None
    }
}

fn sugar_band(sugar: f64) -> Option<&'static str> {
    if sugar >= 15.0 {
        Some("high sugar sweet")
    } else if sugar <= 2.0 {
        Some("sugar free")
    } else {
        None
    }
}

fn sodium_band(sodium_mg: f64) -> Option<&'static str> {
    if sodium_mg >= 600.0 {
        Some("high sodium salty")
    } else if sodium_mg <= 140.0 {
        Some("low sodium")
    } else {
        None
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Renders the text that gets embedded for a food.
///
/// Fixed order: name, category, description (when present and not a repeat
/// of the name), then calorie/protein/fat/carb bands, optional
/// fiber/sugar/sodium bands, and composite tags. Identical field values
/// always produce byte-identical output.
pub fn build_embedding_text(food: &CanonicalFood) -> String {
    let name = collapse_whitespace(&food.name.to_lowercase());
    let mut parts: Vec<String> = vec![name.clone(), collapse_whitespace(&food.category.to_lowercase())];

    if let Some(description) = &food.description {
        let description = collapse_whitespace(&description.to_lowercase());
        if !description.is_empty() && description != name {
            parts.push(description);
        }
    }

    let calories = food.calories_per_100g;
    let protein = food.protein_per_100g;
    let fat = food.fat_per_100g;
    let carbs = food.carbs_per_100g;

    parts.push(calorie_band(calories).to_string());
    parts.push(protein_band(protein).to_string());
    parts.push(fat_band(fat).to_string());
    parts.push(carb_band(carbs).to_string());

    for band in [
        fiber_band(food.fiber_per_100g),
        sugar_band(food.sugar_per_100g),
        sodium_band(food.sodium_per_100g),
    ]
    .into_iter()
    .flatten()
    {
        parts.push(band.to_string());
    }

    if protein >= 15.0 && calories <= 200.0 {
        parts.push("lean protein snack".to_string());
    }
    if fat >= 15.0 && carbs <= 10.0 {
        parts.push("ketogenic food".to_string());
    }
    if food.fiber_per_100g >= 5.0 && calories <= 150.0 {
        parts.push("filling low calorie".to_string());
    }

    parts.retain(|p| !p.is_empty());
    parts.join(" ")
}

/// Fills `embedding_text` on every food.
pub fn attach_embedding_text(foods: &mut [CanonicalFood]) {
    for food in foods.iter_mut() {
        food.embedding_text = build_embedding_text(food);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::food::Micronutrients;

    fn chicken() -> CanonicalFood {
        CanonicalFood {
            external_id: "171077".into(),
            name: "Chicken breast, roasted".into(),
            description: Some("Meat only".into()),
            brand: None,
            category: "Poultry Products".into(),
            calories_per_100g: 165.0,
            protein_per_100g: 31.02,
            fat_per_100g: 3.57,
            carbs_per_100g: 0.0,
            fiber_per_100g: 0.0,
            sugar_per_100g: 0.0,
            sodium_per_100g: 74.0,
            nutrients: Micronutrients::default(),
            calories_derived: false,
            data_source: "usda".into(),
            embedding_text: String::new(),
            embedding: None,
        }
    }

    #[test]
    fn test_template_order() {
        assert_eq!(
            build_embedding_text(&chicken()),
            "chicken breast, roasted poultry products meat only moderate calorie very high protein \
             moderate fat very low carb keto friendly sugar free low sodium lean protein snack"
        );
    }

    #[test]
    fn test_identical_fields_give_identical_text() {
        let a = chicken();
        let mut b = chicken();
        b.embedding = Some(vec![0.0; 4]);
        assert_eq!(build_embedding_text(&a).as_bytes(), build_embedding_text(&b).as_bytes());
    }

    #[test]
    fn test_description_equal_to_name_is_not_repeated() {
        let mut food = chicken();
        food.description = Some("CHICKEN   breast, roasted".into());
        let text = build_embedding_text(&food);
        assert_eq!(text.matches("chicken breast").count(), 1);
    }

    #[test]
    fn test_keto_and_fiber_tags() {
        let mut food = chicken();
        food.name = "Chia seeds".into();
        food.description = None;
        food.calories_per_100g = 486.0;
        food.protein_per_100g = 16.54;
        food.fat_per_100g = 30.74;
        food.carbs_per_100g = 8.0;
        food.fiber_per_100g = 34.4;
        food.sodium_per_100g = 700.0;
        let text = build_embedding_text(&food);
        assert!(text.contains("very high fiber"));
        assert!(text.contains("ketogenic food"));
        assert!(text.contains("high sodium salty"));
        assert!(!text.contains("lean protein snack"));
        assert!(!text.contains("filling low calorie"));
    }

    #[test]
    fn test_attach_fills_every_record() {
        let mut foods = vec![chicken(), chicken()];
        attach_embedding_text(&mut foods);
        assert!(foods.iter().all(|f| !f.embedding_text.is_empty()));
    }
}
