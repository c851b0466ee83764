use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed set of food categories a record can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FoodCategory {
    Fruit,
    Vegetable,
    Grain,
    Protein,
    Dairy,
    Fat,
    Dessert,
    Beverage,
    Mixed,
    Unknown,
}

impl FoodCategory {
    pub const ALL: &'static [FoodCategory] = &[
        FoodCategory::Fruit,
        FoodCategory::Vegetable,
        FoodCategory::Grain,
        FoodCategory::Protein,
        FoodCategory::Dairy,
        FoodCategory::Fat,
        FoodCategory::Dessert,
        FoodCategory::Beverage,
        FoodCategory::Mixed,
        FoodCategory::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FoodCategory::Fruit => "Fruit",
            FoodCategory::Vegetable => "Vegetable",
            FoodCategory::Grain => "Grain",
            FoodCategory::Protein => "Protein",
            FoodCategory::Dairy => "Dairy",
            FoodCategory::Fat => "Fat",
            FoodCategory::Dessert => "Dessert",
            FoodCategory::Beverage => "Beverage",
            FoodCategory::Mixed => "Mixed",
            FoodCategory::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for FoodCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized food category '{0}'")]
pub struct UnknownCategory(String);

impl FromStr for FoodCategory {
    type Err = UnknownCategory;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let lowered = raw.trim().to_ascii_lowercase();
        FoodCategory::ALL
            .iter()
            .find(|category| category.as_str().to_ascii_lowercase() == lowered)
            .copied()
            .ok_or_else(|| UnknownCategory(raw.trim().to_string()))
    }
}

/// Keyword rules applied to a model-reported category label, in priority
/// order. The first rule whose keyword occurs in the lowercased label wins;
/// a label matching none resolves to `Unknown`.
const CATEGORY_RULES: &[(&str, FoodCategory)] = &[
    ("fruit", FoodCategory::Fruit),
    ("vegetable", FoodCategory::Vegetable),
    ("grain", FoodCategory::Grain),
    ("protein", FoodCategory::Protein),
    ("meat", FoodCategory::Protein),
    ("dairy", FoodCategory::Dairy),
    ("fat", FoodCategory::Fat),
    ("dessert", FoodCategory::Dessert),
    ("beverage", FoodCategory::Beverage),
    ("mixed", FoodCategory::Mixed),
];

/// Maps a free-text category label onto the closed category set.
pub fn map_category(raw: &str) -> FoodCategory {
    let lowered = raw.trim().to_ascii_lowercase();
    for (keyword, category) in CATEGORY_RULES {
        if lowered.contains(keyword) {
            return *category;
        }
    }
    FoodCategory::Unknown
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::{map_category, FoodCategory};

    #[test]
    fn maps_plain_labels() {
        assert_eq!(map_category("Fruit"), FoodCategory::Fruit);
        assert_eq!(map_category("vegetable"), FoodCategory::Vegetable);
        assert_eq!(map_category("Grain"), FoodCategory::Grain);
        assert_eq!(map_category("Dairy"), FoodCategory::Dairy);
        assert_eq!(map_category("Dessert"), FoodCategory::Dessert);
        assert_eq!(map_category("Beverage"), FoodCategory::Beverage);
    }

    #[test]
    fn maps_meat_to_protein() {
        assert_eq!(map_category("Red Meat"), FoodCategory::Protein);
        assert_eq!(map_category("meat dish"), FoodCategory::Protein);
    }

    #[test]
    fn maps_embedded_keywords() {
        assert_eq!(map_category("Grilled Chicken Protein"), FoodCategory::Protein);
        assert_eq!(map_category("Fresh fruit salad"), FoodCategory::Fruit);
        assert_eq!(map_category("Whole Grain Bowl"), FoodCategory::Grain);
    }

    #[test]
    fn earlier_rule_wins_on_multiple_matches() {
        // "protein" precedes "mixed" in the rule order
        assert_eq!(map_category("mixed protein"), FoodCategory::Protein);
        // "fruit" precedes everything else
        assert_eq!(map_category("mixed fruit dessert"), FoodCategory::Fruit);
    }

    #[test]
    fn mixed_grill_regression() {
        // no earlier keyword occurs in the label, so the "mixed" rule applies
        assert_eq!(map_category("Mixed Grill"), FoodCategory::Mixed);
    }

    #[test]
    fn unmatched_labels_resolve_to_unknown() {
        assert_eq!(map_category("Unidentified Snack"), FoodCategory::Unknown);
        assert_eq!(map_category("Quinoa Bowl"), FoodCategory::Unknown);
        assert_eq!(map_category(""), FoodCategory::Unknown);
    }

    #[test]
    fn from_str_accepts_exact_names_case_insensitively() {
        assert_eq!(FoodCategory::from_str("Fruit").expect("parse"), FoodCategory::Fruit);
        assert_eq!(FoodCategory::from_str("beverage").expect("parse"), FoodCategory::Beverage);
        assert_eq!(FoodCategory::from_str(" MIXED ").expect("parse"), FoodCategory::Mixed);
        assert!(FoodCategory::from_str("snack").is_err());
    }
}
