use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod category;

pub use category::{map_category, FoodCategory, UnknownCategory};

use crate::nutrition;

/// A recognized food with its identity and descriptive fields.
///
/// The id is assigned once at construction. `category` is set by analysis and
/// only changes through an explicit user edit. `image_ref` points at a stored
/// copy of the processed photo when one was kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodItem {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub category: FoodCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

impl FoodItem {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        category: FoodCategory,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            category,
            image_ref: None,
        }
    }
}

/// Macro and calorie figures as reported by the model, grams for everything
/// but `calories`. Non-negative by convention, not enforced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionInfo {
    pub calories: f64,
    pub protein: f64,
    pub fat: f64,
    pub carbohydrates: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sugar: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiber: Option<f64>,
}

impl NutritionInfo {
    /// Calories derived from the reported macros alone.
    pub fn computed_calories(&self) -> f64 {
        nutrition::calories_from_macros(self.protein, self.carbohydrates, self.fat)
    }

    /// Whether the reported calorie figure agrees with the macros within the
    /// engine tolerance.
    pub fn is_calorie_consistent(&self) -> bool {
        nutrition::is_consistent(self.calories, self.protein, self.carbohydrates, self.fat)
    }
}

/// One accepted analysis. The id is reused across every later edit of the
/// record and `analysis_date` never changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub id: Uuid,
    pub food_item: FoodItem,
    pub nutrition_info: NutritionInfo,
    pub analysis_date: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn new(food_item: FoodItem, nutrition_info: NutritionInfo) -> Self {
        Self {
            id: Uuid::new_v4(),
            food_item,
            nutrition_info,
            analysis_date: Utc::now(),
        }
    }

    /// Returns an edited copy carrying new content under the same identity
    /// and original analysis date.
    pub fn with_content(&self, food_item: FoodItem, nutrition_info: NutritionInfo) -> Self {
        Self {
            id: self.id,
            food_item,
            nutrition_info,
            analysis_date: self.analysis_date,
        }
    }
}
