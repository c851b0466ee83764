//! # morsel-contracts
//!
//! Domain types and durable state for the Morsel nutrition analyzer: the
//! food/nutrition record model, the category keyword rules, the pure calorie
//! math, and the JSON-file history store.

pub mod food;
pub mod history;
pub mod nutrition;

pub use food::{AnalysisResult, FoodCategory, FoodItem, NutritionInfo};
pub use history::{HistoryError, HistoryStore};
