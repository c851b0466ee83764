//! Pure calorie math: macro-derived calories, the consistency check applied
//! to model-reported figures, ratio-preserving macro rescaling, and the
//! Harris-Benedict daily-needs estimate.

use std::str::FromStr;

pub const PROTEIN_CALORIES_PER_GRAM: f64 = 4.0;
pub const CARB_CALORIES_PER_GRAM: f64 = 4.0;
pub const FAT_CALORIES_PER_GRAM: f64 = 9.0;

/// Reported calories may differ from macro-derived calories by this relative
/// margin before a record is flagged inconsistent.
pub const CONSISTENCY_TOLERANCE: f64 = 0.10;

/// Calories implied by the macronutrient content alone.
pub fn calories_from_macros(protein: f64, carbohydrates: f64, fat: f64) -> f64 {
    protein * PROTEIN_CALORIES_PER_GRAM
        + carbohydrates * CARB_CALORIES_PER_GRAM
        + fat * FAT_CALORIES_PER_GRAM
}

/// Whether a reported calorie figure agrees with the macros within tolerance.
///
/// When the macros imply zero calories, only a reported zero counts as
/// consistent.
pub fn is_consistent(reported: f64, protein: f64, carbohydrates: f64, fat: f64) -> bool {
    let computed = calories_from_macros(protein, carbohydrates, fat);
    if computed == 0.0 {
        return reported == 0.0;
    }
    (reported - computed).abs() / computed <= CONSISTENCY_TOLERANCE
}

/// Scales the macros so their implied calories hit `target_calories`,
/// preserving the protein:carb:fat ratio. All-zero macros stay all-zero.
pub fn rescale_macros(
    target_calories: f64,
    protein: f64,
    carbohydrates: f64,
    fat: f64,
) -> (f64, f64, f64) {
    let current = calories_from_macros(protein, carbohydrates, fat);
    if current == 0.0 {
        return (0.0, 0.0, 0.0);
    }
    let ratio = target_calories / current;
    (protein * ratio, carbohydrates * ratio, fat * ratio)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sex {
    Male,
    Female,
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized sex '{0}', expected 'male' or 'female'")]
pub struct UnknownSex(String);

impl FromStr for Sex {
    type Err = UnknownSex;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Ok(Sex::Male),
            "female" | "f" => Ok(Sex::Female),
            _ => Err(UnknownSex(raw.trim().to_string())),
        }
    }
}

/// Estimated daily calorie needs: Harris-Benedict basal metabolic rate scaled
/// by an activity multiplier (sedentary 1.2 up to very active 1.9).
pub fn daily_calorie_needs(
    weight_kg: f64,
    height_cm: f64,
    age_years: f64,
    sex: Sex,
    activity_level: f64,
) -> f64 {
    let bmr = match sex {
        Sex::Male => 88.362 + 13.397 * weight_kg + 4.799 * height_cm - 5.677 * age_years,
        Sex::Female => 447.593 + 9.247 * weight_kg + 3.098 * height_cm - 4.330 * age_years,
    };
    bmr * activity_level
}
