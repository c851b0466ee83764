use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use morsel_contracts::food::{AnalysisResult, FoodCategory, NutritionInfo};
use morsel_contracts::history::HistoryStore;
use morsel_contracts::nutrition::{daily_calorie_needs, rescale_macros, Sex};
use morsel_engine::{AnalysisEngine, AnalysisOutcome, EngineConfig};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "morsel", version, about = "Meal-photo nutrition analysis and history")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze a meal photo with the configured vision model
    Analyze(AnalyzeArgs),
    /// List saved analyses, optionally for one calendar day
    History(HistoryArgs),
    /// Edit a saved analysis in place
    Edit(EditArgs),
    /// Delete a saved analysis by id
    Delete(DeleteArgs),
    /// Delete every saved analysis
    Clear(ClearArgs),
    /// Estimate daily calorie needs
    Needs(NeedsArgs),
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    /// Path to the meal photo
    image: PathBuf,
    #[arg(long, default_value = ".morsel")]
    data_dir: PathBuf,
    /// Save the result to history
    #[arg(long)]
    save: bool,
    /// Keep the processed image next to the history file
    #[arg(long)]
    keep_image: bool,
    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct HistoryArgs {
    /// Calendar day to list (UTC, YYYY-MM-DD); all days when absent
    #[arg(long)]
    date: Option<NaiveDate>,
    #[arg(long, default_value = ".morsel")]
    data_dir: PathBuf,
    /// Print records as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct EditArgs {
    /// Id of the record to edit
    id: Uuid,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    category: Option<FoodCategory>,
    #[arg(long)]
    calories: Option<f64>,
    #[arg(long)]
    protein: Option<f64>,
    #[arg(long)]
    fat: Option<f64>,
    #[arg(long)]
    carbohydrates: Option<f64>,
    #[arg(long)]
    sugar: Option<f64>,
    #[arg(long)]
    fiber: Option<f64>,
    /// Rescale the macros to match the record's calorie figure
    #[arg(long)]
    rescale: bool,
    #[arg(long, default_value = ".morsel")]
    data_dir: PathBuf,
}

#[derive(Debug, Parser)]
struct DeleteArgs {
    /// Id of the record to delete
    id: Uuid,
    #[arg(long, default_value = ".morsel")]
    data_dir: PathBuf,
}

#[derive(Debug, Parser)]
struct ClearArgs {
    #[arg(long, default_value = ".morsel")]
    data_dir: PathBuf,
}

#[derive(Debug, Parser)]
struct NeedsArgs {
    /// Body weight in kilograms
    #[arg(long)]
    weight: f64,
    /// Height in centimeters
    #[arg(long)]
    height: f64,
    /// Age in years
    #[arg(long)]
    age: f64,
    /// Biological sex: male or female
    #[arg(long)]
    sex: Sex,
    /// Activity multiplier, sedentary 1.2 up to very active 1.9
    #[arg(long, default_value_t = 1.2)]
    activity: f64,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("morsel error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Analyze(args) => run_analyze(args),
        Command::History(args) => run_history(args),
        Command::Edit(args) => run_edit(args),
        Command::Delete(args) => run_delete(args),
        Command::Clear(args) => run_clear(args),
        Command::Needs(args) => run_needs(args),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("morsel_engine=info,morsel_contracts=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn history_store(data_dir: &Path) -> HistoryStore {
    HistoryStore::new(data_dir.join("history.json"))
}

fn run_analyze(args: AnalyzeArgs) -> Result<i32> {
    let bytes = fs::read(&args.image)
        .with_context(|| format!("failed reading {}", args.image.display()))?;
    let mut config = EngineConfig::from_env();
    if args.keep_image {
        config.artifact_dir = Some(args.data_dir.join("images"));
    }
    let engine = AnalysisEngine::new(config);
    let outcome = engine.analyze(&bytes)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome.result)?);
    } else {
        print_outcome(&outcome);
    }

    if args.save {
        let store = history_store(&args.data_dir);
        store.save(&outcome.result)?;
        println!("Saved {} to history.", outcome.result.id);
    }
    Ok(0)
}

fn run_history(args: HistoryArgs) -> Result<i32> {
    let store = history_store(&args.data_dir);
    let mut items = match args.date {
        Some(day) => store.by_date(day),
        None => store.load_all(),
    };
    // newest first for display; the store itself makes no ordering promise
    items.sort_by(|a, b| b.analysis_date.cmp(&a.analysis_date));

    if args.json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(0);
    }
    if items.is_empty() {
        match args.date {
            Some(day) => println!("No saved analyses on {day}."),
            None => println!("No saved analyses."),
        }
        return Ok(0);
    }
    for item in &items {
        println!("{}", format_record_line(item));
    }
    Ok(0)
}

fn run_edit(args: EditArgs) -> Result<i32> {
    let store = history_store(&args.data_dir);
    let Some(existing) = store.load_all().into_iter().find(|item| item.id == args.id) else {
        bail!("no history record with id {}", args.id);
    };
    let updated = apply_edits(&existing, &args);
    store.update(&updated)?;
    println!("Updated {}.", updated.id);
    print_record(&updated);
    Ok(0)
}

fn run_delete(args: DeleteArgs) -> Result<i32> {
    let store = history_store(&args.data_dir);
    if !store.exists(args.id) {
        println!("No history record with id {}.", args.id);
        return Ok(0);
    }
    store.delete(args.id)?;
    println!("Deleted {}.", args.id);
    Ok(0)
}

fn run_clear(args: ClearArgs) -> Result<i32> {
    let store = history_store(&args.data_dir);
    store.clear_all()?;
    println!("History cleared.");
    Ok(0)
}

fn run_needs(args: NeedsArgs) -> Result<i32> {
    if args.activity <= 0.0 {
        bail!("activity multiplier must be positive");
    }
    let needs = daily_calorie_needs(args.weight, args.height, args.age, args.sex, args.activity);
    println!("Estimated daily needs: {needs:.0} kcal");
    Ok(0)
}

fn apply_edits(existing: &AnalysisResult, args: &EditArgs) -> AnalysisResult {
    let mut food_item = existing.food_item.clone();
    if let Some(name) = &args.name {
        food_item.name = name.clone();
    }
    if let Some(description) = &args.description {
        food_item.description = description.clone();
    }
    if let Some(category) = args.category {
        food_item.category = category;
    }

    let mut nutrition_info = existing.nutrition_info.clone();
    if let Some(calories) = args.calories {
        nutrition_info.calories = calories;
    }
    if let Some(protein) = args.protein {
        nutrition_info.protein = protein;
    }
    if let Some(fat) = args.fat {
        nutrition_info.fat = fat;
    }
    if let Some(carbohydrates) = args.carbohydrates {
        nutrition_info.carbohydrates = carbohydrates;
    }
    if let Some(sugar) = args.sugar {
        nutrition_info.sugar = Some(sugar);
    }
    if let Some(fiber) = args.fiber {
        nutrition_info.fiber = Some(fiber);
    }
    if args.rescale {
        let (protein, carbohydrates, fat) = rescale_macros(
            nutrition_info.calories,
            nutrition_info.protein,
            nutrition_info.carbohydrates,
            nutrition_info.fat,
        );
        nutrition_info.protein = protein;
        nutrition_info.carbohydrates = carbohydrates;
        nutrition_info.fat = fat;
    }

    existing.with_content(food_item, nutrition_info)
}

fn print_outcome(outcome: &AnalysisOutcome) {
    print_record(&outcome.result);
    if outcome.consistent {
        println!(
            "Macros imply {:.1} kcal, consistent with the reported figure.",
            outcome.computed_calories
        );
    } else {
        println!(
            "Macros imply {:.1} kcal, more than 10% away from the reported {:.0} kcal.",
            outcome.computed_calories, outcome.result.nutrition_info.calories
        );
    }
}

fn print_record(result: &AnalysisResult) {
    println!("{} ({})", result.food_item.name, result.food_item.category);
    if !result.food_item.description.is_empty() {
        println!("  {}", result.food_item.description);
    }
    print_nutrition(&result.nutrition_info);
    if let Some(image_ref) = &result.food_item.image_ref {
        println!("  image          {image_ref}");
    }
    println!("  id             {}", result.id);
}

fn print_nutrition(info: &NutritionInfo) {
    println!("  calories       {:.1} kcal", info.calories);
    println!("  protein        {:.1} g", info.protein);
    println!("  fat            {:.1} g", info.fat);
    println!("  carbohydrates  {:.1} g", info.carbohydrates);
    if let Some(sugar) = info.sugar {
        println!("  sugar          {sugar:.1} g");
    }
    if let Some(fiber) = info.fiber {
        println!("  fiber          {fiber:.1} g");
    }
}

fn format_record_line(result: &AnalysisResult) -> String {
    format!(
        "{}  {}  {}  ({})  {:.0} kcal",
        result.analysis_date.format("%Y-%m-%d %H:%M"),
        result.id,
        result.food_item.name,
        result.food_item.category,
        result.nutrition_info.calories
    )
}
