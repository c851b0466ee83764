//! Meal-photo analysis pipeline: image preprocessing, vision-model request
//! construction and transport, structured-response parsing, and the
//! orchestrating [`AnalysisEngine`].

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use morsel_contracts::food::{map_category, AnalysisResult, FoodItem, NutritionInfo};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 800;
pub const DEFAULT_JPEG_QUALITY: f32 = 0.7;
pub const DEFAULT_REQUEST_TIMEOUT_S: u64 = 60;
pub const DEFAULT_MAX_HISTORY_ITEMS: usize = 100;

const SYSTEM_PROMPT: &str = "You are a nutritional analysis expert. Analyze the food in the image and provide detailed nutritional information. Return JSON with the following structure: {\"name\": \"Food name\", \"description\": \"Description\", \"category\": \"Category\", \"calories\": \"Number\", \"protein\": \"Number in grams\", \"fat\": \"Number in grams\", \"carbohydrates\": \"Number in grams\", \"sugar\": \"Number in grams (optional)\", \"fiber\": \"Number in grams (optional)\"}";

const USER_PROMPT: &str = "What food is in this image? Analyze its nutritional content and ingredients. Return the information in JSON format.";

/// Pipeline configuration. `max_history_items` is declared for parity with
/// the persisted settings surface and enforced nowhere.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub max_image_dimension: u32,
    pub jpeg_quality: f32,
    pub request_timeout_s: u64,
    pub artifact_dir: Option<PathBuf>,
    pub max_history_items: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_image_dimension: DEFAULT_MAX_IMAGE_DIMENSION,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            request_timeout_s: DEFAULT_REQUEST_TIMEOUT_S,
            artifact_dir: None,
            max_history_items: DEFAULT_MAX_HISTORY_ITEMS,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.api_key =
            non_empty_env("MORSEL_API_KEY").or_else(|| non_empty_env("OPENAI_API_KEY"));
        if let Some(base) = non_empty_env("MORSEL_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(model) = non_empty_env("MORSEL_MODEL") {
            config.model = model;
        }
        if let Some(dimension) = non_empty_env("MORSEL_MAX_IMAGE_DIMENSION")
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|value| *value > 0)
        {
            config.max_image_dimension = dimension;
        }
        if let Some(quality) = non_empty_env("MORSEL_JPEG_QUALITY")
            .and_then(|value| value.parse::<f32>().ok())
        {
            config.jpeg_quality = quality.clamp(0.0, 1.0);
        }
        if let Some(timeout) = non_empty_env("MORSEL_REQUEST_TIMEOUT_S")
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
        {
            config.request_timeout_s = timeout;
        }
        config
    }

    fn chat_endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

/// One terminal failure per analysis attempt; nothing here is retried.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("failed to process image: {0}")]
    ImageConversion(String),
    #[error("API key is not configured")]
    MissingCredential,
    #[error("request to vision model failed: {0}")]
    Transport(String),
    #[error("{message}")]
    Api { message: String },
    #[error("failed to parse response")]
    MalformedResponse,
}

/// A successful analysis plus the advisory consistency verdict. The record is
/// not persisted; saving it is the caller's explicit step.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub result: AnalysisResult,
    pub computed_calories: f64,
    pub consistent: bool,
}

/// Decodes arbitrary image bytes, bounds the longest edge to `max_dimension`
/// preserving aspect ratio (never upscaling), and re-encodes as JPEG at the
/// given quality in [0, 1].
pub fn prepare_image(
    bytes: &[u8],
    max_dimension: u32,
    quality: f32,
) -> Result<Vec<u8>, AnalysisError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|err| AnalysisError::ImageConversion(err.to_string()))?;
    let bounded = if decoded.width().max(decoded.height()) > max_dimension {
        decoded.resize(max_dimension, max_dimension, FilterType::Triangle)
    } else {
        decoded
    };
    let rgb = bounded.to_rgb8();
    let mut encoded = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut encoded, jpeg_quality_steps(quality));
    encoder
        .encode_image(&DynamicImage::ImageRgb8(rgb))
        .map_err(|err| AnalysisError::ImageConversion(err.to_string()))?;
    Ok(encoded)
}

fn jpeg_quality_steps(quality: f32) -> u8 {
    ((quality.clamp(0.0, 1.0) * 100.0).round() as u8).max(1)
}

/// Chat-completions request body: the nutrition-expert instruction plus the
/// image as a base64 JPEG data URL.
pub fn build_analysis_payload(model: &str, jpeg_bytes: &[u8]) -> Value {
    let data_url = format!("data:image/jpeg;base64,{}", BASE64.encode(jpeg_bytes));
    json!({
        "model": model,
        "messages": [
            {
                "role": "system",
                "content": SYSTEM_PROMPT,
            },
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": USER_PROMPT },
                    { "type": "image_url", "image_url": { "url": data_url } }
                ],
            }
        ],
        "max_tokens": 1000,
        "response_format": { "type": "json_object" },
    })
}

#[derive(Debug, Deserialize)]
struct ChatCompletionEnvelope {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct NutritionPayload {
    name: String,
    description: String,
    category: String,
    calories: f64,
    protein: f64,
    fat: f64,
    carbohydrates: f64,
    #[serde(default)]
    sugar: Option<f64>,
    #[serde(default)]
    fiber: Option<f64>,
}

/// Decodes the model's two-layer response: the completion envelope, then the
/// JSON-encoded nutrition payload inside `choices[0].message.content`.
///
/// An upstream `error.message` is surfaced verbatim before any envelope
/// decoding is attempted; everything else that does not match the expected
/// shape fails closed as [`AnalysisError::MalformedResponse`].
pub fn parse_analysis_response(body: &str) -> Result<(FoodItem, NutritionInfo), AnalysisError> {
    if let Some(message) = upstream_error_message(body) {
        return Err(AnalysisError::Api { message });
    }
    let envelope: ChatCompletionEnvelope =
        serde_json::from_str(body).map_err(|_| AnalysisError::MalformedResponse)?;
    let content = envelope
        .choices
        .first()
        .map(|choice| choice.message.content.as_str())
        .ok_or(AnalysisError::MalformedResponse)?;
    let payload: NutritionPayload =
        serde_json::from_str(content).map_err(|_| AnalysisError::MalformedResponse)?;

    let category = map_category(&payload.category);
    let food_item = FoodItem::new(payload.name, payload.description, category);
    let nutrition_info = NutritionInfo {
        calories: payload.calories,
        protein: payload.protein,
        fat: payload.fat,
        carbohydrates: payload.carbohydrates,
        sugar: payload.sugar,
        fiber: payload.fiber,
    };
    Ok((food_item, nutrition_info))
}

fn upstream_error_message(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    parsed
        .get("error")?
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Drives one analysis: preprocess, request, parse, and (optionally) keep the
/// processed image as an artifact. Persistence stays with the caller.
pub struct AnalysisEngine {
    config: EngineConfig,
    http: HttpClient,
}

impl AnalysisEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            http: HttpClient::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn analyze(&self, image_bytes: &[u8]) -> Result<AnalysisOutcome, AnalysisError> {
        let jpeg = prepare_image(
            image_bytes,
            self.config.max_image_dimension,
            self.config.jpeg_quality,
        )?;
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(AnalysisError::MissingCredential)?;
        let payload = build_analysis_payload(&self.config.model, &jpeg);
        let body = self.send_request(api_key, &payload)?;
        let (mut food_item, nutrition_info) = parse_analysis_response(&body)?;

        if let Some(dir) = self.config.artifact_dir.as_deref() {
            match store_image_artifact(dir, &jpeg) {
                Ok(path) => food_item.image_ref = Some(path.to_string_lossy().to_string()),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to keep processed image, continuing without it");
                }
            }
        }

        let computed_calories = nutrition_info.computed_calories();
        let consistent = nutrition_info.is_calorie_consistent();
        let result = AnalysisResult::new(food_item, nutrition_info);
        tracing::debug!(
            id = %result.id,
            name = %result.food_item.name,
            consistent,
            "analysis complete"
        );
        Ok(AnalysisOutcome {
            result,
            computed_calories,
            consistent,
        })
    }

    fn send_request(&self, api_key: &str, payload: &Value) -> Result<String, AnalysisError> {
        let endpoint = self.config.chat_endpoint();
        tracing::debug!(%endpoint, model = %self.config.model, "sending analysis request");
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .header(CONTENT_TYPE, "application/json")
            .timeout(Duration::from_secs(self.config.request_timeout_s))
            .json(payload)
            .send()
            .map_err(|err| AnalysisError::Transport(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|err| AnalysisError::Transport(err.to_string()))?;
        if !status.is_success() {
            if let Some(message) = upstream_error_message(&body) {
                return Err(AnalysisError::Api { message });
            }
            return Err(AnalysisError::Transport(format!(
                "vision model request failed ({}): {}",
                status.as_u16(),
                truncate_text(&body, 512)
            )));
        }
        Ok(body)
    }
}

/// Writes the processed JPEG under `dir`, named by its content digest, and
/// returns the path. Re-analyzing the same image reuses the existing file.
fn store_image_artifact(dir: &Path, jpeg: &[u8]) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed creating {}", dir.display()))?;
    let digest = hex::encode(Sha256::digest(jpeg));
    let path = dir.join(format!("{}.jpg", &digest[..16]));
    if !path.exists() {
        fs::write(&path, jpeg).with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(path)
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgb, RgbImage};
    use morsel_contracts::food::FoodCategory;
    use serde_json::{json, Value};

    use super::{
        build_analysis_payload, parse_analysis_response, prepare_image, store_image_artifact,
        AnalysisEngine, AnalysisError, EngineConfig,
    };

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([180, 90, 40]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode png");
        bytes
    }

    fn envelope_with(content: &str) -> String {
        json!({
            "choices": [{ "message": { "content": content } }]
        })
        .to_string()
    }

    fn apple_content() -> String {
        json!({
            "name": "Apple",
            "description": "A red apple",
            "category": "Fruit",
            "calories": 95,
            "protein": 0.5,
            "fat": 0.3,
            "carbohydrates": 25
        })
        .to_string()
    }

    #[test]
    fn prepare_image_bounds_the_longest_edge() {
        let encoded = prepare_image(&png_bytes(1600, 900), 800, 0.7).expect("prepare");
        assert_eq!(image::guess_format(&encoded).expect("format"), ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&encoded).expect("decode");
        assert_eq!((decoded.width(), decoded.height()), (800, 450));
    }

    #[test]
    fn prepare_image_keeps_small_inputs_at_size() {
        let encoded = prepare_image(&png_bytes(200, 120), 800, 0.7).expect("prepare");
        let decoded = image::load_from_memory(&encoded).expect("decode");
        assert_eq!((decoded.width(), decoded.height()), (200, 120));
    }

    #[test]
    fn prepare_image_rejects_undecodable_bytes() {
        let err = prepare_image(b"not an image", 800, 0.7).expect_err("must fail");
        assert!(matches!(err, AnalysisError::ImageConversion(_)));
    }

    #[test]
    fn payload_carries_prompt_and_data_url() {
        let payload = build_analysis_payload("gpt-4o", b"jpegbytes");
        assert_eq!(payload["model"], json!("gpt-4o"));
        assert_eq!(payload["max_tokens"], json!(1000));
        assert_eq!(payload["response_format"]["type"], json!("json_object"));

        let messages = payload["messages"].as_array().expect("messages");
        assert_eq!(messages[0]["role"], json!("system"));
        let instruction = messages[0]["content"].as_str().expect("system content");
        assert!(instruction.contains("nutritional analysis expert"));
        assert!(instruction.contains("\"carbohydrates\""));

        assert_eq!(messages[1]["role"], json!("user"));
        let user_parts = messages[1]["content"].as_array().expect("user content");
        assert_eq!(user_parts[0]["type"], json!("text"));
        let url = user_parts[1]["image_url"]["url"].as_str().expect("url");
        assert!(url.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn parses_a_well_formed_analysis() {
        let (food_item, nutrition_info) =
            parse_analysis_response(&envelope_with(&apple_content())).expect("parse");
        assert_eq!(food_item.name, "Apple");
        assert_eq!(food_item.category, FoodCategory::Fruit);
        assert_eq!(nutrition_info.calories, 95.0);
        assert_eq!(nutrition_info.carbohydrates, 25.0);
        assert_eq!(nutrition_info.sugar, None);
        // reported 95 against computed 104.7 is within the 10% margin
        assert!(nutrition_info.is_calorie_consistent());
    }

    #[test]
    fn unmapped_category_resolves_to_unknown() {
        let content = json!({
            "name": "Mystery Plate",
            "description": "Hard to say",
            "category": "Street Food",
            "calories": 400,
            "protein": 12,
            "fat": 18,
            "carbohydrates": 45
        })
        .to_string();
        let (food_item, _) = parse_analysis_response(&envelope_with(&content)).expect("parse");
        assert_eq!(food_item.category, FoodCategory::Unknown);
    }

    #[test]
    fn upstream_error_message_is_surfaced_verbatim() {
        let body = json!({ "error": { "message": "rate limited" } }).to_string();
        let err = parse_analysis_response(&body).expect_err("must fail");
        match err {
            AnalysisError::Api { message } => assert_eq!(message, "rate limited"),
            other => panic!("expected Api error, got {other:?}"),
        }
        // the Display form is the message alone
        let body = json!({ "error": { "message": "rate limited" } }).to_string();
        let err = parse_analysis_response(&body).expect_err("must fail");
        assert_eq!(err.to_string(), "rate limited");
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let content = json!({
            "name": "Apple",
            "description": "A red apple",
            "category": "Fruit",
            // calories absent
            "protein": 0.5,
            "fat": 0.3,
            "carbohydrates": 25
        })
        .to_string();
        let err = parse_analysis_response(&envelope_with(&content)).expect_err("must fail");
        assert!(matches!(err, AnalysisError::MalformedResponse));
    }

    #[test]
    fn mistyped_field_fails_closed() {
        let content = json!({
            "name": "Apple",
            "description": "A red apple",
            "category": "Fruit",
            "calories": "95",
            "protein": 0.5,
            "fat": 0.3,
            "carbohydrates": 25
        })
        .to_string();
        let err = parse_analysis_response(&envelope_with(&content)).expect_err("must fail");
        assert!(matches!(err, AnalysisError::MalformedResponse));
    }

    #[test]
    fn unparseable_layers_are_malformed() {
        assert!(matches!(
            parse_analysis_response("not json at all"),
            Err(AnalysisError::MalformedResponse)
        ));
        assert!(matches!(
            parse_analysis_response(&envelope_with("still not json")),
            Err(AnalysisError::MalformedResponse)
        ));
        assert!(matches!(
            parse_analysis_response(&json!({ "choices": [] }).to_string()),
            Err(AnalysisError::MalformedResponse)
        ));
    }

    #[test]
    fn analyze_without_credential_fails_before_any_request() {
        let engine = AnalysisEngine::new(EngineConfig::default());
        let err = engine.analyze(&png_bytes(64, 64)).expect_err("must fail");
        assert!(matches!(err, AnalysisError::MissingCredential));
    }

    #[test]
    fn artifact_path_is_stable_for_identical_bytes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = store_image_artifact(temp.path(), b"jpeg-bytes").expect("store");
        let second = store_image_artifact(temp.path(), b"jpeg-bytes").expect("store");
        assert_eq!(first, second);
        assert!(first.exists());
        assert_eq!(std::fs::read(&first).expect("read"), b"jpeg-bytes");
    }

    #[test]
    fn config_defaults_match_the_analysis_profile() {
        let config = EngineConfig::default();
        assert_eq!(config.max_image_dimension, 800);
        assert_eq!(config.jpeg_quality, 0.7);
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.max_history_items, 100);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn parsed_value_shapes_survive_serialization() {
        // the payload builder must emit plain JSON, no enum tags or nulls
        let payload = build_analysis_payload("gpt-4o", b"x");
        let reparsed: Value =
            serde_json::from_str(&payload.to_string()).expect("round trip");
        assert_eq!(reparsed, payload);
    }
}
