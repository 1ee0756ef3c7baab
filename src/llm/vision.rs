use base64::Engine as _;

use super::{classify_error, complete, extract_json, ChatMessage, InlineImage, Sampling};
use crate::config::LlmConfig;
use crate::error::{AppError, Result};
use crate::models::ExtractedProduct;

const SAMPLING: Sampling = Sampling {
    temperature: 0.3,
    max_tokens: 500,
};

const EXTRACTION_PROMPT: &str = "Analyze this product image and extract the product details. \
Respond with ONLY a JSON object with these keys: \
\"product_name\" (string), \"description\" (string), \"category\" (string), \
\"brand\" (string or null), \"specifications\" (object of string values), \
\"estimated_price_range\" (string, e.g. \"$100-$200\"). No explanation.";

/// Image formats accepted for extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Bmp,
}

impl ImageFormat {
    /// Identify the format from the leading magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(Self::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else if bytes.starts_with(b"BM") && bytes.len() > 14 {
            Some(Self::Bmp)
        } else {
            None
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Bmp => "image/bmp",
        }
    }
}

/// Reject declared names or content types that are outside the allowed set.
pub fn check_declared_type(file_name: Option<&str>, content_type: Option<&str>) -> Result<()> {
    if let Some(name) = file_name {
        if let Some((_, ext)) = name.rsplit_once('.') {
            let ext = ext.to_ascii_lowercase();
            if !matches!(ext.as_str(), "png" | "jpg" | "jpeg" | "gif" | "bmp") {
                return Err(AppError::Validation(format!(
                    "Unsupported file extension '.{ext}', expected png, jpg, jpeg, gif or bmp"
                )));
            }
        }
    }
    if let Some(ct) = content_type {
        let ct = ct.to_ascii_lowercase();
        let allowed = matches!(
            ct.as_str(),
            "image/png" | "image/jpeg" | "image/jpg" | "image/gif" | "image/bmp"
                | "image/x-ms-bmp" | "application/octet-stream"
        );
        if !allowed {
            return Err(AppError::Validation(format!("Unsupported content type '{ct}'")));
        }
    }
    Ok(())
}

/// Validate the upload and return its sniffed format.
pub fn validate_image(bytes: &[u8], max_bytes: usize) -> Result<ImageFormat> {
    if bytes.is_empty() {
        return Err(AppError::Validation("Image is empty".to_string()));
    }
    if bytes.len() > max_bytes {
        return Err(AppError::Validation(format!(
            "Image is {} bytes, limit is {max_bytes}",
            bytes.len()
        )));
    }
    ImageFormat::sniff(bytes).ok_or_else(|| {
        AppError::Validation("Unsupported image format, expected PNG, JPEG, GIF or BMP".to_string())
    })
}

/// Send the image to the vision model and parse the product it describes.
pub async fn extract_product(
    client: &reqwest::Client,
    config: &LlmConfig,
    bytes: &[u8],
    format: ImageFormat,
) -> Result<ExtractedProduct> {
    super::ensure_ready(config).map_err(|e| AppError::Configuration(format!("{e:#}")))?;

    let image = InlineImage {
        mime: format.mime(),
        base64: base64::engine::general_purpose::STANDARD.encode(bytes),
    };
    let messages = [ChatMessage::user(EXTRACTION_PROMPT).with_image(image)];

    let text = complete(client, config, &config.vision_model, &messages, SAMPLING)
        .await
        .map_err(|e| classify_error(&e, AppError::ExtractionFailure))?;

    let product = parse_extraction(&text)?;
    tracing::info!(product = %product.product_name, "Extracted product from image");
    Ok(product)
}

fn parse_extraction(text: &str) -> Result<ExtractedProduct> {
    let value = extract_json(text).ok_or_else(|| {
        AppError::ExtractionFailure("Vision model did not return JSON".to_string())
    })?;

    let product: ExtractedProduct = serde_json::from_value(value).map_err(|e| {
        AppError::ExtractionFailure(format!("Vision model returned an unexpected shape: {e}"))
    })?;

    if product.product_name.trim().is_empty() {
        return Err(AppError::ExtractionFailure(
            "Vision model did not identify a product".to_string(),
        ));
    }
    Ok(product)
}
