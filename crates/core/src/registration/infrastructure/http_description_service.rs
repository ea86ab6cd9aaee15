use std::time::Duration;

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;

use crate::config::DescriptionSettings;
use crate::registration::domain::description::{
    parse_structured_reply, Description, DescriptionService,
};
use crate::shared::category::Category;
use crate::shared::constants::PHOTO_JPEG_QUALITY;
use crate::shared::frame::Frame;
use crate::shared::BoxError;

const API_VERSION: &str = "2023-06-01";
/// Longest side of the image sent for description.
const MAX_IMAGE_SIDE: u32 = 800;

const ANIMAL_PROMPT: &str = "You are looking at one animal on a farm, cropped from a security camera. \
Answer in exactly this format:\n\
BREED: <most likely breed, or N/A>\n\
WEIGHT: <estimated live weight in kg as a number, or N/A>\n\
DESCRIPTION: <two sentences on coat colour, markings, horns and any distinctive features>";

const PERSON_PROMPT: &str = "You are looking at one person on a farm, cropped from a security camera. \
Answer in exactly this format:\n\
DESCRIPTION: <two sentences on clothing, build and visible accessories. Do not guess identity, age or ethnicity>";

#[derive(Error, Debug)]
pub enum DescriptionError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("description request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("failed to encode crop: {0}")]
    Encode(#[from] image::ImageError),
    #[error("description service returned no text")]
    EmptyReply,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

/// Describes crops through a hosted vision model over the Messages API.
pub struct HttpDescriptionService {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_tokens: u32,
}

impl HttpDescriptionService {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
        max_tokens: u32,
    ) -> Result<Self, DescriptionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DescriptionError::Client)?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
            max_tokens,
        })
    }

    /// Builds the service from configuration. `None` when descriptions are
    /// disabled or no API key is available.
    pub fn from_settings(settings: &DescriptionSettings) -> Result<Option<Self>, DescriptionError> {
        if !settings.enabled {
            return Ok(None);
        }
        let Some(api_key) = settings.api_key() else {
            log::warn!(
                "Descriptions enabled but ${} is not set; registering without descriptions",
                settings.api_key_env
            );
            return Ok(None);
        };
        Self::new(
            settings.endpoint.clone(),
            settings.model.clone(),
            api_key,
            settings.timeout(),
            settings.max_tokens,
        )
        .map(Some)
    }

    fn request_body(&self, crop: &Frame, category: Category) -> Result<serde_json::Value, DescriptionError> {
        let jpeg = downscaled(crop).encode_jpeg(PHOTO_JPEG_QUALITY)?;
        let prompt = match category {
            Category::Animal => ANIMAL_PROMPT,
            Category::Person => PERSON_PROMPT,
        };
        Ok(serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": "image/jpeg",
                            "data": BASE64_STANDARD.encode(&jpeg),
                        }
                    },
                    { "type": "text", "text": prompt }
                ]
            }]
        }))
    }
}

impl DescriptionService for HttpDescriptionService {
    fn describe(&self, crop: &Frame, category: Category) -> Result<Description, BoxError> {
        let body = self.request_body(crop, category)?;
        let response: MessagesResponse = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(DescriptionError::Request)?;

        let text: String = response
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if text.trim().is_empty() {
            return Err(DescriptionError::EmptyReply.into());
        }
        Ok(parse_structured_reply(&text))
    }
}

/// Shrinks the crop so its longest side is at most [`MAX_IMAGE_SIDE`].
fn downscaled(crop: &Frame) -> Frame {
    let longest = crop.width().max(crop.height());
    if longest <= MAX_IMAGE_SIDE {
        return crop.clone();
    }
    let Some(img) = image::RgbImage::from_raw(crop.width(), crop.height(), crop.data().to_vec())
    else {
        return crop.clone();
    };
    let scale = MAX_IMAGE_SIDE as f64 / longest as f64;
    let w = ((crop.width() as f64 * scale).round() as u32).max(1);
    let h = ((crop.height() as f64 * scale).round() as u32).max(1);
    let resized = image::imageops::resize(&img, w, h, image::imageops::FilterType::Triangle);
    Frame::new(resized.into_raw(), w, h, 3, crop.index())
}
