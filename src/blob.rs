use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use crate::config::Config;

/// Hosted storage for user images.
#[async_trait]
pub trait BlobUploader: Send + Sync {
    /// Store `bytes` and return a public URL for them.
    async fn upload(&self, bytes: Vec<u8>, mime_hint: &str) -> Result<String>;
}

/// Unsigned uploads to Cloudinary using an upload preset.
#[derive(Clone)]
pub struct CloudinaryUploader {
    client: Client,
    cloud_name: String,
    upload_preset: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
}

impl CloudinaryUploader {
    pub fn new(cloud_name: &str, upload_preset: &str) -> Self {
        Self {
            client: Client::new(),
            cloud_name: cloud_name.to_string(),
            upload_preset: upload_preset.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let cloud = config
            .cloudinary_cloud_name
            .as_deref()
            .ok_or_else(|| anyhow!("cloudinary cloud name not configured"))?;
        let preset = config
            .cloudinary_upload_preset
            .as_deref()
            .ok_or_else(|| anyhow!("cloudinary upload preset not configured"))?;
        Ok(Self::new(cloud, preset))
    }

    fn upload_url(&self) -> String {
        format!(
            "https://api.cloudinary.com/v1_1/{}/image/upload",
            self.cloud_name
        )
    }
}

/// File name and MIME type sent for an image; anything but PNG goes as JPEG.
pub fn image_file_name(mime_hint: &str) -> (&'static str, &'static str) {
    let hint = mime_hint.to_ascii_lowercase();
    if hint == "png" || hint.ends_with("/png") || hint.ends_with(".png") {
        ("avatar.png", "image/png")
    } else {
        ("avatar.jpg", "image/jpeg")
    }
}

#[async_trait]
impl BlobUploader for CloudinaryUploader {
    async fn upload(&self, bytes: Vec<u8>, mime_hint: &str) -> Result<String> {
        let (file_name, mime) = image_file_name(mime_hint);
        let part = Part::bytes(bytes).file_name(file_name).mime_str(mime)?;
        let form = Form::new()
            .part("file", part)
            .text("upload_preset", self.upload_preset.clone());

        let resp = self
            .client
            .post(self.upload_url())
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("image upload failed: {} - {}", status, body));
        }

        let uploaded: UploadResponse = resp
            .json()
            .await
            .context("unexpected upload response")?;
        info!(url = %uploaded.secure_url, "image uploaded");
        Ok(uploaded.secure_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_detection() {
        assert_eq!(image_file_name("image/png"), ("avatar.png", "image/png"));
        assert_eq!(image_file_name("PNG"), ("avatar.png", "image/png"));
        assert_eq!(image_file_name("photo.png"), ("avatar.png", "image/png"));
        assert_eq!(image_file_name("image/jpeg"), ("avatar.jpg", "image/jpeg"));
        assert_eq!(image_file_name(""), ("avatar.jpg", "image/jpeg"));
    }

    #[test]
    fn requires_configuration() {
        let config = Config::new("k", "p");
        assert!(CloudinaryUploader::from_config(&config).is_err());
        let uploader =
            CloudinaryUploader::from_config(&config.with_cloudinary("demo", "preset")).unwrap();
        assert_eq!(
            uploader.upload_url(),
            "https://api.cloudinary.com/v1_1/demo/image/upload"
        );
    }
}
