use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::ACCEPT;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::config::LeonardoConfig;
use crate::error::EngineError;
use crate::generation::{
    FetchedImage, GenerationService, RemoteImage, RemoteJobStatus, RemoteState, SubmitJobRequest,
};
use crate::{mime_for_path, read_reply, truncate_text};

/// Leonardo.ai REST client: presigned init-image upload, generation jobs,
/// generation status and result download.
pub struct LeonardoClient {
    api_base: String,
    api_key: String,
    http: HttpClient,
}

#[derive(Debug, Clone, PartialEq)]
struct PresignedUpload {
    id: String,
    url: String,
    fields: Map<String, Value>,
}

impl LeonardoClient {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, EngineError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(EngineError::Config("LEONARDO_API_KEY not set".to_string()));
        }
        let http = HttpClient::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| EngineError::Config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            api_base: api_base.into().trim().trim_end_matches('/').to_string(),
            api_key,
            http,
        })
    }

    pub fn from_config(config: &LeonardoConfig) -> Result<Self, EngineError> {
        let Some(api_key) = config.api_key.clone() else {
            return Err(EngineError::Config("LEONARDO_API_KEY not set".to_string()));
        };
        Self::new(&config.api_base, api_key, config.request_timeout)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    fn init_upload(&self, extension: &str) -> Result<PresignedUpload, EngineError> {
        let endpoint = self.endpoint("init-image");
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .header(ACCEPT, "application/json")
            .json(&json!({ "extension": extension }))
            .send()
            .map_err(|err| {
                EngineError::UploadFailed(format!("presign request failed ({endpoint}): {err}"))
            })?;
        let reply = read_reply(response).map_err(EngineError::UploadFailed)?;
        if !reply.success {
            return Err(EngineError::UploadFailed(format!(
                "presign returned {}: {}",
                reply.code,
                truncate_text(&reply.body, 512)
            )));
        }
        let payload: Value = serde_json::from_str(&reply.body).map_err(|err| {
            EngineError::UploadFailed(format!("presign returned invalid JSON: {err}"))
        })?;
        parse_presigned_upload(&payload)
    }
}

impl GenerationService for LeonardoClient {
    fn name(&self) -> &str {
        "leonardo"
    }

    fn upload_image(&self, path: &Path) -> Result<String, EngineError> {
        if !path.is_file() {
            return Err(EngineError::FileNotFound(path.display().to_string()));
        }
        let bytes = fs::read(path)
            .map_err(|err| EngineError::FileNotFound(format!("{}: {err}", path.display())))?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .filter(|ext| !ext.is_empty())
            .unwrap_or_else(|| "jpg".to_string());
        let presigned = self.init_upload(&extension)?;
        debug!(image_id = %presigned.id, "presigned upload issued");

        let mut form = MultipartForm::new();
        for (key, value) in &presigned.fields {
            let text = value
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string());
            form = form.text(key.clone(), text);
        }
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload.jpg")
            .to_string();
        let part = MultipartPart::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_for_path(path).unwrap_or("image/jpeg"))
            .map_err(|err| EngineError::UploadFailed(format!("invalid upload part: {err}")))?;
        form = form.part("file", part);

        let response = self
            .http
            .post(&presigned.url)
            .multipart(form)
            .send()
            .map_err(|err| EngineError::UploadFailed(format!("upload request failed: {err}")))?;
        let reply = read_reply(response).map_err(EngineError::UploadFailed)?;
        if !reply.success {
            return Err(EngineError::UploadFailed(format!(
                "upload returned {}: {}",
                reply.code,
                truncate_text(&reply.body, 512)
            )));
        }
        info!(image_id = %presigned.id, status = reply.code, "image uploaded");
        Ok(presigned.id)
    }

    fn submit_job(&self, request: &SubmitJobRequest) -> Result<String, EngineError> {
        let endpoint = self.endpoint("generations");
        let payload = generation_payload(request);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .header(ACCEPT, "application/json")
            .json(&payload)
            .send()
            .map_err(|err| EngineError::SubmissionFailed {
                status: None,
                body: format!("request failed ({endpoint}): {err}"),
            })?;
        let reply = read_reply(response).map_err(|body| EngineError::SubmissionFailed {
            status: None,
            body,
        })?;
        if !reply.success {
            return Err(EngineError::SubmissionFailed {
                status: Some(reply.code),
                body: truncate_text(&reply.body, 512),
            });
        }
        let parsed: Value =
            serde_json::from_str(&reply.body).map_err(|err| EngineError::SubmissionFailed {
                status: Some(reply.code),
                body: format!("invalid JSON payload: {err}"),
            })?;
        let generation_id = parsed
            .get("sdGenerationJob")
            .and_then(|job| job.get("generationId"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| EngineError::SubmissionFailed {
                status: Some(reply.code),
                body: "response missing sdGenerationJob.generationId".to_string(),
            })?;
        info!(remote_job_id = generation_id, "generation submitted");
        Ok(generation_id.to_string())
    }

    fn poll_status(&self, remote_job_id: &str) -> Result<RemoteJobStatus, EngineError> {
        let endpoint = self.endpoint(&format!("generations/{}", remote_job_id.trim()));
        let response = self
            .http
            .get(&endpoint)
            .bearer_auth(&self.api_key)
            .header(ACCEPT, "application/json")
            .send()
            .map_err(|err| EngineError::PollFailed(format!("request failed ({endpoint}): {err}")))?;
        let reply = read_reply(response).map_err(EngineError::PollFailed)?;
        if !reply.success {
            return Err(EngineError::PollFailed(format!(
                "status {}: {}",
                reply.code,
                truncate_text(&reply.body, 512)
            )));
        }
        let parsed: Value = serde_json::from_str(&reply.body)
            .map_err(|err| EngineError::PollFailed(format!("invalid JSON payload: {err}")))?;
        let status = parse_generation_status(&parsed);
        debug!(remote_job_id, status = %status.raw_status, images = status.images.len(), "generation polled");
        Ok(status)
    }

    fn fetch_image_bytes(&self, url: &str) -> Result<FetchedImage, EngineError> {
        let response = self
            .http
            .get(url)
            .send()
            .map_err(|err| EngineError::DownloadFailed(format!("request failed ({url}): {err}")))?;
        let code = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EngineError::DownloadFailed(format!(
                "{url} returned {code}: {}",
                truncate_text(&body, 512)
            )));
        }
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .map_err(|err| EngineError::DownloadFailed(format!("failed reading {url}: {err}")))?
            .to_vec();
        Ok(FetchedImage { bytes, mime_type })
    }
}

fn generation_payload(request: &SubmitJobRequest) -> Value {
    let mut payload = Map::new();
    payload.insert("height".to_string(), json!(request.height));
    payload.insert("width".to_string(), json!(request.width));
    payload.insert("modelId".to_string(), json!(request.model_id));
    payload.insert("prompt".to_string(), json!(request.prompt));
    payload.insert("num_images".to_string(), json!(request.num_images));
    payload.insert("imagePrompts".to_string(), json!([request.image_id]));
    for (key, value) in &request.extra {
        if payload.contains_key(key) {
            continue;
        }
        payload.insert(key.clone(), value.clone());
    }
    Value::Object(payload)
}

fn parse_presigned_upload(payload: &Value) -> Result<PresignedUpload, EngineError> {
    let Some(upload) = payload.get("uploadInitImage").and_then(Value::as_object) else {
        return Err(EngineError::UploadFailed(
            "presign response missing uploadInitImage".to_string(),
        ));
    };
    let text_field = |key: &str| {
        upload
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                EngineError::UploadFailed(format!("presign response missing uploadInitImage.{key}"))
            })
    };
    let id = text_field("id")?;
    let url = text_field("url")?;
    // `fields` arrives as a JSON-encoded string; tolerate a plain object too.
    let fields = match upload.get("fields") {
        Some(Value::String(raw)) if !raw.trim().is_empty() => {
            serde_json::from_str::<Map<String, Value>>(raw).map_err(|err| {
                EngineError::UploadFailed(format!("presign fields are not a JSON object: {err}"))
            })?
        }
        Some(Value::Object(obj)) => obj.clone(),
        _ => Map::new(),
    };
    Ok(PresignedUpload { id, url, fields })
}

fn parse_generation_status(payload: &Value) -> RemoteJobStatus {
    let generation = payload.get("generations_by_pk");
    let raw_status = generation
        .and_then(|row| row.get("status"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    let state = RemoteState::parse(&raw_status);
    let mut images = Vec::new();
    if state == RemoteState::Complete {
        let rows = generation
            .and_then(|row| row.get("generated_images"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for row in rows {
            let Some(url) = row
                .get("url")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
            else {
                continue;
            };
            images.push(RemoteImage {
                id: row.get("id").and_then(Value::as_str).map(str::to_string),
                url: url.to_string(),
            });
        }
    }
    RemoteJobStatus {
        state,
        raw_status,
        images,
    }
}
