pub mod booth;
pub mod config;
pub mod error;
pub mod generation;
pub mod leonardo;
pub mod orchestrator;
pub mod print_queue;
pub mod prompt;
pub mod response;
pub mod translate;

use std::env;
use std::path::Path;

use reqwest::blocking::Response as HttpResponse;

pub use booth::Booth;
pub use config::{EngineConfig, GenerationDefaults, PollPolicy};
pub use error::EngineError;
pub use generation::{GenerationService, RemoteJobStatus, RemoteState, SubmitJobRequest};
pub use leonardo::LeonardoClient;
pub use orchestrator::{ImageSource, Orchestrator, StatusReport, SubmitRequest};
pub use print_queue::{InMemoryPrintStore, PrintQueue, PrintStore, Printer, SimulatedPrinter};
pub use translate::{ChatTranslator, Translator};

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

/// File extension for a downloaded image. Falls back to the URL's own
/// extension, then `jpg`.
pub(crate) fn extension_for_image(mime_type: Option<&str>, url: &str) -> String {
    let from_mime = mime_type
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .and_then(|value| match value.as_str() {
            "image/png" => Some("png"),
            "image/jpeg" | "image/jpg" => Some("jpg"),
            "image/webp" => Some("webp"),
            "image/gif" => Some("gif"),
            _ => None,
        });
    if let Some(ext) = from_mime {
        return ext.to_string();
    }
    let path_part = url.split(['?', '#']).next().unwrap_or_default();
    mime_for_path(Path::new(path_part))
        .and_then(|mime| mime.strip_prefix("image/"))
        .map(|ext| if ext == "jpeg" { "jpg" } else { ext })
        .unwrap_or("jpg")
        .to_string()
}

pub(crate) struct Reply {
    pub code: u16,
    pub success: bool,
    pub body: String,
}

/// Drains a response into status plus body text. Callers map the error
/// string into their own failure kind.
pub(crate) fn read_reply(response: HttpResponse) -> Result<Reply, String> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(|err| format!("response body read failed ({code}): {err}"))?;
    Ok(Reply {
        code,
        success: status.is_success(),
        body,
    })
}
