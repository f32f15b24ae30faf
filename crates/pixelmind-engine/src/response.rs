//! The one place errors become caller-facing JSON.
//!
//! Every operation result is either `{"success": true, ...fields}` or
//! `{"success": false, "error", "kind", "status_code"}`, and each
//! `FailureKind` maps to exactly one status code.

use pixelmind_contracts::jobs::{FailureKind, GenerationJob, JobStatus};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::EngineError;

pub fn status_code_for(kind: FailureKind) -> u16 {
    match kind {
        FailureKind::InvalidRequest => 400,
        FailureKind::FileNotFound | FailureKind::SessionNotFound | FailureKind::InvalidJobId => 404,
        FailureKind::InvalidTransition => 409,
        FailureKind::NoImagesGenerated => 422,
        FailureKind::UploadFailed
        | FailureKind::SubmissionFailed
        | FailureKind::PollFailed
        | FailureKind::DownloadFailed
        | FailureKind::TranslationFailed
        | FailureKind::RemoteJobFailed => 502,
        FailureKind::PollTimeout => 504,
        FailureKind::Storage | FailureKind::Config => 500,
    }
}

pub fn error_body(kind: FailureKind, detail: &str) -> Value {
    json!({
        "success": false,
        "error": detail,
        "kind": kind.as_str(),
        "status_code": status_code_for(kind),
    })
}

pub fn error_response(err: &EngineError) -> Value {
    error_body(err.kind(), &err.to_string())
}

/// Flattens a serializable success value into `{"success": true, ...}`.
/// Non-object values land under `result`.
pub fn respond<T: Serialize>(result: Result<T, EngineError>) -> Value {
    match result {
        Ok(value) => success_body(value),
        Err(err) => error_response(&err),
    }
}

/// Submit answers with the session id and the stored original even when the
/// pipeline failed part way; a FAILED job maps through its recorded failure.
pub fn submit_response(result: Result<GenerationJob, EngineError>) -> Value {
    let job = match result {
        Ok(job) => job,
        Err(err) => return error_response(&err),
    };
    if job.status == JobStatus::Failed {
        let mut body = match job.failure.as_ref() {
            Some(failure) => error_body(failure.kind, &failure.detail),
            None => error_body(FailureKind::Storage, "job failed without a recorded reason"),
        };
        if let Some(object) = body.as_object_mut() {
            object.insert("session_id".to_string(), json!(job.session_id));
        }
        return body;
    }
    json!({
        "success": true,
        "session_id": job.session_id,
        "status": job.status,
        "original_image": job.original_image,
        "remote_job_id": job.remote_job_id,
        "working_instruction": job.working_instruction,
    })
}

fn success_body<T: Serialize>(value: T) -> Value {
    let mut body = Map::new();
    body.insert("success".to_string(), Value::Bool(true));
    match serde_json::to_value(value) {
        Ok(Value::Object(fields)) => {
            for (key, field) in fields {
                if key != "success" {
                    body.insert(key, field);
                }
            }
        }
        Ok(Value::Null) => {}
        Ok(other) => {
            body.insert("result".to_string(), other);
        }
        Err(err) => {
            return error_body(FailureKind::Storage, &format!("failed to serialize response: {err}"));
        }
    }
    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use pixelmind_contracts::jobs::{FailureKind, GenerationJob, JobStatus};
    use serde_json::json;

    use crate::error::EngineError;

    use super::{respond, status_code_for, submit_response};

    #[test]
    fn each_error_kind_maps_to_one_response() {
        let cases = [
            (EngineError::InvalidRequest("copies".to_string()), 400),
            (EngineError::SessionNotFound("abc".to_string()), 404),
            (EngineError::InvalidJobId(7), 404),
            (EngineError::FileNotFound("/x.jpg".to_string()), 404),
            (EngineError::NoImagesGenerated("gen".to_string()), 422),
            (EngineError::PollFailed("500".to_string()), 502),
            (EngineError::PollTimeout { attempts: 40 }, 504),
            (EngineError::Storage("disk".to_string()), 500),
        ];
        for (err, code) in cases {
            let body = respond::<()>(Err(err.clone()));
            assert_eq!(body["success"], json!(false));
            assert_eq!(body["status_code"], json!(code));
            assert_eq!(body["kind"], json!(err.kind().as_str()));
            assert_eq!(body["error"], json!(err.to_string()));
        }
        assert_eq!(status_code_for(FailureKind::Config), 500);
    }

    #[test]
    fn success_flattens_objects_and_wraps_scalars() {
        let body = respond(Ok(json!({ "job_id": 3, "success": "ignored" })));
        assert_eq!(body, json!({ "success": true, "job_id": 3 }));

        let body = respond(Ok("brighten the image"));
        assert_eq!(body, json!({ "success": true, "result": "brighten the image" }));
    }

    #[test]
    fn failed_submission_surfaces_recorded_failure() {
        let mut job = GenerationJob::new("s-1", "brighten", "model", 1, 512, 512);
        job.fail(FailureKind::UploadFailed, "image upload failed: 500")
            .expect("transition allowed");

        let body = submit_response(Ok(job));

        assert_eq!(body["success"], json!(false));
        assert_eq!(body["kind"], json!("upload_failed"));
        assert_eq!(body["status_code"], json!(502));
        assert_eq!(body["session_id"], json!("s-1"));
    }

    #[test]
    fn submitted_job_echoes_session_and_original() {
        let mut job = GenerationJob::new("s-2", "brighten", "model", 1, 512, 512);
        job.original_image = Some("uploads/temp/s-2/original_a.jpg".to_string());
        for next in [JobStatus::Uploading, JobStatus::Translating, JobStatus::Submitted] {
            job.advance(next).expect("forward transition");
        }
        job.remote_job_id = Some("gen-1".to_string());

        let body = submit_response(Ok(job));

        assert_eq!(body["success"], json!(true));
        assert_eq!(body["status"], json!("SUBMITTED"));
        assert_eq!(body["original_image"], json!("uploads/temp/s-2/original_a.jpg"));
    }
}
