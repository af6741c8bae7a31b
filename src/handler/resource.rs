//! Resource handlers
//!
//! One function per CRUD operation. Each reads the request body if needed,
//! calls the resource's store and renders the outcome as a JSON response.

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::error::Error as StdError;

use crate::config::{Resource, ResponseStyle};
use crate::http;
use crate::logger;
use crate::store::{Record, StoreError};

/// Mutation result wrapped with a human-readable message
#[derive(Serialize)]
struct Envelope<'a> {
    message: String,
    data: &'a Record,
}

pub async fn list(resource: &Resource) -> Response<Full<Bytes>> {
    match resource.store.load_all().await {
        Ok(records) => http::build_json_response(StatusCode::OK, &records),
        Err(e) => store_error_response(resource, &e),
    }
}

pub async fn get_one(resource: &Resource, segment: &str) -> Response<Full<Bytes>> {
    let Some(id) = resource.store.parse_id(segment) else {
        return not_found(resource);
    };
    match resource.store.get_one(&id).await {
        Ok(record) => http::build_json_response(StatusCode::OK, &record),
        Err(e) => store_error_response(resource, &e),
    }
}

pub async fn create<B>(
    resource: &Resource,
    req: Request<B>,
    max_body_size: u64,
) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    let fields = match read_json_object(req, max_body_size).await {
        Ok(fields) => fields,
        Err(response) => return response,
    };
    match resource.store.create(fields).await {
        Ok(record) => render(resource, StatusCode::CREATED, &record, || {
            format!("{} added", resource.item_name)
        }),
        Err(e) => store_error_response(resource, &e),
    }
}

pub async fn update<B>(
    resource: &Resource,
    segment: &str,
    req: Request<B>,
    max_body_size: u64,
) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    // The body is validated before the id so a malformed body is always a 400
    let patch = match read_json_object(req, max_body_size).await {
        Ok(patch) => patch,
        Err(response) => return response,
    };
    let Some(id) = resource.store.parse_id(segment) else {
        return not_found(resource);
    };
    match resource.store.update(&id, patch).await {
        Ok(record) => render(resource, StatusCode::OK, &record, || {
            format!("{} updated", resource.item_name)
        }),
        Err(e) => store_error_response(resource, &e),
    }
}

pub async fn delete(resource: &Resource, segment: &str) -> Response<Full<Bytes>> {
    let Some(id) = resource.store.parse_id(segment) else {
        return not_found(resource);
    };
    match resource.store.delete(&id).await {
        Ok(record) => render(resource, StatusCode::OK, &record, || {
            format!("{} {id} deleted", resource.item_name)
        }),
        Err(e) => store_error_response(resource, &e),
    }
}

fn render(
    resource: &Resource,
    status: StatusCode,
    record: &Record,
    message: impl FnOnce() -> String,
) -> Response<Full<Bytes>> {
    match resource.response_style {
        ResponseStyle::Bare => http::build_json_response(status, record),
        ResponseStyle::Envelope => http::build_json_response(
            status,
            &Envelope {
                message: message(),
                data: record,
            },
        ),
    }
}

fn not_found(resource: &Resource) -> Response<Full<Bytes>> {
    http::build_error_response(
        StatusCode::NOT_FOUND,
        &format!("{} not found", resource.item_name),
    )
}

fn store_error_response(resource: &Resource, err: &StoreError) -> Response<Full<Bytes>> {
    if let StoreError::NotFound(_) = err {
        return not_found(resource);
    }

    logger::log_error(&format!("[/{}] {err}", resource.name));
    let message = if err.is_write_failure() {
        "Unable to write DB"
    } else {
        "Unable to read DB"
    };
    http::build_error_response(StatusCode::INTERNAL_SERVER_ERROR, message)
}

/// Buffer the whole body and parse it as a JSON object
async fn read_json_object<B>(
    req: Request<B>,
    max_body_size: u64,
) -> Result<Record, Response<Full<Bytes>>>
where
    B: Body,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    if let Some(response) = check_body_size(&req, max_body_size) {
        return Err(response);
    }

    let limit = usize::try_from(max_body_size).unwrap_or(usize::MAX);
    let bytes = match Limited::new(req.into_body(), limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            logger::log_warning(&format!(
                "Request body exceeded {max_body_size} bytes while streaming"
            ));
            return Err(http::build_413_response());
        }
        Err(e) => {
            logger::log_warning(&format!("Failed to read request body: {e}"));
            return Err(http::build_error_response(
                StatusCode::BAD_REQUEST,
                "Failed to read request body",
            ));
        }
    };

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(record)) => Ok(record),
        Ok(_) => Err(http::build_error_response(
            StatusCode::BAD_REQUEST,
            "Request body must be a JSON object",
        )),
        Err(e) => Err(http::build_error_detail_response(
            StatusCode::BAD_REQUEST,
            "Invalid JSON",
            &e.to_string(),
        )),
    }
}

/// Validate Content-Length header and return 413 if exceeded
fn check_body_size<B>(req: &Request<B>, max_body_size: u64) -> Option<Response<Full<Bytes>>> {
    let content_length = req.headers().get("content-length")?;
    content_length.to_str().map_or_else(
        |_| {
            logger::log_warning("Content-Length header contains non-ASCII characters");
            None
        },
        |size_str| match size_str.parse::<u64>() {
            Ok(size) if size > max_body_size => {
                logger::log_warning(&format!(
                    "Request body too large: {size} bytes (max: {max_body_size})"
                ));
                Some(http::build_413_response())
            }
            Err(_) => {
                logger::log_warning(&format!(
                    "Invalid Content-Length value: '{size_str}', skipping size check"
                ));
                None
            }
            _ => None,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentStore, RecordId, StoreOptions};
    use std::io;
    use std::path::PathBuf;

    fn users() -> Resource {
        Resource {
            name: "users".to_string(),
            item_name: "User".to_string(),
            response_style: ResponseStyle::Bare,
            store: DocumentStore::new("users.json", StoreOptions::default()),
        }
    }

    async fn error_body(err: StoreError) -> (StatusCode, Value) {
        let response = store_error_response(&users(), &err);
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_store_errors_map_to_contract() {
        let path = PathBuf::from("users.json");

        let (status, body) = error_body(StoreError::WriteFailed {
            path: path.clone(),
            source: io::Error::other("disk full"),
        })
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, serde_json::json!({"error": "Unable to write DB"}));

        let (status, body) = error_body(StoreError::Corrupt {
            path,
            reason: "expected value".to_string(),
        })
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, serde_json::json!({"error": "Unable to read DB"}));

        let (status, body) = error_body(StoreError::NotFound(RecordId::Number(3))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, serde_json::json!({"error": "User not found"}));
    }
}
