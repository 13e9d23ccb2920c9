//! API handlers for the `/api/*` HTTP endpoints. Device work is delegated to
//! the shared controller and always runs on the blocking pool; the upload
//! size ceiling and content-type policy live here, not in the core.

use std::path::Path;
use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::web::{self, Data, Json, Query};
use actix_web::{HttpResponse, Responder, get, post};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::control::{ControlError, CurrentArt, HybridController, ImageFormat, OperationReply};
use crate::store;
use crate::unsplash::UnsplashClient;

/// Display-side ceiling for a single image.
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct ImageItem {
    pub file: String,
    pub remote_id: Option<String>,
}

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound(String),
    TooLarge(String),
    Control(ControlError),
    Internal(String),
}

impl ApiError {
    fn respond(&self) -> HttpResponse {
        match self {
            Self::BadRequest(msg) => HttpResponse::BadRequest().json(json!({ "error": msg })),
            Self::NotFound(msg) => HttpResponse::NotFound().json(json!({ "error": msg })),
            Self::TooLarge(msg) => HttpResponse::PayloadTooLarge().json(json!({ "error": msg })),
            Self::Control(err) => control_failure(err),
            Self::Internal(msg) => {
                error!(error = %msg, "request failed");
                HttpResponse::InternalServerError().json(json!({ "error": msg }))
            }
        }
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Internal(format!("store: {e}"))
    }
}

/// A failed orchestrator call: a pure capability gap is the caller's
/// problem, anything else is an upstream failure.
fn control_failure(err: &ControlError) -> HttpResponse {
    let body = json!({ "error": err.to_string() });
    if err.all_unsupported() {
        HttpResponse::BadRequest().json(body)
    } else {
        HttpResponse::BadGateway().json(body)
    }
}

fn worker_failure() -> HttpResponse {
    HttpResponse::InternalServerError().json(json!({ "error": "blocking worker failed" }))
}

/// File names arrive from clients; anything that could walk out of the
/// image directory is rejected before touching the filesystem.
fn valid_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && !name.contains('\\') && !name.contains("..")
}

// ============================================================================
// Image Library
// ============================================================================

#[get("/api/images")]
pub async fn list_images(config: Data<Config>) -> impl Responder {
    let image_dir = config.image_dir.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<Vec<ImageItem>, ApiError> {
        let conn = store::new_connection()?;
        let entries = match std::fs::read_dir(&image_dir) {
            Ok(entries) => entries,
            // A missing directory just means nothing has been uploaded yet.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ApiError::Internal(format!("read {image_dir}: {e}"))),
        };
        let mut items = Vec::new();
        for entry in entries.flatten() {
            let file = entry.file_name().to_string_lossy().to_string();
            let mime = mime_guess::from_path(&file).first_or_octet_stream();
            if ImageFormat::from_mime(mime.essence_str()).is_none() {
                continue;
            }
            let remote_id = store::remote_id_for(&conn, &file)?;
            items.push(ImageItem { file, remote_id });
        }
        items.sort_by(|a, b| a.file.cmp(&b.file));
        Ok(items)
    })
    .await;

    match result {
        Ok(Ok(items)) => HttpResponse::Ok().json(items),
        Ok(Err(err)) => err.respond(),
        Err(_) => worker_failure(),
    }
}

#[post("/api/upload")]
pub async fn upload_image(config: Data<Config>, mut payload: Multipart) -> impl Responder {
    while let Some(item) = payload.next().await {
        let mut field = match item {
            Ok(field) => field,
            Err(e) => {
                return HttpResponse::BadRequest()
                    .json(json!({ "error": format!("multipart: {e}") }));
            }
        };
        let Some(format) = field
            .content_type()
            .map(|mime| mime.essence_str().to_string())
            .and_then(|essence| ImageFormat::from_mime(&essence))
        else {
            return HttpResponse::BadRequest()
                .json(json!({ "error": "only JPEG and PNG uploads are accepted" }));
        };
        let requested_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string);

        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    return HttpResponse::BadRequest()
                        .json(json!({ "error": format!("read upload: {e}") }));
                }
            };
            if bytes.len() + chunk.len() > MAX_UPLOAD_BYTES {
                return HttpResponse::PayloadTooLarge()
                    .json(json!({ "error": "upload exceeds the 10 MiB limit" }));
            }
            bytes.extend_from_slice(&chunk);
        }

        let image_dir = config.image_dir.clone();
        let saved = web::block(move || {
            save_local_image(&image_dir, requested_name.as_deref(), format, &bytes)
        })
        .await;
        return match saved {
            Ok(Ok(file)) => {
                info!(file = %file, "image stored locally");
                HttpResponse::Ok().json(ImageItem {
                    file,
                    remote_id: None,
                })
            }
            Ok(Err(err)) => err.respond(),
            Err(_) => worker_failure(),
        };
    }
    HttpResponse::BadRequest().json(json!({ "error": "no file field in upload" }))
}

/// Store upload bytes in the image directory under a collision-free name.
fn save_local_image(
    image_dir: &str,
    requested: Option<&str>,
    format: ImageFormat,
    bytes: &[u8],
) -> Result<String, ApiError> {
    std::fs::create_dir_all(image_dir)
        .map_err(|e| ApiError::Internal(format!("create {image_dir}: {e}")))?;

    let stem = requested
        .map(|name| {
            Path::new(name)
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_default()
        })
        .filter(|stem| !stem.is_empty() && valid_file_name(stem))
        .unwrap_or_else(|| "image".to_string());
    let ext = format.extension();

    let mut file = format!("{stem}.{ext}");
    let mut counter = 1;
    while Path::new(image_dir).join(&file).exists() {
        file = format!("{stem}_{counter}.{ext}");
        counter += 1;
    }
    std::fs::write(Path::new(image_dir).join(&file), bytes)
        .map_err(|e| ApiError::Internal(format!("write {file}: {e}")))?;
    Ok(file)
}

// ============================================================================
// Display Control
// ============================================================================

#[derive(Deserialize)]
pub struct SendToDeviceRequest {
    file: String,
}

#[post("/api/send-to-device")]
pub async fn send_to_device(
    config: Data<Config>,
    controller: Data<Arc<HybridController>>,
    body: Json<SendToDeviceRequest>,
) -> impl Responder {
    let file = body.file.clone();
    if !valid_file_name(&file) {
        return HttpResponse::BadRequest().json(json!({ "error": "invalid file name" }));
    }
    let image_dir = config.image_dir.clone();
    let controller = controller.get_ref().clone();

    let result = web::block(move || -> Result<ImageItem, ApiError> {
        let path = Path::new(&image_dir).join(&file);
        let Some(format) = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(ImageFormat::from_extension)
        else {
            return Err(ApiError::BadRequest("unsupported file format".to_string()));
        };
        if !path.exists() {
            return Err(ApiError::NotFound(format!("no local image named {file}")));
        }

        let conn = store::new_connection()?;
        if let Some(remote_id) = store::remote_id_for(&conn, &file)? {
            // Already on the display; keep the existing handle.
            return Ok(ImageItem {
                file,
                remote_id: Some(remote_id),
            });
        }

        let bytes =
            std::fs::read(&path).map_err(|e| ApiError::Internal(format!("read {file}: {e}")))?;
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(ApiError::TooLarge(
                "file exceeds the 10 MiB display limit".to_string(),
            ));
        }

        let outcome = controller
            .upload_image(bytes, format, "none")
            .map_err(ApiError::Control)?;
        let OperationReply::Uploaded(upload) = outcome.reply else {
            return Err(ApiError::Internal("unexpected upload reply".to_string()));
        };
        store::record_upload(&conn, &file, &upload.remote_id)?;
        info!(file = %file, remote_id = %upload.remote_id, "image sent to display");
        Ok(ImageItem {
            file,
            remote_id: Some(upload.remote_id),
        })
    })
    .await;

    match result {
        Ok(Ok(item)) => HttpResponse::Ok().json(item),
        Ok(Err(err)) => err.respond(),
        Err(_) => worker_failure(),
    }
}

#[derive(Deserialize)]
pub struct SetImageRequest {
    remote_id: String,
    #[serde(default = "default_show")]
    show: bool,
}

fn default_show() -> bool {
    true
}

#[post("/api/set-image")]
pub async fn set_image(
    controller: Data<Arc<HybridController>>,
    body: Json<SetImageRequest>,
) -> impl Responder {
    let remote_id = body.remote_id.clone();
    let show = body.show;
    let controller = controller.get_ref().clone();

    let result = web::block(move || controller.select_image(&remote_id, show)).await;
    match result {
        Ok(Ok(outcome)) => match outcome.reply {
            OperationReply::Selected { targeted: true } => HttpResponse::Ok().json(json!({
                "status": "success",
                "message": "image selected on the display",
            })),
            OperationReply::Selected { targeted: false } => HttpResponse::Ok().json(json!({
                "status": "success",
                "targeted": false,
                "message": "display switched to art mode; cloud control cannot target a specific image",
            })),
            _ => HttpResponse::InternalServerError()
                .json(json!({ "error": "unexpected selection reply" })),
        },
        Ok(Err(err)) => control_failure(&err),
        Err(_) => worker_failure(),
    }
}

#[get("/api/current-image")]
pub async fn current_image(controller: Data<Arc<HybridController>>) -> impl Responder {
    let controller = controller.get_ref().clone();
    let result = web::block(move || controller.current_art()).await;
    match result {
        Ok(Ok(outcome)) => match outcome.reply {
            OperationReply::CurrentArt(CurrentArt::Artwork {
                content_id,
                details,
            }) => HttpResponse::Ok().json(json!({
                "status": "success",
                "source": "direct",
                "content_id": content_id,
                "details": details,
            })),
            OperationReply::CurrentArt(CurrentArt::Mode { mode }) => {
                HttpResponse::Ok().json(json!({
                    "status": "success",
                    "source": "cloud",
                    "mode": mode,
                    "message": "cloud control reports only the active picture mode",
                }))
            }
            _ => HttpResponse::InternalServerError()
                .json(json!({ "error": "unexpected current-art reply" })),
        },
        Ok(Err(err)) if err.all_unsupported() => HttpResponse::Ok().json(json!({
            "status": "no_current_image",
            "message": "no image information available from either channel",
        })),
        Ok(Err(err)) => control_failure(&err),
        Err(_) => worker_failure(),
    }
}

#[get("/api/device-status")]
pub async fn device_status(
    config: Data<Config>,
    controller: Data<Arc<HybridController>>,
) -> impl Responder {
    let controller = controller.get_ref().clone();
    let device_addr = config.device_addr.clone();

    let result = web::block(move || {
        let supported = match controller.art_supported() {
            Ok(outcome) => matches!(outcome.reply, OperationReply::Supported(true)),
            Err(err) => {
                warn!(error = %err, "device status probe failed");
                return json!({
                    "status": "error",
                    "message": err.to_string(),
                    "device_addr": device_addr,
                    "art_mode_supported": false,
                });
            }
        };
        if !supported {
            return json!({
                "status": "error",
                "message": "this display does not support art mode",
                "device_addr": device_addr,
                "art_mode_supported": false,
            });
        }

        let current_art = controller.current_art().ok().and_then(|o| match o.reply {
            OperationReply::CurrentArt(art) => serde_json::to_value(art).ok(),
            _ => None,
        });
        let device_info = controller.device_info().ok().and_then(|o| match o.reply {
            OperationReply::DeviceInfo(info) => Some(info),
            _ => None,
        });
        json!({
            "status": "success",
            "message": "display reachable and art mode available",
            "device_addr": device_addr,
            "art_mode_supported": true,
            "current_art": current_art,
            "device_info": device_info,
        })
    })
    .await;

    match result {
        Ok(body) => HttpResponse::Ok().json(body),
        Err(_) => worker_failure(),
    }
}

// ============================================================================
// Photo Search
// ============================================================================

#[derive(Deserialize)]
pub struct SearchQuery {
    query: String,
}

#[get("/api/search-photos")]
pub async fn search_photos(config: Data<Config>, query: Query<SearchQuery>) -> impl Responder {
    let Some(access_key) = config.unsplash_access_key.clone() else {
        return HttpResponse::InternalServerError()
            .json(json!({ "error": "UNSPLASH_ACCESS_KEY is not configured" }));
    };
    let term = query.query.clone();
    let result =
        tokio::task::spawn_blocking(move || UnsplashClient::new(access_key).search(&term)).await;
    match result {
        Ok(Ok(photos)) => HttpResponse::Ok().json(photos),
        Ok(Err(e)) => {
            error!(error = %e, "photo search failed");
            HttpResponse::BadGateway().json(json!({ "error": e }))
        }
        Err(_) => worker_failure(),
    }
}

#[get("/api/featured-photos")]
pub async fn featured_photos(config: Data<Config>) -> impl Responder {
    let Some(access_key) = config.unsplash_access_key.clone() else {
        return HttpResponse::InternalServerError()
            .json(json!({ "error": "UNSPLASH_ACCESS_KEY is not configured" }));
    };
    let result =
        tokio::task::spawn_blocking(move || UnsplashClient::new(access_key).featured()).await;
    match result {
        Ok(Ok(photos)) => HttpResponse::Ok().json(photos),
        Ok(Err(e)) => {
            error!(error = %e, "featured photos fetch failed");
            HttpResponse::BadGateway().json(json!({ "error": e }))
        }
        Err(_) => worker_failure(),
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

#[get("/api/debug/status")]
pub async fn debug_status(controller: Data<Arc<HybridController>>) -> impl Responder {
    let controller = controller.get_ref().clone();
    let result = web::block(move || {
        let probe = controller.art_supported();
        let (supported, channel) = match &probe {
            Ok(outcome) => (
                matches!(outcome.reply, OperationReply::Supported(true)),
                Some(outcome.channel),
            ),
            Err(_) => (false, None),
        };
        json!({
            "art_supported": supported,
            "probe_channel": channel,
            "probe_error": probe.err().map(|e| e.to_string()),
            "cloud_token_configured": controller.cloud_configured(),
            "cloud_identity": controller.cloud_identity().map(|identity| identity.device_id),
        })
    })
    .await;
    match result {
        Ok(body) => HttpResponse::Ok().json(body),
        Err(_) => worker_failure(),
    }
}

#[get("/api/debug/identity")]
pub async fn debug_identity(controller: Data<Arc<HybridController>>) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "cloud_token_configured": controller.cloud_configured(),
        "cached_identity": controller.cloud_identity().map(|identity| identity.device_id),
    }))
}

#[post("/api/debug/reset-identity")]
pub async fn debug_reset_identity(controller: Data<Arc<HybridController>>) -> impl Responder {
    controller.reset_cloud_identity();
    HttpResponse::Ok().json(json!({ "status": "reset" }))
}

#[get("/api/debug/uploads")]
pub async fn debug_uploads() -> impl Responder {
    let result = tokio::task::spawn_blocking(|| -> Result<_, ApiError> {
        let conn = store::new_connection()?;
        Ok(store::all_mappings(&conn)?)
    })
    .await;
    match result {
        Ok(Ok(mappings)) => HttpResponse::Ok().json(mappings),
        Ok(Err(err)) => err.respond(),
        Err(_) => worker_failure(),
    }
}

#[derive(Deserialize)]
pub struct SendKeyRequest {
    key: String,
}

#[post("/api/debug/send-key")]
pub async fn debug_send_key(
    controller: Data<Arc<HybridController>>,
    body: Json<SendKeyRequest>,
) -> impl Responder {
    let key = body.key.clone();
    let controller = controller.get_ref().clone();
    let result = web::block(move || controller.send_key(&key)).await;
    match result {
        Ok(Ok(outcome)) => HttpResponse::Ok().json(json!({
            "status": "success",
            "key": body.key,
            "channel": outcome.channel,
        })),
        Ok(Err(err)) => control_failure(&err),
        Err(_) => worker_failure(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_file_name() {
        assert!(valid_file_name("sunset.jpg"));
        assert!(valid_file_name("my photo_2.png"));
        assert!(!valid_file_name(""));
        assert!(!valid_file_name("../etc/passwd"));
        assert!(!valid_file_name("a/b.png"));
        assert!(!valid_file_name("a\\b.png"));
    }

    #[test]
    fn test_save_local_image_unique_names() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = dir.path().to_string_lossy().to_string();

        let first =
            save_local_image(&dir_path, Some("sunset.jpg"), ImageFormat::Jpeg, b"one").unwrap();
        assert_eq!(first, "sunset.jpg");

        // Same requested name must not clobber the existing file.
        let second =
            save_local_image(&dir_path, Some("sunset.jpg"), ImageFormat::Jpeg, b"two").unwrap();
        assert_eq!(second, "sunset_1.jpg");
        assert_eq!(
            std::fs::read(dir.path().join("sunset.jpg")).unwrap(),
            b"one"
        );
        assert_eq!(
            std::fs::read(dir.path().join("sunset_1.jpg")).unwrap(),
            b"two"
        );
    }

    #[test]
    fn test_save_local_image_sanitizes_name() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = dir.path().to_string_lossy().to_string();

        // A hostile filename falls back to its stem; the extension always
        // comes from the validated content type.
        let saved =
            save_local_image(&dir_path, Some("../../evil"), ImageFormat::Png, b"x").unwrap();
        assert_eq!(saved, "evil.png");
        assert!(dir.path().join("evil.png").exists());

        let unnamed = save_local_image(&dir_path, None, ImageFormat::Png, b"y").unwrap();
        assert_eq!(unnamed, "image.png");
    }
}
