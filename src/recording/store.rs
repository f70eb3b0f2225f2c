use std::time::Duration;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::multipart::{Form, Part};
use reqwest::Body;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

use super::recorder::RecordedFile;
use crate::config::UploadConfig;
use crate::error::{MeetError, Result};

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Where finished recordings go: a file upload followed by attaching the
/// returned URL to the meeting.
pub trait RecordingStore: Send + Sync {
    /// Returns the URL of the stored file.
    fn upload<'a>(&'a self, file: &'a RecordedFile) -> BoxFuture<'a, Result<String>>;

    fn finalize<'a>(&'a self, meeting_id: &'a str, record_url: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Upload endpoint response, either flat or wrapped in `data`
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    data: Option<UploadData>,
}

#[derive(Debug, Clone, Deserialize)]
struct UploadData {
    url: String,
}

impl UploadResponse {
    pub fn into_url(self) -> Option<String> {
        self.url.or(self.data.map(|d| d.url))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest<'a> {
    pub meeting_id: &'a str,
    pub record_url: &'a str,
}

pub struct HttpRecordingStore {
    config: UploadConfig,
    client: reqwest::Client,
}

impl HttpRecordingStore {
    pub fn new(config: UploadConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MeetError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    async fn upload_file(&self, file: &RecordedFile) -> Result<String> {
        let upload_url = self
            .config
            .upload_url
            .as_deref()
            .ok_or_else(|| MeetError::UploadFailed("UPLOAD_URL is not configured".to_string()))?;

        let handle = tokio::fs::File::open(&file.path)
            .await
            .map_err(|e| MeetError::UploadFailed(format!("Failed to open recording: {}", e)))?;

        let chunks = futures::stream::unfold(handle, |mut handle| async move {
            let mut buffer = vec![0u8; UPLOAD_CHUNK_SIZE];
            match handle.read(&mut buffer).await {
                Ok(0) => None,
                Ok(n) => {
                    buffer.truncate(n);
                    Some((Ok::<_, std::io::Error>(buffer), handle))
                }
                Err(e) => Some((Err(e), handle)),
            }
        });

        let part = Part::stream_with_length(Body::wrap_stream(chunks), file.size)
            .file_name(file.file_name())
            .mime_str(&file.mime_type)?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| MeetError::UploadFailed(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(MeetError::UploadFailed(format!(
                "Upload failed with status {}: {}",
                status, error_text
            )));
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| MeetError::UploadFailed(format!("Failed to parse response: {}", e)))?;
        let url = body
            .into_url()
            .ok_or_else(|| MeetError::UploadFailed("response carried no url".to_string()))?;

        tracing::info!(
            url = %url,
            size = file.size,
            file_name = %file.file_name(),
            "Uploaded recording"
        );
        Ok(url)
    }

    async fn finalize_recording(&self, meeting_id: &str, record_url: &str) -> Result<()> {
        let api_url = self
            .config
            .meeting_api_url
            .as_deref()
            .ok_or_else(|| MeetError::FinalizeFailed("MEETING_API_URL is not configured".to_string()))?;

        let url = format!(
            "{}/meetings/{}/record",
            api_url.trim_end_matches('/'),
            urlencoding::encode(meeting_id)
        );
        let response = self
            .client
            .put(&url)
            .json(&FinalizeRequest {
                meeting_id,
                record_url,
            })
            .send()
            .await
            .map_err(|e| MeetError::FinalizeFailed(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(MeetError::FinalizeFailed(format!(
                "Finalize failed with status {}: {}",
                status, error_text
            )));
        }

        tracing::info!(meeting_id = %meeting_id, record_url = %record_url, "Recording attached to meeting");
        Ok(())
    }
}

impl RecordingStore for HttpRecordingStore {
    fn upload<'a>(&'a self, file: &'a RecordedFile) -> BoxFuture<'a, Result<String>> {
        self.upload_file(file).boxed()
    }

    fn finalize<'a>(&'a self, meeting_id: &'a str, record_url: &'a str) -> BoxFuture<'a, Result<()>> {
        self.finalize_recording(meeting_id, record_url).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use warp::Filter;

    #[test]
    fn test_upload_response_shapes() {
        let flat: UploadResponse = serde_json::from_str(r#"{"url": "https://files/a.webm"}"#).unwrap();
        assert_eq!(flat.into_url().as_deref(), Some("https://files/a.webm"));

        let nested: UploadResponse =
            serde_json::from_str(r#"{"success": true, "data": {"url": "https://files/b.webm"}}"#).unwrap();
        assert_eq!(nested.into_url().as_deref(), Some("https://files/b.webm"));

        let empty: UploadResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.into_url().is_none());
    }

    #[test]
    fn test_finalize_body() {
        let body = serde_json::to_value(FinalizeRequest {
            meeting_id: "m1",
            record_url: "https://files/a.webm",
        })
        .unwrap();
        assert_eq!(body["meetingId"], "m1");
        assert_eq!(body["recordUrl"], "https://files/a.webm");
    }

    fn config(base: &str) -> UploadConfig {
        UploadConfig {
            upload_url: Some(format!("{}/upload", base)),
            meeting_api_url: Some(base.to_string()),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_upload_and_finalize_against_local_server() {
        let finalized: Arc<Mutex<Vec<(String, serde_json::Value)>>> = Arc::default();
        let seen = finalized.clone();

        let upload = warp::path("upload")
            .and(warp::post())
            .and(warp::body::bytes())
            .map(|body: warp::hyper::body::Bytes| {
                assert!(!body.is_empty());
                warp::reply::json(&serde_json::json!({"data": {"url": "https://files/rec.ivf"}}))
            });
        let record = warp::path!("meetings" / String / "record")
            .and(warp::put())
            .and(warp::body::json())
            .map(move |id: String, body: serde_json::Value| {
                seen.lock().unwrap().push((id, body));
                warp::reply()
            });
        let (addr, server) = warp::serve(upload.or(record)).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        let path: PathBuf = std::env::temp_dir().join(format!("meet-mesh-upload-{}.ivf", crate::media::track::random_id()));
        std::fs::write(&path, vec![7u8; 200_000]).unwrap();
        let file = RecordedFile {
            path: path.clone(),
            mime_type: "video/x-ivf".to_string(),
            size: 200_000,
        };

        let store = HttpRecordingStore::new(config(&format!("http://{}", addr))).unwrap();
        let url = store.upload(&file).await.unwrap();
        assert_eq!(url, "https://files/rec.ivf");

        store.finalize("meeting 1", &url).await.unwrap();
        let calls = finalized.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "meeting%201");
        assert_eq!(calls[0].1["recordUrl"], "https://files/rec.ivf");

        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_missing_endpoints_fail() {
        let store = HttpRecordingStore::new(UploadConfig {
            upload_url: None,
            meeting_api_url: None,
            timeout_secs: 5,
        })
        .unwrap();
        let file = RecordedFile {
            path: PathBuf::from("/nonexistent"),
            mime_type: "video/webm".to_string(),
            size: 0,
        };

        assert!(matches!(store.upload(&file).await, Err(MeetError::UploadFailed(_))));
        assert!(matches!(store.finalize("m", "u").await, Err(MeetError::FinalizeFailed(_))));
    }
}
