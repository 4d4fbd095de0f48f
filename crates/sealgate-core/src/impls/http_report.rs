//! HttpReportGenerator - レポート生成 API クライアント
//!
//! `POST {base}/api/reports` に `{"package_id": ...}` を送り、本文をそのまま
//! レポートとして受け取る。media type は `Content-Type` から取る（無ければ PDF）。

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::domain::artifact::DEFAULT_MEDIA_TYPE;
use crate::domain::{ObjectId, ReportArtifact};
use crate::ports::{ReportError, ReportGenerator};

#[derive(Serialize)]
struct ReportRequest {
    package_id: String,
}

pub struct HttpReportGenerator {
    base_url: String,
    client: reqwest::Client,
}

impl HttpReportGenerator {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ReportError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/reports", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ReportGenerator for HttpReportGenerator {
    async fn generate(&self, package_id: &ObjectId) -> Result<ReportArtifact, ReportError> {
        let response = self
            .client
            .post(self.endpoint())
            .json(&ReportRequest {
                package_id: package_id.to_string(),
            })
            .send()
            .await
            .map_err(|e| ReportError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".to_string());
            return Err(ReportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_MEDIA_TYPE.to_string());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ReportError::Transport(e.to_string()))?;
        if bytes.is_empty() {
            return Err(ReportError::Empty);
        }
        tracing::info!(package_id = %package_id, size = bytes.len(), %media_type, "report received");
        Ok(ReportArtifact::new(bytes.to_vec(), media_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{StatusCode, header};
    use axum::response::IntoResponse;
    use axum::routing::post;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn posts_package_id_and_returns_body() {
        let app = Router::new().route(
            "/api/reports",
            post(|axum::Json(body): axum::Json<serde_json::Value>| async move {
                let package = body["package_id"].as_str().unwrap_or_default().to_string();
                ([(header::CONTENT_TYPE, "application/pdf")], format!("%PDF {package}"))
            }),
        );
        let generator = HttpReportGenerator::new(serve(app).await).unwrap();

        let report = generator.generate(&ObjectId::from_u64(0xab)).await.unwrap();

        assert_eq!(report.media_type, "application/pdf");
        assert_eq!(
            String::from_utf8(report.bytes).unwrap(),
            format!("%PDF {}", ObjectId::from_u64(0xab))
        );
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let app = Router::new().route(
            "/api/reports",
            post(|| async { (StatusCode::BAD_GATEWAY, "upstream down").into_response() }),
        );
        let generator = HttpReportGenerator::new(serve(app).await).unwrap();

        let err = generator.generate(&ObjectId::from_u64(1)).await.unwrap_err();

        assert_eq!(
            err,
            ReportError::Status {
                status: 502,
                body: "upstream down".into()
            }
        );
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let app = Router::new().route("/api/reports", post(|| async { StatusCode::OK }));
        let generator = HttpReportGenerator::new(serve(app).await).unwrap();
        assert_eq!(
            generator.generate(&ObjectId::from_u64(1)).await.unwrap_err(),
            ReportError::Empty
        );
    }
}
