use std::time::Duration;

use reqwest::{Client, ClientBuilder, StatusCode};

use crate::error::{MonitorError, Result};
use crate::services::status_parser::ReportFormat;

const USER_AGENT: &str = concat!("apache-manager/", env!("CARGO_PKG_VERSION"));

/// 获取 mod_status 状态页
pub struct StatusFetcher {
    client: Client,
    base_url: String,
}

impl StatusFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = ClientBuilder::new()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| MonitorError::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn html_url(&self) -> String {
        format!("{}/server-status", self.base_url)
    }

    pub fn text_url(&self) -> String {
        format!("{}/server-status?auto", self.base_url)
    }

    pub fn url_for(&self, format: ReportFormat) -> String {
        match format {
            ReportFormat::PlainText => self.text_url(),
            ReportFormat::Html => self.html_url(),
        }
    }

    pub async fn fetch(&self, format: ReportFormat) -> Result<String> {
        let url = self.url_for(format);
        log::debug!("Fetching Apache status page from {} ..", url);

        let error = |message: String| MonitorError::Fetch {
            url: url.clone(),
            message,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| error(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(error(format!("unexpected HTTP status {}", status)));
        }

        response.text().await.map_err(|e| error(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// 在本地端口上返回一个固定的 HTTP 响应
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buffer = [0u8; 1024];
            let _ = socket.read(&mut buffer).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{}", address)
    }

    #[test]
    fn test_urls() {
        let fetcher = StatusFetcher::new("http://127.0.0.1:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(fetcher.html_url(), "http://127.0.0.1:8080/server-status");
        assert_eq!(fetcher.text_url(), "http://127.0.0.1:8080/server-status?auto");
        assert_eq!(fetcher.url_for(ReportFormat::PlainText), fetcher.text_url());
    }

    #[tokio::test]
    async fn test_fetch_ok() {
        let base = serve_once("200 OK", "Total Accesses: 10\n").await;
        let fetcher = StatusFetcher::new(&base, Duration::from_secs(5)).unwrap();
        let body = fetcher.fetch(ReportFormat::PlainText).await.unwrap();
        assert_eq!(body, "Total Accesses: 10\n");
    }

    #[tokio::test]
    async fn test_fetch_non_200() {
        let base = serve_once("403 Forbidden", "denied").await;
        let fetcher = StatusFetcher::new(&base, Duration::from_secs(5)).unwrap();
        let err = fetcher.fetch(ReportFormat::Html).await.unwrap_err();
        assert!(matches!(err, MonitorError::Fetch { .. }));
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        // 绑定后立即释放，端口上没有监听者
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let fetcher =
            StatusFetcher::new(&format!("http://{}", address), Duration::from_secs(2)).unwrap();
        let err = fetcher.fetch(ReportFormat::PlainText).await.unwrap_err();
        assert!(matches!(err, MonitorError::Fetch { .. }));
    }
}
