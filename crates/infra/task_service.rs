use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::domain::{
    repositories::task_service::TaskServiceClient,
    value_objects::{
        enums::stream_statuses::StreamStatus,
        task_service::{ActiveTask, StreamStatusUpdate},
    },
};

/// HTTP client for the task service (`/tasks`, `/tasks/active`,
/// `/tasks/update_status_by_stream`).
pub struct HttpTaskServiceClient {
    base_url: Url,
    client: Client,
}

impl HttpTaskServiceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .with_context(|| format!("invalid task service url: {base_url}"))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build task service http client")?;

        Ok(Self { base_url, client })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid task service path: {path}"))
    }

    async fn get_tasks(&self, url: Url) -> Result<Vec<ActiveTask>> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("GET {url} returned {status}");
        }

        // An empty result may be encoded as `null`.
        let tasks = response
            .json::<Option<Vec<ActiveTask>>>()
            .await
            .with_context(|| format!("failed to decode tasks from {url}"))?
            .unwrap_or_default();
        Ok(tasks)
    }
}

#[async_trait]
impl TaskServiceClient for HttpTaskServiceClient {
    async fn ping(&self) -> Result<()> {
        let url = self.endpoint("tasks")?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;

        if !response.status().is_success() {
            bail!("task service not ready: {}", response.status());
        }
        Ok(())
    }

    async fn list_active_tasks(&self) -> Result<Vec<ActiveTask>> {
        let url = self.endpoint("tasks/active")?;
        self.get_tasks(url).await
    }

    async fn find_task_by_stream(&self, stream_id: String) -> Result<Option<ActiveTask>> {
        let mut url = self.endpoint("tasks")?;
        url.query_pairs_mut().append_pair("stream_id", &stream_id);

        let tasks = self.get_tasks(url).await?;
        Ok(tasks.into_iter().find(|task| task.stream_id == stream_id))
    }

    async fn update_stream_status(&self, stream_id: String, status: StreamStatus) -> Result<()> {
        let url = self.endpoint("tasks/update_status_by_stream")?;
        let body = StreamStatusUpdate {
            stream_id: stream_id.clone(),
            status,
        };

        let response = self
            .client
            .put(url.clone())
            .json(&body)
            .send()
            .await
            .with_context(|| format!("PUT {url} failed"))?;

        let code = response.status();
        if !code.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("task service rejected status {status} for {stream_id}: {code} {text}");
        }

        debug!(stream_id = %stream_id, status = %status, "task service status updated");
        Ok(())
    }
}
