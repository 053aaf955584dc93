use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::info;

use crate::clients::app_service_client::{AppServiceClient, AppServiceError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    AppService(#[from] AppServiceError),
    #[error("{0}")]
    Rejected(String),
}

pub type StoreFuture<'a> = Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;

/// Durable home of lesson content. Writes are keyed by
/// `(document_id, section_index, field)`; the last write wins.
pub trait LessonStore: Send + Sync {
    fn persist_edit<'a>(&'a self, document_id: &'a str, section_index: u32, field: &'a str, value: &'a str) -> StoreFuture<'a>;
}

/// Writes lesson fields through the app service.
pub struct AppServiceLessonStore {
    client: Arc<AppServiceClient>,
}

impl AppServiceLessonStore {
    pub fn new(client: Arc<AppServiceClient>) -> Self {
        Self { client }
    }
}

impl LessonStore for AppServiceLessonStore {
    fn persist_edit<'a>(&'a self, document_id: &'a str, section_index: u32, field: &'a str, value: &'a str) -> StoreFuture<'a> {
        Box::pin(async move {
            self.client.patch_lesson_field(document_id, section_index, field, value).await?;
            Ok(())
        })
    }
}

/// Accepts every write and only logs it. Used when no app service is configured.
pub struct LoggingLessonStore;

impl LessonStore for LoggingLessonStore {
    fn persist_edit<'a>(&'a self, document_id: &'a str, section_index: u32, field: &'a str, value: &'a str) -> StoreFuture<'a> {
        Box::pin(async move {
            info!(
                "No lesson store configured, dropping durable edit for {} (section {}, field '{}', {} bytes)",
                document_id,
                section_index,
                field,
                value.len()
            );
            Ok(())
        })
    }
}
