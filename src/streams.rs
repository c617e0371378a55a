//! Saved-stream bookmarks: plain CRUD over the streams document.

use std::sync::Arc;

use chrono::Utc;

use crate::dto::{CreateStream, UpdateStream};
use crate::error::AppError;
use crate::model::SavedStream;
use crate::persist::Store;
use crate::recording::manager::validate_rtsp_url;
use crate::result::Result;

pub struct StreamService {
    store: Arc<Store>,
}

impl StreamService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub async fn list(&self) -> Vec<SavedStream> {
        self.store.streams().await
    }

    pub async fn get(&self, id: &str) -> Result<SavedStream> {
        self.store.stream(id).await
    }

    pub async fn create(&self, req: CreateStream) -> Result<SavedStream> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(AppError::validation("name must not be empty"));
        }
        validate_rtsp_url(&req.rtsp_url)?;
        let stream = SavedStream::new(
            name.to_string(),
            req.rtsp_url,
            req.description,
            req.favorite,
        );
        self.store.insert_stream(stream.clone()).await?;
        Ok(stream)
    }

    pub async fn update(&self, id: &str, req: UpdateStream) -> Result<SavedStream> {
        if let Some(name) = &req.name
            && name.trim().is_empty()
        {
            return Err(AppError::validation("name must not be empty"));
        }
        if let Some(url) = &req.rtsp_url {
            validate_rtsp_url(url)?;
        }
        self.store
            .update_stream(id, |s| {
                if let Some(name) = req.name {
                    s.name = name.trim().to_string();
                }
                if let Some(url) = req.rtsp_url {
                    s.rtsp_url = url;
                }
                if let Some(description) = req.description {
                    s.description = Some(description);
                }
                if let Some(favorite) = req.favorite {
                    s.favorite = favorite;
                }
                s.updated_at = Utc::now();
            })
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        match self.store.remove_stream(id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::not_found(format!("stream {id}"))),
        }
    }
}
