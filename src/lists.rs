//! Per-user produce and crop lists. Local items change only after the
//! backend confirms the write.

use log::{error, info};
use std::sync::Arc;

use crate::error::StoreError;
use crate::models::{Crop, NewCrop, NewProduce, Produce};
use crate::persistence::{RecordStore, SavedRecord};

pub struct ProduceList {
    store: Arc<dyn RecordStore>,
    owner_id: String,
    items: Vec<Produce>,
    is_loading: bool,
}

impl ProduceList {
    pub fn new(store: Arc<dyn RecordStore>, owner_id: &str) -> Self {
        Self {
            store,
            owner_id: owner_id.to_string(),
            items: Vec::new(),
            is_loading: false,
        }
    }

    pub fn items(&self) -> &[Produce] {
        &self.items
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    /// Reloads from the backend. A failed load empties the list.
    pub async fn refresh(&mut self) -> Result<(), StoreError> {
        self.is_loading = true;
        let result = self.store.list_produce(&self.owner_id).await;
        self.is_loading = false;

        match result {
            Ok(rows) => {
                self.items = rows;
                Ok(())
            }
            Err(e) => {
                error!("Failed to load produce: {}", e);
                self.items.clear();
                Err(e)
            }
        }
    }

    pub async fn add(&mut self, record: &NewProduce) -> Result<&Produce, StoreError> {
        let row = self.store.create_produce(&self.owner_id, record).await?;
        self.push_confirmed(row);
        Ok(&self.items[self.items.len() - 1])
    }

    pub async fn remove(&mut self, produce_id: &str) -> Result<(), StoreError> {
        self.store.delete_produce(&self.owner_id, produce_id).await?;
        self.items.retain(|p| p.produce_id != produce_id);
        info!("Removed produce {}", produce_id);
        Ok(())
    }

    /// Adds a row the backend already confirmed, e.g. from a review commit.
    pub fn push_confirmed(&mut self, row: Produce) {
        self.items.push(row);
    }
}

pub struct CropList {
    store: Arc<dyn RecordStore>,
    owner_id: String,
    items: Vec<Crop>,
    is_loading: bool,
}

impl CropList {
    pub fn new(store: Arc<dyn RecordStore>, owner_id: &str) -> Self {
        Self {
            store,
            owner_id: owner_id.to_string(),
            items: Vec::new(),
            is_loading: false,
        }
    }

    pub fn items(&self) -> &[Crop] {
        &self.items
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub async fn refresh(&mut self) -> Result<(), StoreError> {
        self.is_loading = true;
        let result = self.store.list_crops(&self.owner_id).await;
        self.is_loading = false;

        match result {
            Ok(rows) => {
                self.items = rows;
                Ok(())
            }
            Err(e) => {
                error!("Failed to load crops: {}", e);
                self.items.clear();
                Err(e)
            }
        }
    }

    pub async fn add(&mut self, record: &NewCrop) -> Result<&Crop, StoreError> {
        let row = self.store.create_crop(&self.owner_id, record).await?;
        self.push_confirmed(row);
        Ok(&self.items[self.items.len() - 1])
    }

    pub async fn remove(&mut self, crop_id: &str) -> Result<(), StoreError> {
        self.store.delete_crop(&self.owner_id, crop_id).await?;
        self.items.retain(|c| c.crop_id != crop_id);
        info!("Removed crop {}", crop_id);
        Ok(())
    }

    pub fn push_confirmed(&mut self, row: Crop) {
        self.items.push(row);
    }
}

/// Files a saved review into whichever list matches its shape.
pub fn apply_saved(saved: SavedRecord, produce: &mut ProduceList, crops: &mut CropList) {
    match saved {
        SavedRecord::Produce(row) => produce.push_confirmed(row),
        SavedRecord::Crop(row) => crops.push_confirmed(row),
    }
}
