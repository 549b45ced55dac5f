use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use crate::config::BackendConfig;
use crate::error::StoreError;
use crate::models::{Crop, NewCrop, NewProduce, PersistableRecord, Produce, Profile, UserRole};

const PRODUCE_COLUMNS: &str = "produce_id,name,bought_at,expires_at,cover_image";
const CROP_COLUMNS: &str = "crop_id,name,scanned_at,harvest_at,cover_image,viability";
const PROFILE_COLUMNS: &str = "user_id,first_name,last_name,email,user_type,location";

/// Row-level access to the per-owner produce, crop and profile tables.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create_produce(&self, owner_id: &str, record: &NewProduce) -> Result<Produce, StoreError>;
    async fn list_produce(&self, owner_id: &str) -> Result<Vec<Produce>, StoreError>;
    async fn delete_produce(&self, owner_id: &str, produce_id: &str) -> Result<(), StoreError>;

    async fn create_crop(&self, owner_id: &str, record: &NewCrop) -> Result<Crop, StoreError>;
    async fn list_crops(&self, owner_id: &str) -> Result<Vec<Crop>, StoreError>;
    async fn delete_crop(&self, owner_id: &str, crop_id: &str) -> Result<(), StoreError>;

    async fn create_profile(&self, profile: &Profile) -> Result<(), StoreError>;
    async fn get_profile(&self, user_id: &str) -> Result<Profile, StoreError>;
    async fn update_role(&self, user_id: &str, role: UserRole) -> Result<(), StoreError>;
    async fn update_location(&self, user_id: &str, location: &str) -> Result<(), StoreError>;
}

/// What a committed record turned into on the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum SavedRecord {
    Produce(Produce),
    Crop(Crop),
}

/// Routes a record to the collection matching its shape.
pub async fn commit_record(
    store: &dyn RecordStore,
    owner_id: &str,
    record: &PersistableRecord,
) -> Result<SavedRecord, StoreError> {
    match record {
        PersistableRecord::Produce(p) => store.create_produce(owner_id, p).await.map(SavedRecord::Produce),
        PersistableRecord::Crop(c) => store.create_crop(owner_id, c).await.map(SavedRecord::Crop),
    }
}

/// Table API client speaking the PostgREST dialect.
pub struct RestRecordStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
}

impl RestRecordStore {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            access_token: None,
        }
    }

    pub fn with_access_token(mut self, token: &str) -> Self {
        self.access_token = Some(token.to_string());
        self
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn headers(&self) -> Result<HeaderMap, StoreError> {
        let token = self.access_token.as_deref().ok_or(StoreError::Unauthenticated)?;
        let mut headers = HeaderMap::new();
        headers.insert("apikey", header_value(&self.api_key)?);
        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", token))?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn insert<B: Serialize + Sync, T: DeserializeOwned + Send>(
        &self,
        table: &str,
        columns: &str,
        body: &B,
    ) -> Result<T, StoreError> {
        let response = self
            .client
            .post(self.table_url(table))
            .headers(self.headers()?)
            .header("Prefer", "return=representation")
            .query(&[("select", columns)])
            .json(body)
            .send()
            .await
            .map_err(transport)?;

        let mut rows: Vec<T> = decode(response).await?;
        if rows.is_empty() {
            return Err(StoreError::Decode(format!("insert into {} returned no rows", table)));
        }
        Ok(rows.remove(0))
    }

    async fn select<T: DeserializeOwned + Send>(
        &self,
        table: &str,
        columns: &str,
        filter: (&str, String),
        order: Option<&str>,
    ) -> Result<Vec<T>, StoreError> {
        let mut query = vec![("select", columns.to_string()), (filter.0, filter.1)];
        if let Some(order) = order {
            query.push(("order", order.to_string()));
        }

        let response = self
            .client
            .get(self.table_url(table))
            .headers(self.headers()?)
            .query(&query)
            .send()
            .await
            .map_err(transport)?;

        decode(response).await
    }

    async fn delete_where(&self, table: &str, filters: &[(&str, String)]) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(self.table_url(table))
            .headers(self.headers()?)
            .query(filters)
            .send()
            .await
            .map_err(transport)?;

        check_status(response).await.map(|_| ())
    }

    async fn update_profile(&self, user_id: &str, body: serde_json::Value) -> Result<(), StoreError> {
        let response = self
            .client
            .patch(self.table_url("profiles"))
            .headers(self.headers()?)
            .query(&[("user_id", format!("eq.{}", user_id))])
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        check_status(response).await.map(|_| ())
    }
}

#[async_trait]
impl RecordStore for RestRecordStore {
    async fn create_produce(&self, owner_id: &str, record: &NewProduce) -> Result<Produce, StoreError> {
        let body = json!({ "owner_id": owner_id, "name": record.name, "expires_at": record.expires_at });
        let row: Produce = self.insert("produce", PRODUCE_COLUMNS, &body).await?;
        info!("Saved produce {} ({})", row.name, row.produce_id);
        Ok(row)
    }

    async fn list_produce(&self, owner_id: &str) -> Result<Vec<Produce>, StoreError> {
        self.select("produce", PRODUCE_COLUMNS, ("owner_id", format!("eq.{}", owner_id)), Some("expires_at.desc"))
            .await
    }

    async fn delete_produce(&self, owner_id: &str, produce_id: &str) -> Result<(), StoreError> {
        self.delete_where(
            "produce",
            &[("produce_id", format!("eq.{}", produce_id)), ("owner_id", format!("eq.{}", owner_id))],
        )
        .await
    }

    async fn create_crop(&self, owner_id: &str, record: &NewCrop) -> Result<Crop, StoreError> {
        let body = json!({ "owner_id": owner_id, "name": record.name, "harvest_at": record.harvest_at });
        let row: Crop = self.insert("crops", CROP_COLUMNS, &body).await?;
        info!("Saved crop {} ({})", row.name, row.crop_id);
        Ok(row)
    }

    async fn list_crops(&self, owner_id: &str) -> Result<Vec<Crop>, StoreError> {
        self.select("crops", CROP_COLUMNS, ("owner_id", format!("eq.{}", owner_id)), Some("harvest_at.desc"))
            .await
    }

    async fn delete_crop(&self, owner_id: &str, crop_id: &str) -> Result<(), StoreError> {
        self.delete_where(
            "crops",
            &[("crop_id", format!("eq.{}", crop_id)), ("owner_id", format!("eq.{}", owner_id))],
        )
        .await
    }

    async fn create_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        let _: Profile = self.insert("profiles", PROFILE_COLUMNS, profile).await?;
        Ok(())
    }

    async fn get_profile(&self, user_id: &str) -> Result<Profile, StoreError> {
        let mut rows: Vec<Profile> = self
            .select("profiles", PROFILE_COLUMNS, ("user_id", format!("eq.{}", user_id)), None)
            .await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound(format!("profile {}", user_id)));
        }
        Ok(rows.remove(0))
    }

    async fn update_role(&self, user_id: &str, role: UserRole) -> Result<(), StoreError> {
        self.update_profile(user_id, json!({ "user_type": role })).await
    }

    async fn update_location(&self, user_id: &str, location: &str) -> Result<(), StoreError> {
        self.update_profile(user_id, json!({ "location": location })).await
    }
}

fn header_value(value: &str) -> Result<HeaderValue, StoreError> {
    HeaderValue::from_str(value).map_err(|e| StoreError::Transport(e.to_string()))
}

fn transport(err: reqwest::Error) -> StoreError {
    warn!("Backend request failed: {}", err);
    StoreError::Transport(err.to_string())
}

async fn check_status(response: reqwest::Response) -> Result<String, StoreError> {
    let status = response.status();
    let body = response.text().await.map_err(transport)?;
    if !status.is_success() {
        return Err(StoreError::Backend { status: status.as_u16(), body });
    }
    Ok(body)
}

async fn decode<T: DeserializeOwned + Send>(response: reqwest::Response) -> Result<T, StoreError> {
    let body = check_status(response).await?;
    serde_json::from_str(&body).map_err(|e| StoreError::Decode(e.to_string()))
}

#[derive(Default)]
struct MemoryTables {
    produce: Vec<(String, Produce)>,
    crops: Vec<(String, Crop)>,
    profiles: HashMap<String, Profile>,
}

/// In-process store for dry runs and tests.
#[derive(Default)]
pub struct MemoryRecordStore {
    tables: Mutex<MemoryTables>,
    next_id: AtomicU64,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub async fn produce_count(&self) -> usize {
        self.tables.lock().await.produce.len()
    }

    pub async fn crop_count(&self) -> usize {
        self.tables.lock().await.crops.len()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_produce(&self, owner_id: &str, record: &NewProduce) -> Result<Produce, StoreError> {
        let row = Produce {
            produce_id: self.next_id("produce"),
            name: record.name.clone(),
            bought_at: Utc::now().to_rfc3339(),
            expires_at: record.expires_at.clone(),
            cover_image: None,
        };
        self.tables.lock().await.produce.push((owner_id.to_string(), row.clone()));
        debug!("Stored produce {} in memory", row.produce_id);
        Ok(row)
    }

    async fn list_produce(&self, owner_id: &str) -> Result<Vec<Produce>, StoreError> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Produce> = tables
            .produce
            .iter()
            .filter(|(owner, _)| owner == owner_id)
            .map(|(_, row)| row.clone())
            .collect();
        rows.sort_by(|a, b| b.expires_at.cmp(&a.expires_at));
        Ok(rows)
    }

    async fn delete_produce(&self, owner_id: &str, produce_id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let before = tables.produce.len();
        tables.produce.retain(|(owner, row)| !(owner == owner_id && row.produce_id == produce_id));
        if tables.produce.len() == before {
            return Err(StoreError::NotFound(produce_id.to_string()));
        }
        Ok(())
    }

    async fn create_crop(&self, owner_id: &str, record: &NewCrop) -> Result<Crop, StoreError> {
        let row = Crop {
            crop_id: self.next_id("crop"),
            name: record.name.clone(),
            scanned_at: Utc::now().to_rfc3339(),
            harvest_at: record.harvest_at.clone(),
            cover_image: None,
            viability: None,
        };
        self.tables.lock().await.crops.push((owner_id.to_string(), row.clone()));
        debug!("Stored crop {} in memory", row.crop_id);
        Ok(row)
    }

    async fn list_crops(&self, owner_id: &str) -> Result<Vec<Crop>, StoreError> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Crop> = tables
            .crops
            .iter()
            .filter(|(owner, _)| owner == owner_id)
            .map(|(_, row)| row.clone())
            .collect();
        rows.sort_by(|a, b| b.harvest_at.cmp(&a.harvest_at));
        Ok(rows)
    }

    async fn delete_crop(&self, owner_id: &str, crop_id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let before = tables.crops.len();
        tables.crops.retain(|(owner, row)| !(owner == owner_id && row.crop_id == crop_id));
        if tables.crops.len() == before {
            return Err(StoreError::NotFound(crop_id.to_string()));
        }
        Ok(())
    }

    async fn create_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        self.tables
            .lock()
            .await
            .profiles
            .insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    async fn get_profile(&self, user_id: &str) -> Result<Profile, StoreError> {
        self.tables
            .lock()
            .await
            .profiles
            .get(user_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("profile {}", user_id)))
    }

    async fn update_role(&self, user_id: &str, role: UserRole) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let profile = tables
            .profiles
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(format!("profile {}", user_id)))?;
        profile.user_type = role;
        Ok(())
    }

    async fn update_location(&self, user_id: &str, location: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let profile = tables
            .profiles
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(format!("profile {}", user_id)))?;
        profile.location = Some(location.to_string());
        Ok(())
    }
}
