//! HTTP implementation of the Gist API over reqwest.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{FileChange, Gist, GistApi, GistSummary, TokenProbe};
use crate::error::GatewayError;
use crate::limits::{GIST_FILENAME_MAX, GIST_FILE_HARD_LIMIT, PATCH_MAX_BYTES};
use crate::logging::*;

const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// Source of the bearer token attached to every request.
#[async_trait]
pub trait TokenSource: Send + Sync {
	async fn token(&self) -> Option<String>;
}

/// A fixed token, for embedding and tests.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
	async fn token(&self) -> Option<String> {
		Some(self.0.clone())
	}
}

type CacheEntry = Arc<Mutex<Option<Gist>>>;

/// REST client for the Gist API.
///
/// Keeps a per-process session cache of full Gist trees. A cold
/// `get_gist` populates the entry while holding its lock, so concurrent
/// callers for the same ID await that single fetch instead of issuing
/// their own. Successful mutations replace the entry with the server's
/// post-state, avoiding a refetch.
pub struct HttpGistClient {
	http: reqwest::Client,
	base_url: String,
	tokens: Arc<dyn TokenSource>,
	cache: Mutex<HashMap<String, CacheEntry>>,
}

impl HttpGistClient {
	pub fn new(tokens: Arc<dyn TokenSource>) -> Self {
		Self::with_base_url(tokens, DEFAULT_BASE_URL)
	}

	pub fn with_base_url(tokens: Arc<dyn TokenSource>, base_url: &str) -> Self {
		HttpGistClient {
			http: reqwest::Client::new(),
			base_url: base_url.trim_end_matches('/').to_string(),
			tokens,
			cache: Mutex::new(HashMap::new()),
		}
	}

	async fn headers(&self) -> Result<HeaderMap, GatewayError> {
		let token = self.tokens.token().await.ok_or(GatewayError::NoToken)?;

		let mut headers = HeaderMap::new();
		headers.insert(
			AUTHORIZATION,
			HeaderValue::from_str(&format!("Bearer {}", token))
				.map_err(|_| GatewayError::TokenInvalid)?,
		);
		headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
		headers.insert(USER_AGENT, HeaderValue::from_static("gistsync"));
		Ok(headers)
	}

	async fn cache_entry(&self, id: &str) -> CacheEntry {
		let mut cache = self.cache.lock().await;
		cache.entry(id.to_string()).or_insert_with(|| Arc::new(Mutex::new(None))).clone()
	}

	/// Store a server-returned post-state for a Gist.
	async fn cache_put(&self, gist: Gist) {
		let entry = self.cache_entry(&gist.id).await;
		let mut slot = entry.lock().await;
		*slot = Some(gist);
	}

	async fn fetch_gist(&self, id: &str) -> Result<Gist, GatewayError> {
		let headers = self.headers().await?;
		let url = format!("{}/gists/{}", self.base_url, id);
		let response = self.http.get(&url).headers(headers).send().await?;
		let status = response.status();
		if !status.is_success() {
			return Err(map_status(status, response.text().await.unwrap_or_default()));
		}
		response.json::<Gist>().await.map_err(GatewayError::from)
	}
}

#[async_trait]
impl GistApi for HttpGistClient {
	async fn list_gists(&self) -> Result<Vec<GistSummary>, GatewayError> {
		let headers = self.headers().await?;
		let url = format!("{}/gists?per_page=100", self.base_url);
		let response = self.http.get(&url).headers(headers).send().await?;
		let status = response.status();
		if !status.is_success() {
			return Err(map_status(status, response.text().await.unwrap_or_default()));
		}

		let raw: Vec<Value> = response.json().await?;
		let mut summaries = Vec::with_capacity(raw.len());
		for item in raw {
			let id = match item["id"].as_str() {
				Some(id) => id.to_string(),
				None => continue,
			};
			let filenames = item["files"]
				.as_object()
				.map(|files| files.keys().cloned().collect())
				.unwrap_or_default();
			summaries.push(GistSummary {
				id,
				description: item["description"].as_str().unwrap_or_default().to_string(),
				updated_at: item["updated_at"].as_str().unwrap_or_default().to_string(),
				filenames,
			});
		}
		Ok(summaries)
	}

	async fn create_gist(
		&self,
		description: &str,
		files: BTreeMap<String, String>,
	) -> Result<Gist, GatewayError> {
		let headers = self.headers().await?;
		let file_entries: serde_json::Map<String, Value> = files
			.into_iter()
			.map(|(name, content)| (name, json!({ "content": content })))
			.collect();
		let body = json!({
			"description": description,
			"public": false,
			"files": file_entries,
		});

		let url = format!("{}/gists", self.base_url);
		let response = self.http.post(&url).headers(headers).json(&body).send().await?;
		let status = response.status();
		if !status.is_success() {
			return Err(map_status(status, response.text().await.unwrap_or_default()));
		}

		let gist: Gist = response.json().await?;
		self.cache_put(gist.clone()).await;
		Ok(gist)
	}

	async fn get_gist(&self, id: &str) -> Result<Gist, GatewayError> {
		let entry = self.cache_entry(id).await;
		let mut slot = entry.lock().await;
		if let Some(gist) = slot.as_ref() {
			return Ok(gist.clone());
		}
		let gist = self.fetch_gist(id).await?;
		*slot = Some(gist.clone());
		Ok(gist)
	}

	async fn get_file_content(&self, id: &str, name: &str) -> Result<String, GatewayError> {
		let gist = self.get_gist(id).await?;
		let file = gist.files.get(name).ok_or(GatewayError::NotFound)?;

		if file.truncated {
			let raw_url = file.raw_url.as_ref().ok_or(GatewayError::NotFound)?;
			let headers = self.headers().await?;
			let response = self.http.get(raw_url).headers(headers).send().await?;
			let status = response.status();
			if !status.is_success() {
				return Err(map_status(status, response.text().await.unwrap_or_default()));
			}
			return Ok(response.text().await?);
		}

		file.content.clone().ok_or(GatewayError::NotFound)
	}

	async fn update_files(
		&self,
		id: &str,
		changes: BTreeMap<String, FileChange>,
	) -> Result<(), GatewayError> {
		for (name, change) in &changes {
			if name.len() > GIST_FILENAME_MAX {
				return Err(GatewayError::FilenameTooLong { name: name.clone() });
			}
			if let FileChange::Write(content) = change {
				if content.is_empty() {
					return Err(GatewayError::EmptyContent { name: name.clone() });
				}
				if content.len() > GIST_FILE_HARD_LIMIT {
					warn!(
						"File {} is {} bytes, above the {} byte Gist limit; upload may be rejected",
						name,
						content.len(),
						GIST_FILE_HARD_LIMIT
					);
				}
			}
		}

		for batch in super::split_batches(changes, PATCH_MAX_BYTES) {
			let headers = self.headers().await?;
			let file_entries: serde_json::Map<String, Value> = batch
				.into_iter()
				.map(|(name, change)| {
					let value = match change {
						FileChange::Write(content) => json!({ "content": content }),
						FileChange::Delete => Value::Null,
					};
					(name, value)
				})
				.collect();
			let body = json!({ "files": file_entries });

			let url = format!("{}/gists/{}", self.base_url, id);
			let response = self.http.patch(&url).headers(headers).json(&body).send().await?;
			let status = response.status();
			if !status.is_success() {
				return Err(map_status(status, response.text().await.unwrap_or_default()));
			}

			let gist: Gist = response.json().await?;
			self.cache_put(gist).await;
		}
		Ok(())
	}

	async fn delete_gist(&self, id: &str) -> Result<(), GatewayError> {
		let headers = self.headers().await?;
		let url = format!("{}/gists/{}", self.base_url, id);
		let response = self.http.delete(&url).headers(headers).send().await?;
		let status = response.status();
		if !status.is_success() && status != StatusCode::NOT_FOUND {
			return Err(map_status(status, response.text().await.unwrap_or_default()));
		}
		self.evict(id).await;
		Ok(())
	}

	async fn validate_token(&self) -> Result<TokenProbe, GatewayError> {
		let headers = self.headers().await?;
		let url = format!("{}/user", self.base_url);
		let response = self.http.get(&url).headers(headers.clone()).send().await?;
		let status = response.status();
		if !status.is_success() {
			return Err(map_status(status, response.text().await.unwrap_or_default()));
		}
		let user: Value = response.json().await?;
		let login = user["login"].as_str().unwrap_or_default().to_string();

		// A 1-item list confirms the gist scope without transferring much.
		let url = format!("{}/gists?per_page=1", self.base_url);
		let response = self.http.get(&url).headers(headers).send().await?;
		let can_read_gists = response.status().is_success();

		Ok(TokenProbe { login, can_read_gists })
	}

	async fn evict(&self, id: &str) {
		let mut cache = self.cache.lock().await;
		cache.remove(id);
	}
}

/// Map an HTTP status to the domain error taxonomy.
fn map_status(status: StatusCode, body: String) -> GatewayError {
	match status.as_u16() {
		401 => GatewayError::TokenInvalid,
		403 => GatewayError::InsufficientScope,
		404 => GatewayError::NotFound,
		422 => {
			let detail = serde_json::from_str::<Value>(&body)
				.ok()
				.and_then(|v| v["message"].as_str().map(|s| s.to_string()))
				.unwrap_or(body);
			GatewayError::BadRequest { detail }
		}
		status_code if status_code >= 500 => {
			GatewayError::ServerError { status: status_code, message: body }
		}
		status_code => GatewayError::ServerError { status: status_code, message: body },
	}
}


// vim: ts=4
