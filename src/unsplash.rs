//! Unsplash search passthrough for the image picker. Trims the upstream
//! payload down to the fields the frontend actually renders.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;

const BASE_URL: &str = "https://api.unsplash.com";
const TIMEOUT: Duration = Duration::from_secs(10);
const PAGE_SIZE: &str = "30";

#[derive(Debug, Clone, Serialize)]
pub struct Photo {
    pub id: String,
    pub description: Option<String>,
    pub urls: Value,
    pub author: String,
    pub author_profile: Option<String>,
    pub download_location: Option<String>,
}

pub struct UnsplashClient {
    access_key: String,
}

impl UnsplashClient {
    pub fn new(access_key: String) -> Self {
        Self { access_key }
    }

    pub fn search(&self, query: &str) -> Result<Vec<Photo>, String> {
        let response = self.get("search/photos", &[("query", query), ("per_page", PAGE_SIZE)])?;
        Ok(response
            .get("results")
            .and_then(Value::as_array)
            .map(|photos| photos.iter().filter_map(trim_photo).collect())
            .unwrap_or_default())
    }

    pub fn featured(&self) -> Result<Vec<Photo>, String> {
        let response = self.get("photos", &[("order_by", "popular"), ("per_page", PAGE_SIZE)])?;
        Ok(response
            .as_array()
            .map(|photos| photos.iter().filter_map(trim_photo).collect())
            .unwrap_or_default())
    }

    fn get(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Value, String> {
        let client = Client::builder()
            .timeout(TIMEOUT)
            .build()
            .map_err(|e| format!("http client: {e}"))?;

        let mut query: Vec<(&str, &str)> = params.to_vec();
        query.push(("client_id", &self.access_key));

        let response = client
            .get(format!("{BASE_URL}/{endpoint}"))
            .query(&query)
            .send()
            .map_err(|e| format!("unsplash request: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("unsplash returned {}", response.status()));
        }
        response.json().map_err(|e| format!("unsplash body: {e}"))
    }
}

fn trim_photo(raw: &Value) -> Option<Photo> {
    Some(Photo {
        id: raw.get("id")?.as_str()?.to_string(),
        description: raw
            .get("description")
            .or_else(|| raw.get("alt_description"))
            .and_then(Value::as_str)
            .map(str::to_string),
        urls: raw.get("urls").cloned().unwrap_or(Value::Null),
        author: raw
            .get("user")
            .and_then(|user| user.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string(),
        author_profile: raw
            .get("user")
            .and_then(|user| user.get("links"))
            .and_then(|links| links.get("html"))
            .and_then(Value::as_str)
            .map(str::to_string),
        download_location: raw
            .get("links")
            .and_then(|links| links.get("download_location"))
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}
