use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use bookworm_core::config::CatalogConfig;
use bookworm_core::domain::book::BookMetadata;

/// Book-metadata lookup. An unknown title is an empty list, never an error.
#[async_trait]
pub trait BookCatalog: Send + Sync {
    async fn lookup_by_title(&self, title: &str) -> Result<Vec<BookMetadata>>;

    async fn lookup_trending(&self, limit: usize) -> Result<Vec<BookMetadata>>;
}

/// Google Books volumes API.
pub struct GoogleBooksCatalog {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    trending_query: String,
}

#[derive(Debug, Default, Deserialize)]
struct VolumeList {
    #[serde(default)]
    items: Vec<Volume>,
}

#[derive(Debug, Deserialize)]
struct Volume {
    id: String,
    #[serde(rename = "volumeInfo", default)]
    info: VolumeInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeInfo {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    image_links: Option<ImageLinks>,
    #[serde(default)]
    published_date: Option<String>,
    #[serde(default)]
    page_count: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageLinks {
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    small_thumbnail: Option<String>,
}

impl GoogleBooksCatalog {
    pub fn from_config(config: &CatalogConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            trending_query: config.trending_query.clone(),
        })
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<BookMetadata>> {
        let mut params = vec![
            ("q", query.to_string()),
            ("maxResults", limit.clamp(1, 40).to_string()),
            ("printType", "books".to_string()),
        ];
        if let Some(api_key) = &self.api_key {
            params.push(("key", api_key.expose_secret().to_string()));
        }

        let response =
            self.client.get(format!("{}/volumes", self.base_url)).query(&params).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("catalog returned {}", response.status()));
        }

        let list: VolumeList = response.json().await?;
        Ok(list.items.into_iter().filter_map(Volume::into_metadata).collect())
    }
}

impl Volume {
    fn into_metadata(self) -> Option<BookMetadata> {
        let title = self.info.title.filter(|title| !title.trim().is_empty())?;
        let image_url = self
            .info
            .image_links
            .and_then(|links| links.thumbnail.or(links.small_thumbnail))
            .map(|url| url.replacen("http://", "https://", 1));
        Some(BookMetadata {
            id: self.id,
            title,
            authors: self.info.authors,
            description: self.info.description,
            image_url,
            published: self.info.published_date,
            page_count: self.info.page_count,
        })
    }
}

#[async_trait]
impl BookCatalog for GoogleBooksCatalog {
    async fn lookup_by_title(&self, title: &str) -> Result<Vec<BookMetadata>> {
        let title = title.trim();
        if title.is_empty() {
            return Ok(Vec::new());
        }
        self.search(&format!("intitle:{title}"), 1).await
    }

    async fn lookup_trending(&self, limit: usize) -> Result<Vec<BookMetadata>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.search(&self.trending_query, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::{Volume, VolumeList};

    #[test]
    fn volume_payload_maps_to_metadata() {
        let payload = r#"{
            "totalItems": 2,
            "items": [
                {
                    "id": "abc123",
                    "volumeInfo": {
                        "title": "Dune",
                        "authors": ["Frank Herbert"],
                        "publishedDate": "1965",
                        "pageCount": 412,
                        "imageLinks": {"thumbnail": "http://books.example/dune.jpg"}
                    }
                },
                {"id": "no-title", "volumeInfo": {}}
            ]
        }"#;

        let list: VolumeList = serde_json::from_str(payload).expect("volume list parses");
        let books: Vec<_> = list.items.into_iter().filter_map(Volume::into_metadata).collect();

        assert_eq!(books.len(), 1);
        assert_eq!(books[0].id, "abc123");
        assert_eq!(books[0].authors, vec!["Frank Herbert".to_string()]);
        assert_eq!(books[0].page_count, Some(412));
        assert_eq!(books[0].image_url.as_deref(), Some("https://books.example/dune.jpg"));
    }

    #[test]
    fn empty_search_result_is_an_empty_list() {
        let list: VolumeList =
            serde_json::from_str(r#"{"kind": "books#volumes", "totalItems": 0}"#).expect("parses");
        assert!(list.items.is_empty());
    }
}
