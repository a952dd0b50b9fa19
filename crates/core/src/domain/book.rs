use serde::{Deserialize, Serialize};

/// Catalog entry as returned by the book-metadata lookup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMetadata {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub published: Option<String>,
    #[serde(default)]
    pub page_count: Option<u32>,
}

/// A title the completion delegate suggested, before metadata lookup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedTitle {
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    pub book: BookMetadata,
    pub suggested_author: String,
    pub reason: String,
}

/// Strips a trailing subtitle (after `:`, ` - ` or an en/em dash) and surrounding
/// markdown emphasis so the catalog is searched by the main title only.
pub fn normalize_title(title: &str) -> String {
    let main = title
        .split([':', '\u{2013}', '\u{2014}'])
        .next()
        .unwrap_or(title);
    let main = main.split(" - ").next().unwrap_or(main);
    main.trim().trim_matches(|c: char| c == '*' || c == '"' || c == '_').trim().to_string()
}
