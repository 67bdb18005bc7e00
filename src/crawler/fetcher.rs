use async_trait::async_trait;
use reqwest::Client;
use tracing::warn;
use url::Url;

use crate::crawler::models::{Listing, ListingsPage, PaginationInfo};
use crate::crawler::parser;
use crate::crawler::{ListingPageProvider, ObjectProvider};

const USER_AGENT: &str = "RealtMirror/1.0 (approved)";

/// HTTP client for the upstream site, serving both the listing-index feed
/// and individual object pages.
pub struct RealtClient {
    client: Client,
    object_url_template: String,
}

impl RealtClient {
    pub fn new(object_url_template: String) -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .expect("failed to build http client");

        Self {
            client,
            object_url_template,
        }
    }

    async fn fetch_html(&self, url: &str) -> Option<String> {
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(error) => {
                warn!(url, %error, "request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(url, status = %response.status(), "non-success response");
            return None;
        }
        match response.text().await {
            Ok(body) => Some(body),
            Err(error) => {
                warn!(url, %error, "failed to read response body");
                None
            }
        }
    }
}

/// Rewrites or appends the `page=` query parameter on a base listing link.
pub fn with_page(base_link: &str, page: u32) -> String {
    let Ok(mut url) = Url::parse(base_link) else {
        let separator = if base_link.contains('?') { '&' } else { '?' };
        return format!("{base_link}{separator}page={page}");
    };

    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| name != "page")
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (name, value) in &retained {
            pairs.append_pair(name, value);
        }
        pairs.append_pair("page", &page.to_string());
    }
    url.to_string()
}

#[async_trait]
impl ListingPageProvider for RealtClient {
    async fn fetch_page(&self, base_link: &str, page: u32) -> Option<ListingsPage> {
        let url = with_page(base_link, page);
        let html = self.fetch_html(&url).await?;
        let (items, pagination) = parser::parse_listings_page(&html)?;
        let pagination = pagination.unwrap_or_else(|| PaginationInfo::covering(items.len()));
        Some(ListingsPage { items, pagination })
    }
}

#[async_trait]
impl ObjectProvider for RealtClient {
    async fn fetch_object(&self, code: i32) -> Option<Listing> {
        let url = self.object_url_template.replace("{code}", &code.to_string());
        let html = self.fetch_html(&url).await?;
        parser::parse_object_page(&html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_page_appends_when_absent() {
        assert_eq!(
            with_page("https://realt.by/sale/flats/", 3),
            "https://realt.by/sale/flats/?page=3"
        );
    }

    #[test]
    fn with_page_replaces_existing_parameter() {
        assert_eq!(
            with_page("https://realt.by/sale/flats/?page=1", 4),
            "https://realt.by/sale/flats/?page=4"
        );
    }

    #[test]
    fn with_page_preserves_other_parameters() {
        assert_eq!(
            with_page("https://realt.by/sale/flats/?rooms=2&page=1", 2),
            "https://realt.by/sale/flats/?rooms=2&page=2"
        );
    }
}
