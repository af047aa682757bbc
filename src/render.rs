use anyhow::{anyhow, Result};
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use tracing::debug;

/// Fallback page source for listings whose records only appear after
/// client-side rendering. Backed by spider.cloud, which returns the rendered
/// document.
pub struct Renderer {
    spider: Spider,
}

impl Renderer {
    pub fn new(api_key: String) -> Result<Self> {
        let spider = Spider::new(Some(api_key))
            .map_err(|e| anyhow!("Failed to create Spider client: {}", e))?;
        Ok(Self { spider })
    }

    /// Rendered HTML of `url`.
    pub async fn render(&self, url: &str) -> Result<String> {
        let params = RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
            ..Default::default()
        };

        debug!("Rendering {}", url);
        let response = self
            .spider
            .scrape_url(url, Some(params), "application/json")
            .await
            .map_err(|e| anyhow!("Spider render failed for {}: {}", url, e))?;

        content_of(response).ok_or_else(|| anyhow!("No content in spider response for {}", url))
    }
}

/// The `content` of the first entry. Some responses arrive as a JSON string
/// wrapping the array.
fn content_of(response: serde_json::Value) -> Option<String> {
    let parsed: serde_json::Value = match response.as_str() {
        Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
        None => response,
    };

    parsed
        .as_array()
        .and_then(|arr| arr.first())
        .and_then(|obj| obj.get("content"))
        .and_then(|c| c.as_str())
        .filter(|c| !c.trim().is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn reads_first_entry_content() {
        let v = json!([{ "content": "<html>one</html>", "status": 200 }, { "content": "two" }]);
        assert_eq!(content_of(v).as_deref(), Some("<html>one</html>"));
    }

    #[test]
    fn unwraps_string_encoded_array() {
        let v = serde_json::Value::String(r#"[{"content":"<p>x</p>"}]"#.to_string());
        assert_eq!(content_of(v).as_deref(), Some("<p>x</p>"));
    }

    #[test]
    fn missing_or_blank_content_is_none() {
        assert_eq!(content_of(json!([])), None);
        assert_eq!(content_of(json!({ "content": "top-level object" })), None);
        assert_eq!(content_of(json!([{ "content": "  " }])), None);
        assert_eq!(content_of(json!([{ "status": 500 }])), None);
    }
}
