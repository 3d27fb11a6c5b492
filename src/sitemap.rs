//! Sitemap identifier source
//!
//! Downloads each configured sitemap document and collects the text of every
//! `<loc>` element in document order. A sitemap that cannot be fetched or
//! parsed is logged and skipped; the caller treats an empty result as
//! "nothing to process".

use crate::config::SessionConfig;
use crate::error::Result;
use crate::session::Session;
use quick_xml::Reader;
use quick_xml::events::Event;
use std::time::Duration;

/// Timeout for one sitemap download
pub const SITEMAP_TIMEOUT: Duration = Duration::from_secs(30);

/// Extract every `<loc>` value from a sitemap document
///
/// Namespaces are ignored, so both `<loc>` and `<sm:loc>` match. Values are
/// trimmed and empty entries are dropped.
pub fn parse_locations(document: &[u8]) -> Result<Vec<String>> {
    let mut reader = Reader::from_reader(document);
    reader.trim_text(true);

    let mut locations = Vec::new();
    let mut buf = Vec::new();
    let mut in_loc = false;
    let mut current = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"loc" => {
                in_loc = true;
                current.clear();
            }
            Event::Text(t) if in_loc => current.push_str(&t.unescape()?),
            Event::CData(c) if in_loc => {
                current.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Event::End(e) if e.local_name().as_ref() == b"loc" => {
                in_loc = false;
                let location = current.trim();
                if !location.is_empty() {
                    locations.push(location.to_string());
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(locations)
}

/// Identifier source backed by one or more sitemap URLs
#[derive(Debug)]
pub struct SitemapSource {
    urls: Vec<String>,
    session: Session,
}

impl SitemapSource {
    /// Create a source for `urls`, using its own HTTP session
    pub fn new(urls: Vec<String>, session_config: &SessionConfig) -> Result<Self> {
        Ok(Self {
            urls,
            session: Session::new(0, session_config)?,
        })
    }

    /// Fetch all sitemaps and return their item links in order
    pub async fn links(&self) -> Vec<String> {
        let mut links = Vec::new();
        for url in &self.urls {
            match self.fetch_one(url).await {
                Ok(found) => {
                    tracing::info!(url = %url, links = found.len(), "loaded sitemap");
                    links.extend(found);
                }
                Err(e) => {
                    tracing::error!(url = %url, error = %e, "failed to load sitemap");
                }
            }
        }
        links
    }

    async fn fetch_one(&self, url: &str) -> Result<Vec<String>> {
        let body = self.session.get_bytes(url, SITEMAP_TIMEOUT).await?;
        parse_locations(&body)
    }
}
