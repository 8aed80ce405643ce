//! Per-kind fetch and extract handlers.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use lexi_core::target::{CrawlTarget, SourceKind};

use crate::error::{FetchError, ParseError};
use crate::extract::{extract_api, extract_feed, extract_html, Extracted};
use crate::fetcher::{Fetcher, RawPayload};

const HTML_ACCEPT: &str = "text/html,application/xhtml+xml;q=0.9,*/*;q=0.5";
const FEED_ACCEPT: &str =
    "application/rss+xml,application/atom+xml,application/xml;q=0.9,text/xml;q=0.8";

#[async_trait]
pub trait Source: Send + Sync {
    async fn fetch(
        &self,
        fetcher: &Fetcher,
        target: &mut CrawlTarget,
    ) -> Result<RawPayload, FetchError>;

    fn extract(&self, payload: &RawPayload) -> Result<Extracted, ParseError>;
}

pub struct HtmlSource;
pub struct FeedSource;
pub struct ApiSource;

#[async_trait]
impl Source for HtmlSource {
    async fn fetch(
        &self,
        fetcher: &Fetcher,
        target: &mut CrawlTarget,
    ) -> Result<RawPayload, FetchError> {
        fetcher.fetch(target, HTML_ACCEPT).await
    }

    fn extract(&self, payload: &RawPayload) -> Result<Extracted, ParseError> {
        extract_html(payload)
    }
}

#[async_trait]
impl Source for FeedSource {
    async fn fetch(
        &self,
        fetcher: &Fetcher,
        target: &mut CrawlTarget,
    ) -> Result<RawPayload, FetchError> {
        fetcher.fetch(target, FEED_ACCEPT).await
    }

    fn extract(&self, payload: &RawPayload) -> Result<Extracted, ParseError> {
        extract_feed(payload)
    }
}

#[async_trait]
impl Source for ApiSource {
    async fn fetch(
        &self,
        fetcher: &Fetcher,
        target: &mut CrawlTarget,
    ) -> Result<RawPayload, FetchError> {
        fetcher.fetch(target, "application/json").await
    }

    fn extract(&self, payload: &RawPayload) -> Result<Extracted, ParseError> {
        extract_api(payload)
    }
}

/// Maps each source kind to its handler.
#[derive(Clone)]
pub struct SourceRegistry {
    handlers: HashMap<SourceKind, Arc<dyn Source>>,
}

impl SourceRegistry {
    pub fn empty() -> Self {
        Self { handlers: HashMap::new() }
    }

    /// HTTP handlers for every kind.
    pub fn standard() -> Self {
        Self::empty()
            .with(SourceKind::Html, Arc::new(HtmlSource))
            .with(SourceKind::Feed, Arc::new(FeedSource))
            .with(SourceKind::Api, Arc::new(ApiSource))
    }

    pub fn with(mut self, kind: SourceKind, source: Arc<dyn Source>) -> Self {
        self.handlers.insert(kind, source);
        self
    }

    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn Source>> {
        self.handlers.get(&kind).cloned()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
