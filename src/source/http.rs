use anyhow::Result;

use crate::source::{QuoteRequest, QuoteSource};
use crate::types::Point;

///Quote source backed by a remote process speaking JSON over HTTP.
#[derive(Clone, Debug)]
pub struct HttpQuoteSource {
    pub path: String,
    pub client: reqwest::Client,
}

impl HttpQuoteSource {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            client: reqwest::Client::new(),
        }
    }
}

impl QuoteSource for HttpQuoteSource {
    async fn quote(&self, request: QuoteRequest) -> Result<Vec<Point>> {
        Ok(self
            .client
            .post(self.path.clone() + "/quote")
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Point>>()
            .await?)
    }
}
