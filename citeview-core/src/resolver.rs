use std::sync::Arc;

use tracing::{debug, instrument};

use crate::error::ResolutionError;
use crate::transport::RelevanceTransport;

#[derive(Clone)]
pub struct PageResolver {
    transport: Arc<dyn RelevanceTransport>,
}

impl PageResolver {
    pub fn new(transport: Arc<dyn RelevanceTransport>) -> Self {
        Self { transport }
    }

    /// Best starting page for `query` inside `file_name`, always `>= 1`.
    #[instrument(skip(self, query), fields(query_len = query.len()))]
    pub async fn resolve_page(&self, file_name: &str, query: &str) -> Result<u32, ResolutionError> {
        let raw = self.transport.relevant_page(file_name, query).await?;
        let page = u32::try_from(raw.max(1)).unwrap_or(u32::MAX);
        debug!(page, "resolved relevant page");
        Ok(page)
    }
}
