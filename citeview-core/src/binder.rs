use std::sync::Arc;

use tracing::{instrument, warn};

use crate::citation::Citation;
use crate::controller::{OpenOutcome, ViewerController};
use crate::error::FetchError;

/// A failure notice appended to the conversation, with a retry affordance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatNotice {
    pub content: String,
    pub detail: String,
    pub has_error: bool,
    /// HTTP status of the failed download, 404 for a missing file.
    pub status: Option<u16>,
    pub retry: Option<Citation>,
}

impl ChatNotice {
    pub fn download_failed(citation: &Citation, err: &FetchError) -> Self {
        let detail = err.to_string();
        Self {
            content: format!(
                "Sorry, I'm having trouble with downloading the file. Error details: {detail}"
            ),
            detail,
            has_error: true,
            status: err.status(),
            retry: Some(citation.clone()),
        }
    }
}

/// Where the chat subsystem wants failure notices delivered.
pub trait NoticeSink: Send + Sync {
    fn report(&self, notice: ChatNotice);
}

impl<F> NoticeSink for F
where
    F: Fn(ChatNotice) + Send + Sync,
{
    fn report(&self, notice: ChatNotice) {
        self(notice)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Opened { page: u32 },
    Superseded,
    /// The open failed and a notice went to the chat.
    Reported,
}

#[derive(Clone)]
pub struct CitationBinder {
    controller: ViewerController,
    notices: Arc<dyn NoticeSink>,
}

impl CitationBinder {
    pub fn new(controller: ViewerController, notices: Arc<dyn NoticeSink>) -> Self {
        Self {
            controller,
            notices,
        }
    }

    pub fn controller(&self) -> &ViewerController {
        &self.controller
    }

    #[instrument(skip(self, citation), fields(file_name = %citation.file_name))]
    pub async fn activate(&self, citation: Citation) -> Activation {
        match self.controller.open_citation(citation.clone()).await {
            Ok(OpenOutcome::Opened { page }) => Activation::Opened { page },
            Ok(OpenOutcome::Superseded) => Activation::Superseded,
            Err(err) => {
                warn!(%err, status = ?err.status(), "reporting failed citation open to chat");
                self.notices
                    .report(ChatNotice::download_failed(&citation, &err));
                Activation::Reported
            }
        }
    }

    /// Re-activates the citation a notice was raised for.
    pub async fn retry(&self, notice: &ChatNotice) -> Option<Activation> {
        let citation = notice.retry.clone()?;
        Some(self.activate(citation).await)
    }
}
