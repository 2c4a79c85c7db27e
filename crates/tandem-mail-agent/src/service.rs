//! Agent A orchestration: fetch, analyze, plan, delegate, create

use chrono::Utc;
use tracing::{debug, info, warn};

use tandem_core::delegation::DelegationClient;
use tandem_core::error::{ApiError, ProviderError};
use tandem_core::protocol::{BatchItemError, MAX_BATCH_SIZE};
use tandem_core::scope::{CALENDAR_AUDIENCE, CALENDAR_WRITE, ScopeSet};

use crate::calendar_client::CalendarAgentClient;
use crate::mail::MailService;
use crate::planner::plan_events;
use crate::protocol::{
    DEFAULT_MAX_RESULTS, EmailInput, EmailListResponse, EmailSummary, EmailSummaryResponse,
    ExtractTasksResponse, ItemError, MAX_RESULTS_LIMIT, ProcessEmailsRequest,
    ProcessEmailsResponse,
};
use crate::summarize::Summarizer;

/// Longest email id accepted on the path
const MAX_EMAIL_ID_LEN: usize = 256;

/// Failures that would repeat for every remaining email
fn is_account_wide(err: &ApiError) -> bool {
    matches!(
        err,
        ApiError::Provider(ProviderError::AuthExpired { .. } | ProviderError::QuotaExceeded { .. })
    )
}

pub struct MailAgent {
    mail: MailService,
    summarizer: Summarizer,
    delegation: DelegationClient,
    calendar: CalendarAgentClient,
}

impl MailAgent {
    pub fn new(
        mail: MailService,
        summarizer: Summarizer,
        delegation: DelegationClient,
        calendar: CalendarAgentClient,
    ) -> Self {
        Self {
            mail,
            summarizer,
            delegation,
            calendar,
        }
    }

    pub fn mail_configured(&self) -> bool {
        self.mail.is_configured()
    }

    pub fn ai_configured(&self) -> bool {
        self.summarizer.is_configured()
    }

    pub fn calendar_agent_url(&self) -> &str {
        self.calendar.base_url()
    }

    /// The full pipeline. Emails are analyzed one at a time; the delegated
    /// token is requested once, and only when there is something to create.
    pub async fn process_emails(
        &self,
        session_token: &str,
        request: &ProcessEmailsRequest,
    ) -> Result<ProcessEmailsResponse, ApiError> {
        let max_results = request.resolved_max_results()?;
        let (messages, mut errors) = self.mail.list_emails(max_results, request.query()).await?;
        info!("Processing {} emails", messages.len());

        let mut summaries = Vec::with_capacity(messages.len());
        for message in &messages {
            match self.summarizer.analyze(message).await {
                Ok(analysis) => summaries.push(EmailSummary {
                    email_id: message.id.clone(),
                    subject: message.subject.clone(),
                    from: message.from.clone(),
                    summary: analysis.summary,
                    actions: analysis.actions,
                }),
                Err(e) if is_account_wide(&e) => return Err(e),
                Err(e) => {
                    warn!("Analysis of email {} failed: {}", message.id, e);
                    errors.push(ItemError::analyze(&message.id, &e));
                }
            }
        }

        let drafts = plan_events(&summaries, Utc::now());
        let mut response = ProcessEmailsResponse {
            processed: summaries.len(),
            summaries,
            events_created: Vec::new(),
            errors,
        };
        if drafts.is_empty() {
            debug!("No action items, skipping calendar agent");
            return Ok(response);
        }

        let credential = self
            .delegation
            .request_delegated_token(
                session_token,
                CALENDAR_AUDIENCE,
                ScopeSet::from_iter([CALENDAR_WRITE]),
            )
            .await?;

        // One credential covers every chunk. A chunk rejected outright after
        // an earlier one went through is reported per event so the created
        // events are not lost.
        let total = drafts.len();
        let mut remaining = drafts.into_iter();
        let mut offset = 0;
        loop {
            let chunk: Vec<_> = remaining.by_ref().take(MAX_BATCH_SIZE).collect();
            if chunk.is_empty() {
                break;
            }
            let len = chunk.len();
            let titles: Vec<String> = chunk.iter().map(|d| d.title.clone()).collect();
            match self.calendar.create_events(&credential, chunk).await {
                Ok(created) => {
                    response.events_created.extend(created.created);
                    response.errors.extend(
                        created
                            .errors
                            .unwrap_or_default()
                            .into_iter()
                            .map(|mut e| {
                                e.index += offset;
                                ItemError::calendar(e)
                            }),
                    );
                }
                Err(e) if offset == 0 => return Err(e),
                Err(e) => {
                    warn!("Calendar chunk at {} of {} failed: {}", offset, total, e);
                    response
                        .errors
                        .extend(titles.into_iter().enumerate().map(|(i, title)| {
                            ItemError::calendar(BatchItemError {
                                index: offset + i,
                                title,
                                message: e.to_string(),
                                code: e.code(),
                            })
                        }));
                }
            }
            offset += len;
        }
        info!(
            processed = response.processed,
            events = response.events_created.len(),
            errors = response.errors.len(),
            "process-emails complete"
        );
        Ok(response)
    }

    /// Analyze an email submitted in the request body
    pub async fn extract_tasks(&self, email: Option<EmailInput>) -> Result<ExtractTasksResponse, ApiError> {
        let message = email
            .ok_or_else(|| ApiError::validation("email: is required"))?
            .into_message()?;
        let analysis = self.summarizer.analyze(&message).await?;
        Ok(ExtractTasksResponse {
            summary: analysis.summary,
            actions: analysis.actions,
            metadata: analysis.metadata,
        })
    }

    /// Fetch one email and analyze it
    pub async fn email_summary(&self, email_id: &str) -> Result<EmailSummaryResponse, ApiError> {
        let email_id = email_id.trim();
        if email_id.is_empty() || email_id.len() > MAX_EMAIL_ID_LEN {
            return Err(ApiError::validation("emailId: must be a non-empty identifier"));
        }
        let email = self.mail.get_email(email_id).await?;
        let analysis = self.summarizer.analyze(&email).await?;
        Ok(EmailSummaryResponse {
            email,
            summary: analysis.summary,
            actions: analysis.actions,
        })
    }

    pub async fn list_emails(
        &self,
        max_results: Option<u32>,
        query: Option<&str>,
    ) -> Result<EmailListResponse, ApiError> {
        let max = max_results.unwrap_or(DEFAULT_MAX_RESULTS);
        if !(1..=MAX_RESULTS_LIMIT).contains(&max) {
            return Err(ApiError::validation(format!(
                "maxResults: must be between 1 and {}",
                MAX_RESULTS_LIMIT
            )));
        }
        let query = query.map(str::trim).filter(|q| !q.is_empty());
        let (emails, errors) = self.mail.list_emails(max, query).await?;
        Ok(EmailListResponse { emails, errors })
    }
}
