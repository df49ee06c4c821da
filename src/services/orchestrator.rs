//! Drives one streamed image generation: authorise, enhance, submit, poll,
//! resolve. Every exit path ends in [`GenerationOrchestrator::run`], which
//! closes the progress stream exactly once.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use crate::config::GenerationSettings;
use crate::models::job::{Job, JobPatch, JobRequest, JobStatus};
use crate::models::user::UserProfile;
use crate::services::accounts::{AccountError, AccountService};
use crate::services::enhancer::{EnhancerError, PromptEnhancer};
use crate::services::job_store::{JobStore, StoreError, UpdateOutcome};
use crate::services::progress::{self, escape_html, ProgressLine, ProgressReceiver, ProgressWriter};
use crate::services::prompt;
use crate::services::provider::{
    is_invalid_user_action, Callback, ImageProvider, ProviderError, ProviderProgress,
};

const BETA_NOTICE: &str = "This feature is still in Beta, please expect some non-ideal images and report any issue to admin. Thanks. \n";
const GENERIC_FAILURE: &str = "Error occurred while generating image, please try again later.";

/// What the user asked for, taken from the chat request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub text: String,
    pub style: Option<String>,
    pub quality: Option<String>,
    pub temperature: Option<f64>,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Ran out of image generation credit")]
    OutOfCredits,

    #[error("Prompt enhancement failed: {0}")]
    Enhancement(#[source] EnhancerError),

    #[error("Provider submission failed: {0}")]
    ProviderSubmissionFailed(#[source] ProviderError),

    #[error("Provider polling failed: {0}")]
    ProviderPollingFailed(#[source] ProviderError),

    #[error("{0}")]
    InvalidUserAction(String),

    #[error("Generation timed out")]
    Timeout,

    /// Another party (usually the webhook relay) failed the job first.
    #[error("Job finished elsewhere: {0}")]
    Aborted(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Account error: {0}")]
    Accounts(#[source] AccountError),
}

impl GenerationError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Unauthorized => "unauthorized",
            GenerationError::OutOfCredits => "out_of_credits",
            GenerationError::Enhancement(_) => "enhancement",
            GenerationError::ProviderSubmissionFailed(_) => "submission",
            GenerationError::ProviderPollingFailed(_) => "polling",
            GenerationError::InvalidUserAction(_) => "invalid_user_action",
            GenerationError::Timeout => "timeout",
            GenerationError::Aborted(_) => "aborted",
            GenerationError::Internal(_) => "internal",
            GenerationError::Store(_) => "store",
            GenerationError::Accounts(_) => "accounts",
        }
    }
}

impl From<AccountError> for GenerationError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::Unauthorized => GenerationError::Unauthorized,
            other => GenerationError::Accounts(other),
        }
    }
}

pub struct GenerationOrchestrator {
    store: Arc<dyn JobStore>,
    provider: Arc<dyn ImageProvider>,
    enhancer: Arc<dyn PromptEnhancer>,
    accounts: Arc<dyn AccountService>,
    settings: GenerationSettings,
}

impl GenerationOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        provider: Arc<dyn ImageProvider>,
        enhancer: Arc<dyn PromptEnhancer>,
        accounts: Arc<dyn AccountService>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            store,
            provider,
            enhancer,
            accounts,
            settings,
        }
    }

    /// Resolve the caller and make sure they may generate an image.
    pub async fn authorize(&self, token: &str) -> Result<UserProfile, GenerationError> {
        let user = self.accounts.authenticate(token).await?;
        if !user.plan.can_generate_images() {
            return Err(GenerationError::Unauthorized);
        }
        if self.accounts.has_run_out_of_credits(user.id).await? {
            return Err(GenerationError::OutOfCredits);
        }
        Ok(user)
    }

    /// Create the job and run the generation in the background, returning the
    /// stream the caller reads progress from.
    pub async fn start(
        self: &Arc<Self>,
        user: &UserProfile,
        request: GenerationRequest,
    ) -> Result<ProgressReceiver, GenerationError> {
        let job = Job::new(
            user.id,
            JobRequest::Imagine {
                prompt: request.text.clone(),
            },
        );
        self.store.create(&job).await?;
        metrics::counter!("imagegen_jobs_total", "channel" => "stream").increment(1);

        tracing::info!(job_id = %job.id, user_id = %user.id, "Starting image generation");

        let (writer, receiver) = progress::channel();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run(&job, &request, writer).await;
        });
        Ok(receiver)
    }

    /// Full lifecycle for an already created job. Always finishes `writer`.
    pub async fn run(&self, job: &Job, request: &GenerationRequest, mut writer: ProgressWriter) {
        writer.push(ProgressLine::loading("Initializing ... \n"));
        writer.push(ProgressLine::loading(BETA_NOTICE));

        if let Err(err) = self.generate(job, request, &mut writer).await {
            self.fail(job.id, &err, &mut writer).await;
        }

        writer.finish();
    }

    async fn generate(
        &self,
        job: &Job,
        request: &GenerationRequest,
        writer: &mut ProgressWriter,
    ) -> Result<(), GenerationError> {
        match self
            .store
            .update_if(job.id, &[JobStatus::Enqueued], &JobPatch::started(Utc::now()))
            .await?
        {
            UpdateOutcome::Applied => {}
            UpdateOutcome::Rejected(status) => {
                return Err(GenerationError::Internal(format!(
                    "job {} is already {status}",
                    job.id
                )));
            }
        }

        writer.push(ProgressLine::loading(
            "Enhancing and translating user input prompt ... \n",
        ));
        let enhanced = self
            .enhancer
            .enhance(&request.text)
            .await
            .map_err(GenerationError::Enhancement)?;

        let generation_prompt = prompt::build_with_defaults(
            &enhanced,
            request.style.as_deref(),
            request.quality.as_deref(),
            request.temperature,
        );
        writer.update(
            ProgressLine::loading(format!("Prompt: {generation_prompt} \n")),
            true,
        );

        let callback = Callback {
            reference: job.id.to_string(),
            webhook_override: self.settings.webhook_url.clone(),
        };
        let message_id = self
            .provider
            .imagine(&generation_prompt, &callback)
            .await
            .map_err(GenerationError::ProviderSubmissionFailed)?;

        self.store
            .update(
                job.id,
                &JobPatch {
                    message_id: Some(message_id.clone()),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(job_id = %job.id, message_id = %message_id, "Prompt submitted to provider");

        self.poll(job, request, &message_id, writer).await
    }

    async fn poll(
        &self,
        job: &Job,
        request: &GenerationRequest,
        message_id: &str,
        writer: &mut ProgressWriter,
    ) -> Result<(), GenerationError> {
        let started = Instant::now();
        let mut last_progress: Option<u8> = None;

        writer.push(ProgressLine::loading("Start to generate \n"));

        loop {
            if started.elapsed() >= self.settings.timeout {
                return Err(GenerationError::Timeout);
            }
            tokio::time::sleep(self.settings.poll_interval).await;

            if let Some(current) = self.store.get(job.id).await? {
                if current.status.is_terminal() {
                    return self.adopt_external_result(&current, writer);
                }
            }

            let status = self
                .provider
                .message(message_id)
                .await
                .map_err(GenerationError::ProviderPollingFailed)?;
            let elapsed = started.elapsed().as_secs();

            if status.progress == Some(100) {
                return self.resolve(job, request, status, elapsed, writer).await;
            }

            if status.progress != last_progress {
                if let Some(progress) = status.progress {
                    let content = if progress == 0 {
                        format!("Waiting to be processed ... {elapsed}s \n")
                    } else {
                        format!("{progress}% complete ... {elapsed}s \n")
                    };
                    writer.update(ProgressLine::loading(content).with_percentage(progress), true);
                    // A terminal status is picked up on the next iteration.
                    self.store
                        .update_if(job.id, &[JobStatus::Processing], &JobPatch::progress(progress))
                        .await?;
                }
                last_progress = status.progress;
            }
        }
    }

    async fn resolve(
        &self,
        job: &Job,
        request: &GenerationRequest,
        status: ProviderProgress,
        elapsed_secs: u64,
        writer: &mut ProgressWriter,
    ) -> Result<(), GenerationError> {
        if status.image_url.is_none() || status.image_urls.is_empty() {
            let content = status.content.unwrap_or_default();
            if is_invalid_user_action(&content) {
                return Err(GenerationError::InvalidUserAction(content));
            }
            let detail = if content.is_empty() {
                "No response content".to_string()
            } else {
                content
            };
            return Err(GenerationError::Internal(format!(
                "provider finished without images ({detail})"
            )));
        }

        writer.push(ProgressLine::completed(format!(
            "Completed in {elapsed_secs}s \n"
        )));
        writer.write(&image_selection_markup(
            &status.image_urls,
            &request.text,
            status.button_message_id.as_deref().unwrap_or_default(),
        ));

        let patch = JobPatch {
            status: Some(JobStatus::Completed),
            progress: Some(100),
            image_url: status.image_url.clone(),
            image_urls: Some(status.image_urls.clone()),
            buttons: Some(status.buttons.clone()),
            message_id: status.button_message_id.clone(),
            clear_reason: true,
            ..Default::default()
        };
        // FAILED is allowed: a failure callback may land between the last
        // status check and this point while the provider still delivered.
        match self
            .store
            .update_if(job.id, &[JobStatus::Processing, JobStatus::Failed], &patch)
            .await?
        {
            UpdateOutcome::Applied => self.charge(job.user_id).await,
            UpdateOutcome::Rejected(current) => {
                // Only a completion is rejected here, and it was charged when applied.
                tracing::warn!(job_id = %job.id, status = %current, "Job completed elsewhere before resolution");
            }
        }

        metrics::counter!("imagegen_jobs_completed", "channel" => "stream").increment(1);
        metrics::histogram!("imagegen_generation_seconds").record(elapsed_secs as f64);
        tracing::info!(job_id = %job.id, elapsed_secs, images = status.image_urls.len(), "Image generation completed");
        Ok(())
    }

    /// The job reached a terminal state through another channel while we
    /// were polling.
    fn adopt_external_result(
        &self,
        current: &Job,
        writer: &mut ProgressWriter,
    ) -> Result<(), GenerationError> {
        match current.status {
            JobStatus::Completed => {
                let urls = if current.image_urls.is_empty() {
                    current.image_url.iter().cloned().collect()
                } else {
                    current.image_urls.clone()
                };
                let prompt_text = match &current.request {
                    JobRequest::Imagine { prompt } => prompt.as_str(),
                    JobRequest::ButtonCommand { button, .. } => button.as_str(),
                };
                writer.push(ProgressLine::completed("Completed \n"));
                writer.write(&image_selection_markup(
                    &urls,
                    prompt_text,
                    current.message_id.as_deref().unwrap_or_default(),
                ));
                Ok(())
            }
            _ => Err(GenerationError::Aborted(
                current
                    .reason
                    .clone()
                    .unwrap_or_else(|| "generation failed".to_string()),
            )),
        }
    }

    async fn charge(&self, user_id: Uuid) {
        if let Err(e) = self.accounts.add_usage_entry(user_id).await {
            tracing::error!(user_id = %user_id, error = %e, "Failed to record usage entry");
        }
        if let Err(e) = self.accounts.subtract_credit(user_id).await {
            tracing::error!(user_id = %user_id, error = %e, "Failed to subtract credit");
        }
    }

    async fn fail(&self, job_id: Uuid, err: &GenerationError, writer: &mut ProgressWriter) {
        match err {
            GenerationError::InvalidUserAction(_)
            | GenerationError::Timeout
            | GenerationError::Aborted(_) => {
                tracing::warn!(job_id = %job_id, error = %err, "Image generation did not complete");
            }
            _ => tracing::error!(job_id = %job_id, error = %err, "Image generation failed"),
        }
        metrics::counter!("imagegen_jobs_failed", "reason" => err.kind()).increment(1);

        writer.push(ProgressLine::error(self.user_message(err)));

        let outcome = self
            .store
            .update_if(
                job_id,
                &[JobStatus::Enqueued, JobStatus::Processing],
                &JobPatch::failed(err.to_string()),
            )
            .await;
        if let Err(e) = outcome {
            tracing::error!(job_id = %job_id, error = %e, "Failed to mark job as failed");
        }
    }

    fn user_message(&self, err: &GenerationError) -> String {
        match err {
            GenerationError::InvalidUserAction(message) | GenerationError::Aborted(message) => {
                format!("Error: {message} \n")
            }
            GenerationError::Timeout => format!(
                "Unable to finish the generation in {} seconds, please try again later.",
                self.settings.timeout.as_secs()
            ),
            _ => GENERIC_FAILURE.to_string(),
        }
    }
}

/// Grid of candidate images with the follow-up buttons the chat UI renders
/// under each one.
pub fn image_selection_markup(urls: &[String], prompt_text: &str, button_message_id: &str) -> String {
    let alt: String = prompt_text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .take(20)
        .collect();
    let alt = escape_html(&alt);
    let button_message_id = escape_html(button_message_id);

    let images: String = urls
        .iter()
        .enumerate()
        .map(|(index, url)| {
            let n = index + 1;
            format!(
                r#"<img src="{}" alt="{alt}" data-ai-image-buttons="U{n},V{n}" data-ai-image-button-message-id="{button_message_id}" data-ai-image-button-commands-executed="0" />"#,
                escape_html(url),
            )
        })
        .collect();

    format!(
        "\n\n<div id=\"mj-image-selection\" class=\"grid grid-cols-2 gap-0 my-4\">{images}</div>\n\n"
    )
}
