// Mention poller: the bot's main loop.
//
// Init → Authenticating → Polling ⇄ Processing, with Stopped as the terminal
// state when authentication fails. Mentions are processed one at a time,
// oldest first, and the cursor is persisted after every mention whether or
// not it succeeded, so a bad mention can never wedge the bot.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::analysis::{AnalysisError, TrustPipeline, Verdict};
use crate::cursor::CursorStore;
use crate::platform::{Account, Post, PostId, SocialPlatform};
use crate::reply;
use crate::resolver::resolve_context;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MENTION_BATCH: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollerState {
    Init,
    Authenticating,
    Polling,
    Processing,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerSettings {
    pub poll_interval: Duration,
    pub mention_batch: u32,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            mention_batch: DEFAULT_MENTION_BATCH,
        }
    }
}

/// What happened to one mention.
#[derive(Debug, Clone, PartialEq)]
pub struct MentionOutcome {
    pub mention_id: PostId,
    /// `None` when the image couldn't be fetched or the mention was skipped
    pub verdict: Option<Verdict>,
    pub reply: Option<String>,
    pub replied: bool,
}

/// Summary of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub fetched: usize,
    pub processed: usize,
    pub cursor: Option<PostId>,
}

pub struct Poller {
    platform: Arc<dyn SocialPlatform>,
    cursor_store: Arc<dyn CursorStore>,
    pipeline: Arc<TrustPipeline>,
    settings: PollerSettings,
    state: PollerState,
    account: Option<Account>,
    cursor: Option<PostId>,
    /// No cursor was stored and the newest mention hasn't been adopted yet
    baseline_pending: bool,
}

impl Poller {
    pub fn new(
        platform: Arc<dyn SocialPlatform>,
        cursor_store: Arc<dyn CursorStore>,
        pipeline: Arc<TrustPipeline>,
        settings: PollerSettings,
    ) -> Self {
        Self {
            platform,
            cursor_store,
            pipeline,
            settings,
            state: PollerState::Init,
            account: None,
            cursor: None,
            baseline_pending: false,
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn cursor(&self) -> Option<PostId> {
        self.cursor
    }

    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    /// Load the cursor and authenticate. A cursor that can't be read or an
    /// authentication failure moves the poller to `Stopped` and is returned
    /// as an error.
    pub async fn start(&mut self) -> Result<()> {
        self.state = PollerState::Init;
        self.cursor = match self.cursor_store.load().await {
            Ok(cursor) => cursor,
            Err(e) => {
                self.state = PollerState::Stopped;
                return Err(e.context("Failed to load mention cursor"));
            }
        };

        self.state = PollerState::Authenticating;
        let account = match self.platform.me().await {
            Ok(account) => account,
            Err(e) => {
                self.state = PollerState::Stopped;
                return Err(e.context("Authentication with the social platform failed"));
            }
        };
        info!(username = %account.username, user_id = %account.id, "Authenticated");
        self.account = Some(account);
        self.state = PollerState::Polling;

        match self.cursor {
            Some(cursor) => info!(cursor = %cursor, "Resuming from stored cursor"),
            None => {
                self.baseline_pending = true;
                if let Err(e) = self.adopt_baseline().await {
                    warn!(error = %e, "Could not read newest mention, will retry next cycle");
                }
            }
        }
        Ok(())
    }

    /// With no stored cursor, start from "now": adopt the newest existing
    /// mention's id without processing the backlog.
    async fn adopt_baseline(&mut self) -> Result<()> {
        let user_id = self.user_id()?;
        let mentions = self
            .platform
            .mentions_since(&user_id, None, self.settings.mention_batch)
            .await?;

        if let Some(newest) = mentions.iter().map(|m| m.id).max() {
            self.cursor_store.save(newest).await?;
            self.cursor = Some(newest);
            info!(cursor = %newest, skipped = mentions.len(), "No stored cursor, starting after newest mention");
        } else {
            info!("No stored cursor and no existing mentions");
        }
        self.baseline_pending = false;
        Ok(())
    }

    fn user_id(&self) -> Result<String> {
        self.account
            .as_ref()
            .map(|a| a.id.clone())
            .ok_or_else(|| anyhow::anyhow!("Poller is not authenticated"))
    }

    /// Fetch and process one batch of new mentions.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        if self.baseline_pending {
            self.adopt_baseline().await?;
            return Ok(CycleReport {
                cursor: self.cursor,
                ..CycleReport::default()
            });
        }

        let user_id = self.user_id()?;
        self.record_poll().await;

        let mut mentions = self
            .platform
            .mentions_since(&user_id, self.cursor, self.settings.mention_batch)
            .await
            .context("Failed to fetch mentions")?;
        mentions.sort_by_key(|m| m.id);

        let fetched = mentions.len();
        if fetched == 0 {
            debug!("No new mentions");
        } else {
            info!(count = fetched, "New mentions");
        }

        let mut processed = 0;
        for mention in mentions {
            if self.cursor.is_some_and(|c| mention.id <= c) {
                continue;
            }

            self.state = PollerState::Processing;
            self.process_mention(&mention).await;
            self.advance_cursor(mention.id).await;
            self.state = PollerState::Polling;
            processed += 1;
        }

        Ok(CycleReport {
            fetched,
            processed,
            cursor: self.cursor,
        })
    }

    async fn advance_cursor(&mut self, id: PostId) {
        self.cursor = Some(id);
        if let Err(e) = self.cursor_store.save(id).await {
            error!(cursor = %id, error = %e, "Failed to persist cursor");
        }
    }

    async fn record_poll(&self) {
        let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        if let Err(e) = self.cursor_store.record_poll(&now).await {
            warn!(error = %e, "Failed to record poll time");
        }
    }

    /// Resolve, analyze, and reply to a single mention. Never fails; every
    /// problem is logged and reflected in the outcome.
    pub async fn process_mention(&self, mention: &Post) -> MentionOutcome {
        let Some(account) = self.account.as_ref() else {
            return MentionOutcome {
                mention_id: mention.id,
                verdict: None,
                reply: None,
                replied: false,
            };
        };

        if mention.author.id == account.id {
            debug!(mention_id = %mention.id, "Skipping own post");
            return MentionOutcome {
                mention_id: mention.id,
                verdict: None,
                reply: None,
                replied: false,
            };
        }

        let context = resolve_context(self.platform.as_ref(), mention, &account.username).await;
        info!(
            mention_id = %mention.id,
            subject_id = %context.subject_post_id,
            author = %context.author_username,
            media = context.media_urls.len(),
            question = %reply::truncate_chars(&context.question, 80),
            "Processing mention"
        );

        let token = reply::random_token();
        let (verdict, text) = match self.pipeline.analyze(&context.to_request()).await {
            Ok(verdict) => {
                let text = reply::compose_reply(&verdict, &token);
                (Some(verdict), text)
            }
            Err(AnalysisError::Fetch { url, message }) => {
                warn!(mention_id = %mention.id, url = %url, error = %message, "Media fetch failed");
                (None, reply::fetch_failure_reply(&token))
            }
        };

        let replied = match self.platform.post_reply(mention.id, &text).await {
            Ok(reply_id) => {
                info!(mention_id = %mention.id, reply_id = %reply_id, "Replied");
                true
            }
            Err(e) => {
                error!(mention_id = %mention.id, error = %e, "Failed to post reply");
                false
            }
        };

        MentionOutcome {
            mention_id: mention.id,
            verdict,
            reply: Some(text),
            replied,
        }
    }

    /// Authenticate, then poll forever. Returns only on authentication
    /// failure; cycle errors are logged and the loop continues.
    pub async fn run(mut self) -> Result<()> {
        self.start().await?;
        info!(
            interval_secs = self.settings.poll_interval.as_secs(),
            batch = self.settings.mention_batch,
            "Polling for mentions"
        );

        loop {
            match self.run_cycle().await {
                Ok(report) if report.processed > 0 => {
                    info!(processed = report.processed, cursor = ?report.cursor, "Cycle complete");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Poll cycle failed"),
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}
