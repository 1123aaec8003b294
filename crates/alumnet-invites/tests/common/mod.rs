//! Shared helpers for alumnet-invites integration tests.
//!
//! Builds an in-memory engine on a manual clock, a mailer that records what
//! it was asked to send, and roster fixtures.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Once};

use alumnet_invites::{
    DispatchCoordinator, HeuristicReviewer, IngestionService, InviteSettings, InviteTemplateData,
    Mailer, MailerError, ManualClock, MemoryInviteStore, MessageId,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

static INIT: Once = Once::new();

/// Initialize logging for tests (once).
pub fn init_test_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

/// Fixed start time for deterministic tests.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

#[derive(Debug, Clone)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub data: InviteTemplateData,
}

impl SentMail {
    /// Raw token carried by the accept link.
    pub fn token(&self) -> String {
        self.data
            .accept_url
            .split("token=")
            .nth(1)
            .unwrap_or_default()
            .to_string()
    }
}

/// Mailer that records every call and can be told to fail for a recipient.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingMailer {
    pub fn fail_for(&self, recipient: &str) {
        self.failing.lock().insert(recipient.to_string());
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, recipient: &str) -> Vec<SentMail> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.to == recipient)
            .cloned()
            .collect()
    }

    pub fn last_token_for(&self, recipient: &str) -> Option<String> {
        self.sent_to(recipient).last().map(SentMail::token)
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        data: &InviteTemplateData,
    ) -> Result<MessageId, MailerError> {
        if self.failing.lock().contains(to) {
            return Err(MailerError::Unavailable("smtp relay down".to_string()));
        }
        let mut sent = self.sent.lock();
        sent.push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            data: data.clone(),
        });
        Ok(MessageId(format!("msg-{}", sent.len())))
    }
}

/// Fully wired in-memory engine.
pub struct TestEngine {
    pub clock: Arc<ManualClock>,
    pub settings: InviteSettings,
    pub store: Arc<MemoryInviteStore>,
    pub mailer: Arc<RecordingMailer>,
    pub dispatch: DispatchCoordinator,
    pub ingestion: IngestionService,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_settings(InviteSettings {
            accept_base_url: "https://alumni.example.edu".to_string(),
            ..InviteSettings::default()
        })
    }

    pub fn with_settings(settings: InviteSettings) -> Self {
        init_test_logging();

        let clock = Arc::new(ManualClock::new(t0()));
        let store = Arc::new(MemoryInviteStore::with_clock(&settings, clock.clone()));
        let mailer = Arc::new(RecordingMailer::default());
        let dispatch = DispatchCoordinator::with_clock(
            store.clone(),
            mailer.clone(),
            settings.clone(),
            clock.clone(),
        );
        let reviewer =
            HeuristicReviewer::new().with_similarity_threshold(settings.similarity_threshold);
        let ingestion = IngestionService::new(
            store.clone(),
            Arc::new(reviewer),
            settings.clone(),
        );

        Self {
            clock,
            settings,
            store,
            mailer,
            dispatch,
            ingestion,
        }
    }
}

pub const ROSTER_HEADER: &str = "full_name,college_email,personal_email,grad_year,degree,major";

/// Build a CSV roster from `(name, college_email, personal_email)` triples.
pub fn roster_csv(rows: &[(&str, &str, &str)]) -> Vec<u8> {
    let mut out = String::from(ROSTER_HEADER);
    for (name, college, personal) in rows {
        out.push('\n');
        out.push_str(&format!("{name},{college},{personal},2019,B.Tech,Physics"));
    }
    out.into_bytes()
}
