//! Wires the watcher to a suggester, a presenter and the suggestion record.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::{error, info, warn};

use dw_backend::{BackendError, Suggester};
use dw_protocol::{DenialEvent, Suggestion};

use crate::config::SuggestErrorPolicy;
use crate::present::Presenter;
use crate::record::SuggestionRecord;
use crate::watcher::{Tail, WatchError, Watcher};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("suggestion failed: {0}")]
    Suggest(#[from] BackendError),
    #[error("output failed: {0}")]
    Output(#[from] io::Error),
}

/// Handles one denial at a time: present it, ask for a rule, show the answer.
pub struct Monitor {
    suggester: Arc<dyn Suggester>,
    presenter: Mutex<Box<dyn Presenter>>,
    record: Mutex<SuggestionRecord>,
    policy: SuggestErrorPolicy,
}

impl Monitor {
    pub fn new(suggester: Arc<dyn Suggester>, presenter: Box<dyn Presenter>) -> Self {
        Self {
            suggester,
            presenter: Mutex::new(presenter),
            record: Mutex::new(SuggestionRecord::noop()),
            policy: SuggestErrorPolicy::default(),
        }
    }

    pub fn with_record(mut self, record: SuggestionRecord) -> Self {
        self.record = Mutex::new(record);
        self
    }

    pub fn with_error_policy(mut self, policy: SuggestErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Watch until the stream fails, or a handler error under `abort`.
    pub async fn run(&self, watcher: &Watcher) -> Result<(), WatchError> {
        let tail = watcher.open().await?;
        self.run_on(watcher, tail).await
    }

    pub async fn run_on(&self, watcher: &Watcher, tail: Tail) -> Result<(), WatchError> {
        watcher.run_on(tail, move |event| self.handle(event)).await
    }

    /// Process one denial. Only returns an error under the `abort` policy
    /// or when output itself fails.
    pub async fn handle(&self, event: DenialEvent) -> Result<(), MonitorError> {
        info!(
            sequence = event.sequence,
            comm = event.details.comm.as_deref().unwrap_or("-"),
            source = event.details.source_type().unwrap_or("-"),
            target = event.details.target_type().unwrap_or("-"),
            tclass = event.details.tclass.as_deref().unwrap_or("-"),
            "denial detected"
        );
        self.presenter().denial(&event)?;

        let backend = self.suggester.name();
        match self.suggester.suggest(event.text()).await {
            Ok(rule) => {
                let suggestion = Suggestion::new(rule, backend);
                info!(
                    sequence = event.sequence,
                    backend,
                    rule = %suggestion.rule,
                    "rule suggested"
                );
                self.presenter().suggestion(&event, &suggestion)?;
                self.record().log_suggestion(&event, &suggestion);
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                self.presenter().failure(&event, &message)?;
                self.record().log_failure(&event, &message);
                match self.policy {
                    SuggestErrorPolicy::Skip => {
                        warn!(
                            sequence = event.sequence,
                            backend,
                            error = %message,
                            "suggestion failed, continuing"
                        );
                        Ok(())
                    }
                    SuggestErrorPolicy::Abort => {
                        error!(
                            sequence = event.sequence,
                            backend,
                            error = %message,
                            "suggestion failed"
                        );
                        Err(e.into())
                    }
                }
            }
        }
    }

    fn presenter(&self) -> std::sync::MutexGuard<'_, Box<dyn Presenter>> {
        self.presenter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self) -> std::sync::MutexGuard<'_, SuggestionRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
