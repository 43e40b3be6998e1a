use crate::adapters::store::ChatStore;
use crate::domain::conversation::AssignOutcome;
use crate::domain::event::{ChangeKind, ConversationChange};
use crate::domain::viewer::Viewer;
use crate::error::Result;
use crate::services::subscription::SubscriptionManager;
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    attempts_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            attempts_total: meter
                .u64_counter("parley_assignment_attempts_total")
                .with_description("Assignment attempts by outcome")
                .build(),
        }
    }
}

/// Arbitrates which admin owns a conversation.
#[derive(Clone, Debug)]
pub struct AssignmentService {
    store: Arc<dyn ChatStore>,
    notifier: Arc<SubscriptionManager>,
    metrics: Metrics,
}

impl AssignmentService {
    #[must_use]
    pub fn new(store: Arc<dyn ChatStore>, notifier: Arc<SubscriptionManager>) -> Self {
        Self { store, notifier, metrics: Metrics::new() }
    }

    /// Claims an unassigned conversation for `admin`.
    ///
    /// The claim is a single conditional update in the store, so among concurrent callers exactly
    /// one gets `Assigned`; everyone else, including a repeat call by the winner, gets
    /// `AlreadyAssigned` naming the owner.
    ///
    /// # Errors
    /// Returns `AppError::Forbidden` if `admin` is not an admin.
    /// Returns `AppError::NotFound` if the conversation does not exist.
    #[tracing::instrument(err(level = "warn"), skip(self, admin), fields(admin_id = %admin.id))]
    pub async fn assign(&self, conversation_id: Uuid, admin: &Viewer) -> Result<AssignOutcome> {
        admin.ensure_admin()?;

        let outcome = self.store.assign_if_unassigned(conversation_id, admin.id).await?;
        match &outcome {
            AssignOutcome::Assigned(_) => {
                tracing::info!("Conversation assigned");
                self.metrics.attempts_total.add(1, &[KeyValue::new("outcome", "assigned")]);
                self.notifier.notify_change(ConversationChange::new(conversation_id, ChangeKind::Assigned)).await;
            }
            AssignOutcome::AlreadyAssigned { admin_id } => {
                tracing::debug!(owner_id = %admin_id, "Conversation already assigned");
                self.metrics.attempts_total.add(1, &[KeyValue::new("outcome", "already_assigned")]);
            }
        }
        Ok(outcome)
    }
}
