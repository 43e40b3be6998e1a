//! Client-side state for one viewer: a live directory plus any number of open conversations.

use crate::domain::conversation::{AssignOutcome, Conversation, ConversationStatus};
use crate::domain::viewer::Viewer;
use crate::error::Result;
use crate::services::ServiceContainer;
use uuid::Uuid;

mod conversation;
mod directory;

pub use conversation::ConversationView;
pub use directory::DirectoryView;

#[derive(Debug)]
pub struct ViewerSession {
    viewer: Viewer,
    services: ServiceContainer,
    directory: DirectoryView,
}

impl ViewerSession {
    /// Starts a session and loads the viewer's directory.
    ///
    /// # Errors
    /// Returns `AppError::Subscription` if the directory channel cannot be established, or the
    /// store error if the first fetch fails.
    #[tracing::instrument(err(level = "warn"), skip(services, viewer), fields(viewer_id = %viewer.id))]
    pub async fn start(services: ServiceContainer, viewer: Viewer) -> Result<Self> {
        let directory = DirectoryView::open(services.clone(), viewer).await?;
        Ok(Self { viewer, services, directory })
    }

    #[must_use]
    pub const fn viewer(&self) -> Viewer {
        self.viewer
    }

    #[must_use]
    pub const fn directory(&self) -> &DirectoryView {
        &self.directory
    }

    /// # Errors
    /// See [`ConversationView`].
    pub async fn open(&self, conversation_id: Uuid) -> Result<ConversationView> {
        ConversationView::open(self.services.clone(), self.viewer, conversation_id).await
    }

    /// Creates a conversation for `client_id` and shows it in the directory right away.
    ///
    /// # Errors
    /// See `ConversationService::create`.
    pub async fn create_conversation(&self, client_id: Uuid, subject: Option<String>) -> Result<Conversation> {
        let conversation = self.services.conversation_service.create(&self.viewer, client_id, subject).await?;
        self.directory.patch(conversation.clone());
        Ok(conversation)
    }

    /// # Errors
    /// See `AssignmentService::assign`.
    pub async fn assign(&self, conversation_id: Uuid) -> Result<AssignOutcome> {
        let outcome = self.services.assignment_service.assign(conversation_id, &self.viewer).await?;
        match &outcome {
            AssignOutcome::Assigned(conversation) => self.directory.patch(conversation.clone()),
            AssignOutcome::AlreadyAssigned { .. } => {
                // Our copy may predate the winner's claim.
                if let Err(e) = self.directory.refresh().await {
                    tracing::warn!(error = %e, "Failed to refresh directory after losing assignment");
                }
            }
        }
        Ok(outcome)
    }

    /// # Errors
    /// See `ConversationService::transition_status`.
    pub async fn transition_status(&self, conversation_id: Uuid, target: ConversationStatus) -> Result<Conversation> {
        let conversation =
            self.services.conversation_service.transition_status(conversation_id, &self.viewer, target).await?;
        self.directory.patch(conversation.clone());
        Ok(conversation)
    }

    pub fn close(&self) {
        self.directory.close();
    }
}
