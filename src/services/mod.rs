use std::sync::Arc;

pub mod assignment_service;
pub mod conversation_service;
pub mod health_service;
pub mod message_service;
pub mod read_state_service;
pub mod subscription;

use assignment_service::AssignmentService;
use conversation_service::ConversationService;
use health_service::HealthService;
use message_service::MessageService;
use read_state_service::ReadStateService;
use subscription::SubscriptionManager;

#[derive(Clone, Debug)]
pub struct ServiceContainer {
    pub conversation_service: ConversationService,
    pub message_service: MessageService,
    pub read_state_service: ReadStateService,
    pub assignment_service: AssignmentService,
    pub subscription_manager: Arc<SubscriptionManager>,
    pub health_service: HealthService,
}
