//! Wiring of the server's components around one shared store.

use std::sync::Arc;

use velum_core::config::ServerConfig;
use velum_store::{Blockstore, MemoryBlockstore, Store};

use crate::components::account::AccountComponent;
use crate::components::block::BlockComponent;
use crate::components::enrollment::EnrollmentComponent;
use crate::components::export::ExportComponent;
use crate::components::invite::InviteComponent;
use crate::components::organization::OrganizationComponent;
use crate::components::realm::RealmComponent;
use crate::components::shamir::ShamirComponent;
use crate::components::totp::TotpComponent;
use crate::components::user::UserComponent;
use crate::components::vlob::VlobComponent;
use crate::email::{EmailRateLimiter, EmailSender, MemoryEmailSender};
use crate::events::EventBus;

/// Every component of a running server, sharing one store, one event
/// bus, and one configuration.
pub struct Backend {
    pub config: Arc<ServerConfig>,
    pub store: Arc<Store>,
    pub event_bus: EventBus,
    pub organization: OrganizationComponent,
    pub user: Arc<UserComponent>,
    pub realm: RealmComponent,
    pub shamir: ShamirComponent,
    pub vlob: VlobComponent,
    pub block: BlockComponent,
    pub invite: InviteComponent,
    pub enrollment: EnrollmentComponent,
    pub totp: TotpComponent,
    pub account: AccountComponent,
    pub export: ExportComponent,
}

impl Backend {
    /// Assemble a backend over explicit collaborators.
    pub fn new(
        config: Arc<ServerConfig>,
        blockstore: Arc<dyn Blockstore>,
        email_sender: Arc<dyn EmailSender>,
    ) -> Self {
        let store = Arc::new(Store::new());
        let event_bus = EventBus::new();
        let rate_limiter = Arc::new(EmailRateLimiter::new(config.email_rate_limit_max_per_hour));

        let user = Arc::new(UserComponent::new(store.clone(), event_bus.clone()));
        Self {
            organization: OrganizationComponent::new(
                store.clone(),
                config.clone(),
                event_bus.clone(),
            ),
            realm: RealmComponent::new(event_bus.clone()),
            shamir: ShamirComponent::new(event_bus.clone()),
            vlob: VlobComponent::new(config.clone(), event_bus.clone()),
            block: BlockComponent::new(config.clone(), blockstore),
            invite: InviteComponent::new(event_bus.clone(), email_sender, rate_limiter),
            enrollment: EnrollmentComponent::new(event_bus.clone(), user.clone()),
            totp: TotpComponent::new(config.clone()),
            account: AccountComponent::new(),
            export: ExportComponent::new(store.clone()),
            user,
            config,
            store,
            event_bus,
        }
    }

    /// A backend over in-memory collaborators, as used by tests and
    /// single-process deployments.
    pub fn in_memory(config: ServerConfig) -> Self {
        Self::new(
            Arc::new(config),
            Arc::new(MemoryBlockstore::new()),
            Arc::new(MemoryEmailSender::new()),
        )
    }
}
