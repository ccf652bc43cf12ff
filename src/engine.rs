//! Wiring: one store, one lock table and one template engine shared by the
//! manager, dispatcher and reply listener.

use std::sync::Arc;

use crate::campaigns::CampaignManager;
use crate::config::EngineConfig;
use crate::contacts::IntakeValidator;
use crate::dispatch::{DeliveryGateway, Dispatcher, EngineLocks};
use crate::replies::ReplyListener;
use crate::store::CampaignStore;
use crate::template::TemplateEngine;

pub struct Engine {
    pub config: EngineConfig,
    pub store: Arc<dyn CampaignStore>,
    pub intake: IntakeValidator,
    pub campaigns: CampaignManager,
    pub dispatcher: Arc<Dispatcher>,
    pub replies: ReplyListener,
}

impl Engine {
    pub fn new(config: EngineConfig, store: Arc<dyn CampaignStore>, gateway: Arc<dyn DeliveryGateway>) -> Self {
        let locks = Arc::new(EngineLocks::default());
        let templates = Arc::new(TemplateEngine::new(config.templates.clone()));

        let intake = IntakeValidator::new(config.intake.clone(), config.enrollment);
        let campaigns = CampaignManager::new(
            Arc::clone(&store),
            Arc::clone(&templates),
            config.enrollment,
            config.dispatch.cost_per_message,
        );
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            gateway,
            templates,
            Arc::clone(&locks),
            config.dispatch.clone(),
        ));
        let replies = ReplyListener::new(Arc::clone(&store), locks);

        Self {
            config,
            store,
            intake,
            campaigns,
            dispatcher,
            replies,
        }
    }
}
