use std::sync::Arc;

use crate::config::Config;
use crate::observability::Metrics;
use crate::scheduler::Scheduler;
use crate::vpn::VpnController;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub scheduler: Scheduler,
    pub vpn: VpnController,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        scheduler: Scheduler,
        vpn: VpnController,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            scheduler,
            vpn,
            metrics,
        }
    }
}
