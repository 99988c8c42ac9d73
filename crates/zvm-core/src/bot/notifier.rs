use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::{
    domain::ChatId,
    formatting::expiry_notice,
    messaging::port::MessagingPort,
    sweeper::{SweepListener, SweepOutcome},
};

/// Tells every admin chat which accounts just expired.
pub struct AdminNotifier {
    messenger: Arc<dyn MessagingPort>,
    admins: Vec<i64>,
}

impl AdminNotifier {
    pub fn new(messenger: Arc<dyn MessagingPort>, admins: Vec<i64>) -> Self {
        Self { messenger, admins }
    }
}

#[async_trait]
impl SweepListener for AdminNotifier {
    async fn on_sweep(&self, outcome: &SweepOutcome) {
        let Some(html) = expiry_notice(&outcome.report) else {
            return;
        };
        for &admin in &self.admins {
            if let Err(e) = self.messenger.send_html(ChatId(admin), &html).await {
                warn!(admin, error = %e, "expiry notice failed");
            }
        }
    }
}
