//! Event subscribers installed by the server.
//!
//! The server itself only logs engine events. Notification delivery (email, chat) belongs to the host platform,
//! which can subscribe its own handlers alongside these.
use bank_sync_engine::events::{EventHandlers, EventHooks, EventProducers, HookFuture};
use log::*;

const EVENT_BUFFER_SIZE: usize = 25;

pub fn logging_hooks() -> EventHooks {
    let mut hooks = EventHooks::default();
    hooks
        .on_payment_confirmed(|ev| -> HookFuture {
            let manual = if ev.manual { " (manual)" } else { "" };
            info!(
                "🪝️ Payment of {} {} for order {} confirmed from transaction {}{manual}",
                ev.payment.amount.to_decimal_string(&ev.order.currency),
                ev.order.currency,
                ev.order.code,
                ev.transaction.external_id
            );
            Box::pin(async {})
        })
        .on_reauthorization_required(|ev| -> HookFuture {
            warn!(
                "🪝️ {} must reauthorize connection {} at {}: {}",
                ev.connection.organizer, ev.connection.id, ev.connection.institution_id, ev.reason
            );
            Box::pin(async {})
        })
        .on_consent_expiring(|ev| -> HookFuture {
            warn!("🪝️ Bank consent for connection {} runs out at {}", ev.connection.id, ev.expires_at);
            Box::pin(async {})
        })
        .on_sync_failure_escalated(|ev| -> HookFuture {
            error!(
                "🪝️ Connection {} of {} has failed to sync {} times in a row. Last error: {}",
                ev.connection_id, ev.organizer, ev.consecutive_failures, ev.last_error
            );
            Box::pin(async {})
        });
    hooks
}

/// Starts the event handlers and returns the producers the engine publishes to.
pub async fn start_event_handlers(hooks: EventHooks) -> EventProducers {
    let handlers = EventHandlers::new(EVENT_BUFFER_SIZE, hooks);
    let producers = handlers.producers();
    handlers.start_handlers().await;
    producers
}
