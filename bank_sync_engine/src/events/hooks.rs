use std::{future::Future, pin::Pin, sync::Arc};

use log::*;

use crate::events::{
    ConsentExpiringEvent,
    EventHandler,
    EventProducer,
    Handler,
    PaymentConfirmedEvent,
    ReauthorizationRequiredEvent,
    SyncFailureEscalatedEvent,
};

pub type HookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Default, Clone)]
pub struct EventProducers {
    pub payment_confirmed_producer: Vec<EventProducer<PaymentConfirmedEvent>>,
    pub reauthorization_required_producer: Vec<EventProducer<ReauthorizationRequiredEvent>>,
    pub consent_expiring_producer: Vec<EventProducer<ConsentExpiringEvent>>,
    pub sync_failure_escalated_producer: Vec<EventProducer<SyncFailureEscalatedEvent>>,
}

impl EventProducers {
    pub async fn payment_confirmed(&self, event: PaymentConfirmedEvent) {
        for emitter in &self.payment_confirmed_producer {
            debug!("📬️ Notifying payment confirmed hook subscribers");
            emitter.publish_event(event.clone()).await;
        }
    }

    pub async fn reauthorization_required(&self, event: ReauthorizationRequiredEvent) {
        for emitter in &self.reauthorization_required_producer {
            debug!("📬️ Notifying reauthorization required hook subscribers");
            emitter.publish_event(event.clone()).await;
        }
    }

    pub async fn consent_expiring(&self, event: ConsentExpiringEvent) {
        for emitter in &self.consent_expiring_producer {
            debug!("📬️ Notifying consent expiring hook subscribers");
            emitter.publish_event(event.clone()).await;
        }
    }

    pub async fn sync_failure_escalated(&self, event: SyncFailureEscalatedEvent) {
        for emitter in &self.sync_failure_escalated_producer {
            debug!("📬️ Notifying sync failure hook subscribers");
            emitter.publish_event(event.clone()).await;
        }
    }
}

pub struct EventHandlers {
    pub on_payment_confirmed: Option<EventHandler<PaymentConfirmedEvent>>,
    pub on_reauthorization_required: Option<EventHandler<ReauthorizationRequiredEvent>>,
    pub on_consent_expiring: Option<EventHandler<ConsentExpiringEvent>>,
    pub on_sync_failure_escalated: Option<EventHandler<SyncFailureEscalatedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        Self {
            on_payment_confirmed: hooks.on_payment_confirmed.map(|f| EventHandler::new(buffer_size, f)),
            on_reauthorization_required: hooks.on_reauthorization_required.map(|f| EventHandler::new(buffer_size, f)),
            on_consent_expiring: hooks.on_consent_expiring.map(|f| EventHandler::new(buffer_size, f)),
            on_sync_failure_escalated: hooks.on_sync_failure_escalated.map(|f| EventHandler::new(buffer_size, f)),
        }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_payment_confirmed {
            result.payment_confirmed_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_reauthorization_required {
            result.reauthorization_required_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_consent_expiring {
            result.consent_expiring_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_sync_failure_escalated {
            result.sync_failure_escalated_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_payment_confirmed {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_reauthorization_required {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_consent_expiring {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_sync_failure_escalated {
            tokio::spawn(handler.start_handler());
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_payment_confirmed: Option<Handler<PaymentConfirmedEvent>>,
    pub on_reauthorization_required: Option<Handler<ReauthorizationRequiredEvent>>,
    pub on_consent_expiring: Option<Handler<ConsentExpiringEvent>>,
    pub on_sync_failure_escalated: Option<Handler<SyncFailureEscalatedEvent>>,
}

impl EventHooks {
    pub fn on_payment_confirmed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PaymentConfirmedEvent) -> HookFuture) + Send + Sync + 'static {
        self.on_payment_confirmed = Some(Arc::new(f));
        self
    }

    pub fn on_reauthorization_required<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(ReauthorizationRequiredEvent) -> HookFuture) + Send + Sync + 'static {
        self.on_reauthorization_required = Some(Arc::new(f));
        self
    }

    pub fn on_consent_expiring<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(ConsentExpiringEvent) -> HookFuture) + Send + Sync + 'static {
        self.on_consent_expiring = Some(Arc::new(f));
        self
    }

    pub fn on_sync_failure_escalated<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(SyncFailureEscalatedEvent) -> HookFuture) + Send + Sync + 'static {
        self.on_sync_failure_escalated = Some(Arc::new(f));
        self
    }
}
