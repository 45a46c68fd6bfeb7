//! One end-to-end dispatch attempt
//!
//! ## Stages
//!
//! 1. Load the ticket and resolve the channel instance
//! 2. Persist the message through the ledger (idempotent)
//! 3. Decide whether the message needs a live send at all
//! 4. Local guards: destination address and bound instance
//! 5. Breaker then limiter gate
//! 6. Transport call, reconciled into the record and fed back to the breaker
//!
//! Failures from stage 4 on are written onto the message, which is returned
//! inside [`DispatchError::Attempt`]. Stages 4 to 6 run on a spawned task:
//! dropping the `dispatch` future abandons the result, never the call.

use std::time::Instant;

use herald_common::{
    Direction, InstanceId, Message, MessageContent, MessageStatus, NewMessage, TenantId, Ticket,
    TicketId, internal, outgoing,
};
use herald_tracing::traced;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Dispatcher;
use crate::{
    error::DispatchError,
    normalizer::{self, NormalizedError},
    notify::Notification,
    reconciler::Applied,
    transport::{OutboundPayload, SendOptions},
};

/// Metadata key recording an accepted instance override
const OVERRIDE_KEY: &str = "instance_override";
/// Metadata key recording who asked for the override
const OVERRIDE_ACTOR_KEY: &str = "instance_override_actor";
/// Instance label for metrics when no instance is bound
const UNBOUND_INSTANCE: &str = "none";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    pub tenant_id: TenantId,
    pub ticket_id: TicketId,
    #[serde(default)]
    pub content: MessageContent,
    /// Explicit instance to send through instead of the ticket's own
    #[serde(default)]
    pub instance_id: Option<InstanceId>,
    #[serde(default)]
    pub direction: Direction,
    /// Status for messages that are recorded without a live send
    #[serde(default)]
    pub status: Option<MessageStatus>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    /// Passthrough metadata; wins over the ticket's context on key clashes
    #[serde(default)]
    pub extra: Map<String, Value>,
    /// Who is sending, recorded when an instance override is accepted
    #[serde(default)]
    pub actor: Option<String>,
}

impl SendRequest {
    #[must_use]
    pub fn new(tenant_id: TenantId, ticket_id: TicketId, content: MessageContent) -> Self {
        Self {
            tenant_id,
            ticket_id,
            content,
            instance_id: None,
            direction: Direction::Outbound,
            status: None,
            idempotency_key: None,
            external_id: None,
            extra: Map::new(),
            actor: None,
        }
    }
}

/// How a live attempt ended, once its outcome is persisted
enum Outcome {
    Accepted,
    Failed(NormalizedError),
}

impl Dispatcher {
    /// Record a message and, when its channel calls for it, send it
    ///
    /// # Errors
    ///
    /// - [`DispatchError::NotFound`] for an unknown ticket or override instance
    /// - [`DispatchError::Unavailable`] for an override that may not be used
    /// - [`DispatchError::Attempt`] when the send failed; the carried message
    ///   is persisted as failed
    /// - [`DispatchError::Conflict`] or [`DispatchError::Storage`] on persistence faults
    #[traced(instrument(level = tracing::Level::INFO, skip(self, request), fields(tenant = %request.tenant_id, ticket = %request.ticket_id)), timing(precision = "ms"))]
    pub async fn dispatch(&self, request: SendRequest) -> Result<Message, DispatchError> {
        let ticket = self
            .directory
            .find_ticket(&request.tenant_id, &request.ticket_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("ticket", &request.ticket_id))?;

        let resolution = self
            .resolver
            .resolve(&ticket, request.instance_id.as_ref(), request.actor.as_deref())
            .await?;

        let live = request.direction == Direction::Outbound && ticket.channel.requires_live_dispatch();

        let mut extra = ticket.metadata.clone();
        extra.extend(request.extra);
        if let Some(instance_id) = &resolution.override_instance {
            extra.insert(OVERRIDE_KEY.to_string(), Value::from(instance_id.as_str()));
            if let Some(actor) = &request.actor {
                extra.insert(OVERRIDE_ACTOR_KEY.to_string(), Value::from(actor.as_str()));
            }
        }

        let status = if live {
            MessageStatus::Pending
        } else {
            request.status.unwrap_or(MessageStatus::Sent)
        };

        let recorded = self
            .ledger
            .create(
                &request.tenant_id,
                &request.ticket_id,
                NewMessage {
                    direction: request.direction,
                    status,
                    content: request.content,
                    external_id: request.external_id,
                    instance_id: resolution.effective_instance_id,
                    idempotency_key: request.idempotency_key,
                    extra,
                },
            )
            .await?;

        if !recorded.duplicate {
            self.notifier.notify(Notification::MessageCreated {
                message: recorded.message.clone(),
            });
        }

        let mut message = recorded.message;

        if !live || message.status != MessageStatus::Pending {
            internal!(
                level = DEBUG,
                message_id = %message.id,
                status = %message.status,
                duplicate = recorded.duplicate,
                "No live dispatch required"
            );
            return Ok(message);
        }

        // Detached: dropping this future must not cancel the transport call
        let this = self.clone();
        let attempt = tokio::spawn(async move {
            let previous = message.status;
            let outcome = this.attempt(&ticket, &mut message).await?;

            if message.status != previous {
                this.notifier.notify(Notification::MessageUpdated {
                    message: message.clone(),
                    previous,
                });
            }

            match outcome {
                Outcome::Accepted => Ok(message),
                Outcome::Failed(error) => Err(DispatchError::attempt(message, error)),
            }
        });

        attempt
            .await
            .map_err(|err| DispatchError::Unavailable(format!("dispatch task failed: {err}")))?
    }

    /// Run the guards, gates and transport call for a pending message
    async fn attempt(&self, ticket: &Ticket, message: &mut Message) -> Result<Outcome, DispatchError> {
        let address = ticket.address().map(str::to_string);
        if address.is_none() && ticket.channel.requires_address() {
            let error = NormalizedError::invalid_recipient();
            return self.fail(message, None, error).await;
        }

        let Some(instance_id) = message.instance_id.clone() else {
            let error = NormalizedError::no_instance();
            normalizer::observe(&error, message.tenant_id.as_str(), UNBOUND_INSTANCE);
            return self.fail(message, None, error).await;
        };

        let tenant_id = message.tenant_id.clone();
        let pipeline = self.pipeline();

        let admission = match pipeline.check_circuit(&tenant_id, &instance_id) {
            Ok(admission) => admission,
            Err(error) => return self.fail(message, Some(&instance_id), error).await,
        };

        if let Err(error) = pipeline.check_rate_limit(&tenant_id, &instance_id, admission) {
            return self.fail(message, Some(&instance_id), error).await;
        }

        let payload = OutboundPayload::for_message(message, address.as_deref().unwrap_or_default());
        let options = SendOptions {
            idempotency_key: Some(message.id.to_string()),
        };

        outgoing!(
            level = DEBUG,
            message_id = %message.id,
            tenant = %tenant_id,
            instance = %instance_id,
            ?admission,
            "Sending message to broker"
        );

        let started = Instant::now();
        let result = self
            .transport
            .send_message(&instance_id, &payload, &options)
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(receipt) => {
                outgoing!(
                    level = INFO,
                    message_id = %message.id,
                    external_id = %receipt.external_id,
                    status = %receipt.status,
                    "Broker accepted message"
                );

                if let Some(metrics) = herald_metrics::try_metrics() {
                    metrics.dispatch.record_attempt(
                        tenant_id.as_str(),
                        instance_id.as_str(),
                        "sent",
                        elapsed,
                    );
                }

                pipeline.record_success(&tenant_id, &instance_id);

                let applied = self
                    .reconciler
                    .record_success(message, self.transport.provider(), &instance_id, &receipt)
                    .await?;

                Ok(match applied {
                    Applied::Accepted(_) => Outcome::Accepted,
                    Applied::Rejected { error, .. } => Outcome::Failed(error),
                })
            }
            Err(err) => {
                let error = normalizer::normalize(&err);

                outgoing!(
                    level = WARN,
                    message_id = %message.id,
                    instance = %instance_id,
                    code = %error.code,
                    error = %err,
                    "Broker rejected message"
                );

                normalizer::observe(&error, tenant_id.as_str(), instance_id.as_str());
                if let Some(metrics) = herald_metrics::try_metrics() {
                    metrics.dispatch.record_attempt(
                        tenant_id.as_str(),
                        instance_id.as_str(),
                        "failed",
                        elapsed,
                    );
                }

                pipeline.record_failure(&tenant_id, &instance_id);

                self.fail(message, Some(&instance_id), error).await
            }
        }
    }

    async fn fail(
        &self,
        message: &mut Message,
        instance_id: Option<&InstanceId>,
        error: NormalizedError,
    ) -> Result<Outcome, DispatchError> {
        internal!(
            level = INFO,
            message_id = %message.id,
            code = %error.code,
            reason = %error.message,
            "Dispatch attempt failed"
        );

        self.reconciler
            .record_failure(message, self.transport.provider(), instance_id, &error)
            .await?;

        Ok(Outcome::Failed(error))
    }
}
