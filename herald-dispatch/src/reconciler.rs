//! Applying dispatch outcomes and acknowledgements to message records
//!
//! Status only ever moves forward (see [`MessageStatus::can_advance_to`]), so
//! a late or duplicated acknowledgement cannot pull a message back. The broker
//! diagnostic snapshot, by contrast, is always replaced by the latest event.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use herald_common::{
    BrokerDiagnostic, BrokerErrorDiagnostic, Clock, InstanceId, Message, MessageStatus, TenantId,
    internal,
};
use herald_ledger::{Constraint, Ledger, LedgerError, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::DispatchError, normalizer::NormalizedError, transport::TransportReceipt};

/// Status before and after a reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub previous: MessageStatus,
    pub current: MessageStatus,
}

impl Transition {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

/// How a broker receipt landed on its message
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Accepted(Transition),
    /// The receipt could not be kept and the attempt was recorded as failed
    Rejected {
        transition: Transition,
        error: NormalizedError,
    },
}

/// A broker acknowledgement for a message it already accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub tenant_id: TenantId,
    pub external_id: String,
    /// Status as the broker reported it
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub raw: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    ledger: Ledger,
    clock: Arc<dyn Clock>,
}

impl Reconciler {
    pub fn new(ledger: Ledger, clock: Arc<dyn Clock>) -> Self {
        Self { ledger, clock }
    }

    /// Record a broker's acceptance of `message`
    ///
    /// A receipt whose external id already belongs to another message of the
    /// tenant is not kept: the attempt is recorded as failed with the receipt
    /// in its snapshot, and [`Applied::Rejected`] is returned.
    ///
    /// # Errors
    ///
    /// Persistence failures.
    pub async fn record_success(
        &self,
        message: &mut Message,
        provider: &str,
        instance_id: &InstanceId,
        receipt: &TransportReceipt,
    ) -> Result<Applied, DispatchError> {
        let snapshot = BrokerDiagnostic {
            provider: provider.to_string(),
            instance_id: Some(instance_id.clone()),
            external_id: Some(receipt.external_id.clone()),
            status: Some(receipt.status.clone()),
            dispatched_at: Some(receipt.timestamp.unwrap_or_else(|| self.clock.now())),
            acknowledged_at: None,
            raw: receipt.raw.clone(),
            error: None,
        };
        let next = MessageStatus::from_provider(&receipt.status);

        let mut previous = message.status;
        let result = self
            .ledger
            .modify(&message.tenant_id, &message.id, &mut |row| {
                previous = row.status;
                row.external_id = Some(receipt.external_id.clone());
                row.metadata.broker = Some(snapshot.clone());
                row.advance(next);
            })
            .await;

        match result {
            Ok(updated) => {
                *message = updated;
                Ok(Applied::Accepted(Transition {
                    previous,
                    current: message.status,
                }))
            }
            Err(LedgerError::Store(StoreError::UniqueViolation {
                constraint: Constraint::ExternalId,
            })) => {
                internal!(
                    level = ERROR,
                    message_id = %message.id,
                    external_id = %receipt.external_id,
                    "Broker receipt names an external id held by another message"
                );

                let error = NormalizedError::external_id_taken(&receipt.external_id);
                let snapshot = BrokerDiagnostic {
                    error: Some(self.error_snapshot(&error)),
                    ..snapshot
                };
                let transition = self.write_failure(message, snapshot).await?;
                Ok(Applied::Rejected { transition, error })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Record a failed attempt on `message`
    ///
    /// # Errors
    ///
    /// Persistence failures.
    pub async fn record_failure(
        &self,
        message: &mut Message,
        provider: &str,
        instance_id: Option<&InstanceId>,
        error: &NormalizedError,
    ) -> Result<Transition, DispatchError> {
        let error = self.error_snapshot(error);
        let snapshot = BrokerDiagnostic {
            provider: provider.to_string(),
            instance_id: instance_id.cloned(),
            external_id: message.external_id.clone(),
            status: None,
            dispatched_at: Some(error.failed_at),
            acknowledged_at: None,
            raw: None,
            error: Some(error),
        };

        self.write_failure(message, snapshot).await
    }

    async fn write_failure(
        &self,
        message: &mut Message,
        snapshot: BrokerDiagnostic,
    ) -> Result<Transition, DispatchError> {
        let mut previous = message.status;
        *message = self
            .ledger
            .modify(&message.tenant_id, &message.id, &mut |row| {
                previous = row.status;
                row.metadata.broker = Some(snapshot.clone());
                row.advance(MessageStatus::Failed);
            })
            .await?;

        Ok(Transition {
            previous,
            current: message.status,
        })
    }

    fn error_snapshot(&self, error: &NormalizedError) -> BrokerErrorDiagnostic {
        BrokerErrorDiagnostic {
            message: error.message.clone(),
            code: error.code,
            status: error.status,
            request_id: error.request_id.clone(),
            provider_code: error.provider_code.clone(),
            failed_at: self.clock.now(),
        }
    }

    /// Apply a broker acknowledgement to the message it refers to
    ///
    /// # Errors
    ///
    /// [`DispatchError::NotFound`] when no message of the tenant carries the
    /// external id, or persistence failures.
    pub async fn acknowledge(
        &self,
        provider: &str,
        ack: &Acknowledgement,
    ) -> Result<(Message, Transition), DispatchError> {
        let found = self
            .ledger
            .find_by_external_id(&ack.tenant_id, &ack.external_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("message", &ack.external_id))?;

        let acknowledged_at = ack.timestamp.unwrap_or_else(|| self.clock.now());
        let next = MessageStatus::from_provider(&ack.status);

        let mut previous = found.status;
        let message = self
            .ledger
            .modify(&ack.tenant_id, &found.id, &mut |row| {
                previous = row.status;
                row.metadata.broker = Some(BrokerDiagnostic {
                    provider: provider.to_string(),
                    instance_id: row.instance_id.clone(),
                    external_id: Some(ack.external_id.clone()),
                    status: Some(ack.status.clone()),
                    dispatched_at: None,
                    acknowledged_at: Some(acknowledged_at),
                    raw: ack.raw.clone(),
                    error: None,
                });
                row.advance(next);
            })
            .await?;

        let current = message.status;
        Ok((message, Transition { previous, current }))
    }
}
