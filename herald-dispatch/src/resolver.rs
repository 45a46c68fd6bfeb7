//! Channel instance resolution for a dispatch
//!
//! A ticket normally sends through the instance it is bound to. A caller may
//! ask for a different one; that override is only honoured when the instance
//! exists, belongs to the ticket's tenant and is connected.

use std::sync::Arc;

use herald_common::{InstanceId, Ticket, internal};
use herald_ledger::Directory;

use crate::error::DispatchError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Instance the message will be sent through, if any
    pub effective_instance_id: Option<InstanceId>,
    /// Set when the caller's explicit request replaced the ticket's instance
    pub override_instance: Option<InstanceId>,
}

#[derive(Debug, Clone)]
pub struct InstanceResolver {
    directory: Arc<dyn Directory>,
}

impl InstanceResolver {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// # Errors
    ///
    /// [`DispatchError::NotFound`] when the requested instance does not exist,
    /// [`DispatchError::Unavailable`] when it belongs to another tenant or is
    /// not connected, and [`DispatchError::Storage`] on lookup failure.
    pub async fn resolve(
        &self,
        ticket: &Ticket,
        requested: Option<&InstanceId>,
        actor: Option<&str>,
    ) -> Result<Resolution, DispatchError> {
        let inferred = ticket.instance_id.clone();

        let Some(requested) = requested else {
            return Ok(Resolution {
                effective_instance_id: inferred,
                override_instance: None,
            });
        };

        if inferred.as_ref() == Some(requested) {
            return Ok(Resolution {
                effective_instance_id: inferred,
                override_instance: None,
            });
        }

        let instance = self
            .directory
            .find_instance(requested)
            .await?
            .ok_or_else(|| DispatchError::not_found("channel instance", requested))?;

        if instance.tenant_id != ticket.tenant_id || !instance.is_ready() {
            internal!(
                level = WARN,
                tenant = %ticket.tenant_id,
                ticket = %ticket.id,
                instance = %requested,
                state = ?instance.state,
                "Rejected instance override"
            );
            return Err(DispatchError::Unavailable("channel unavailable".to_string()));
        }

        internal!(
            level = INFO,
            tenant = %ticket.tenant_id,
            ticket = %ticket.id,
            requested = %requested,
            default_instance = inferred.as_ref().map_or("", InstanceId::as_str),
            actor = actor.unwrap_or("system"),
            "Dispatching through overridden instance"
        );

        Ok(Resolution {
            effective_instance_id: Some(requested.clone()),
            override_instance: Some(requested.clone()),
        })
    }
}
