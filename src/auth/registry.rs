//! Registry of principals and the session-token reverse index.

use crate::auth::context::{
    AuthenticationContext, ClientCertificate, HttpTransport, PrincipalKind,
};
use crate::auth::token::AuthenticationToken;
use crate::auth::traits::TransportProvider;
use crate::config::{ServiceDirectory, TransportConfig};
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Forward map from principal id to context, plus a reverse index from
/// session token to principal id.
///
/// Each context carries its own locks, so principals never contend with each
/// other. The reverse index may briefly hold stale entries; lookups verify
/// ownership against the context and evict what no longer matches.
#[derive(Debug)]
pub struct PrincipalRegistry {
    contexts: DashMap<String, Arc<AuthenticationContext>>,
    session_index: DashMap<String, String>,
    services: Arc<ServiceDirectory>,
    transport_config: TransportConfig,
}

impl PrincipalRegistry {
    /// Create an empty registry.
    pub fn new(services: Arc<ServiceDirectory>, transport_config: TransportConfig) -> Self {
        Self {
            contexts: DashMap::new(),
            session_index: DashMap::new(),
            services,
            transport_config,
        }
    }

    /// Service directory shared by every context.
    pub fn services(&self) -> &Arc<ServiceDirectory> {
        &self.services
    }

    /// Register `principal_id`, replacing any existing context.
    ///
    /// Replacement discards token history.
    pub fn register(
        &self,
        principal_id: &str,
        kind: PrincipalKind,
        certificate: Option<&ClientCertificate>,
    ) -> Result<Arc<AuthenticationContext>> {
        let context = Arc::new(AuthenticationContext::new(
            principal_id,
            kind,
            certificate,
            self.transport_config,
            Arc::clone(&self.services),
        )?);

        if let Some(old) = self
            .contexts
            .insert(principal_id.to_string(), Arc::clone(&context))
        {
            self.unindex(&old);
            debug!(principal = %principal_id, "Replaced existing registration");
        }
        info!(principal = %principal_id, kind = %kind, "Registered principal");
        Ok(context)
    }

    /// Remove a principal and its reverse-index entries.
    pub fn deregister(&self, principal_id: &str) -> Option<Arc<AuthenticationContext>> {
        let (_, context) = self.contexts.remove(principal_id)?;
        self.unindex(&context);
        info!(principal = %principal_id, "Deregistered principal");
        Some(context)
    }

    /// Context of `principal_id`, if registered.
    pub fn get(&self, principal_id: &str) -> Option<Arc<AuthenticationContext>> {
        self.contexts.get(principal_id).map(|c| Arc::clone(c.value()))
    }

    /// Context of `principal_id`, failing when unregistered.
    pub fn context(&self, principal_id: &str) -> Result<Arc<AuthenticationContext>> {
        self.get(principal_id).ok_or_else(|| {
            Error::unregistered(
                format!("Principal '{}' is not registered", principal_id),
                "Register the principal with the authentication proxy before using it",
            )
        })
    }

    /// Assign a confirmed token to `context` and keep the reverse index in step.
    pub fn assign_token(&self, context: &AuthenticationContext, token: AuthenticationToken) {
        let principal_id = context.principal_id();
        if !token.session_token().is_empty() {
            self.session_index
                .insert(token.session_token().to_string(), principal_id.to_string());
        }

        if let Some(dropped) = context.set_token(Some(token)) {
            let session = dropped.session_token();
            if !session.is_empty() && !context.owns_session_token(session) {
                self.session_index
                    .remove_if(session, |_, owner| owner == principal_id);
            }
        }
    }

    /// Context owning `session_token` as its current or previous session token.
    pub fn context_for_session_token(
        &self,
        session_token: &str,
    ) -> Result<Arc<AuthenticationContext>> {
        if !session_token.is_empty() {
            if let Some(context) = self.indexed_context(session_token) {
                return Ok(context);
            }
            if let Some(context) = self.scan_for_session_token(session_token) {
                self.session_index
                    .insert(session_token.to_string(), context.principal_id().to_string());
                return Ok(context);
            }
        }

        Err(Error::unregistered(
            "No registered principal owns the presented session token",
            "Register the application or user with the gateway and authenticate it again",
        ))
    }

    fn indexed_context(&self, session_token: &str) -> Option<Arc<AuthenticationContext>> {
        let principal_id = self
            .session_index
            .get(session_token)
            .map(|entry| entry.value().clone())?;

        match self.get(&principal_id) {
            Some(context) if context.owns_session_token(session_token) => Some(context),
            _ => {
                self.session_index
                    .remove_if(session_token, |_, owner| *owner == principal_id);
                None
            },
        }
    }

    fn scan_for_session_token(&self, session_token: &str) -> Option<Arc<AuthenticationContext>> {
        let contexts: Vec<Arc<AuthenticationContext>> = self
            .contexts
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        contexts
            .iter()
            .find(|c| c.token().session_token() == session_token)
            .or_else(|| {
                contexts
                    .iter()
                    .find(|c| c.previous_token().session_token() == session_token)
            })
            .cloned()
    }

    fn unindex(&self, context: &AuthenticationContext) {
        let snapshot = context.snapshot();
        let principal_id = context.principal_id();
        for token in [snapshot.current, snapshot.previous] {
            if !token.is_void() {
                self.session_index
                    .remove_if(token.session_token(), |_, owner| owner == principal_id);
            }
        }
    }

    /// Number of registered principals.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Whether no principal is registered.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Identifiers of every registered principal.
    pub fn principal_ids(&self) -> Vec<String> {
        self.contexts.iter().map(|e| e.key().clone()).collect()
    }
}

impl TransportProvider for PrincipalRegistry {
    fn transport_for_principal(&self, principal_id: &str, service: &str) -> Result<HttpTransport> {
        self.context(principal_id)?.transport_for(service)
    }

    fn transport_for_session_token(
        &self,
        session_token: &str,
        service: &str,
    ) -> Result<HttpTransport> {
        self.context_for_session_token(session_token)?
            .transport_for(service)
    }
}
