//! Recovery from expired access credentials.
//!
//! When a call comes back 401 the [`RefreshCoordinator`] exchanges the stored
//! refresh credential for a new pair and prepares the call for exactly one
//! replay.  Concurrent 401s share a single exchange: the first caller starts
//! it and later callers await the same outcome, so a refresh credential is
//! never presented twice after the backend has rotated it.
//!
//! If the exchange fails the credential pair is cleared and
//! [`SessionEvent::Invalidated`] is broadcast; the owning application decides
//! how to send the user back to login.

use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::credentials::CredentialStore;
use crate::error::{Error, Result};
use crate::observability::{
    REFRESH_EXCHANGES, REFRESH_FAILURES, REFRESH_JOINS, REFRESH_STALE_REPLAYS,
};
use crate::transport::{CallDescriptor, Transport, TransportResponse};
use crate::types::{CredentialPair, RefreshRequest, TokenResponse};

const REFRESH_PATH: &str = "/auth/refresh";
const EVENT_CAPACITY: usize = 16;

/// Authentication lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new credential pair was stored.
    Refreshed,
    /// The refresh credential was rejected or unavailable and the pair was cleared.
    Invalidated {
        /// Why the session ended.
        reason: String,
    },
}

type SharedRefresh = Shared<BoxFuture<'static, Result<CredentialPair>>>;

/// Exchanges refresh credentials on behalf of failed calls.
pub struct RefreshCoordinator {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    in_flight: Mutex<Option<SharedRefresh>>,
    events: broadcast::Sender<SessionEvent>,
}

impl RefreshCoordinator {
    /// Creates a coordinator that refreshes through `transport` into `credentials`.
    pub fn new(transport: Arc<dyn Transport>, credentials: Arc<dyn CredentialStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            transport,
            credentials,
            in_flight: Mutex::new(None),
            events,
        }
    }

    /// Subscribes to session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Handles a 401 received for `call`.
    ///
    /// On `Ok` the call has been flagged as retried and carries a fresh access
    /// credential; the caller replays it.  A call that was already retried is
    /// not refreshed again: the original failure is returned.  A failed
    /// exchange returns [`Error::SessionInvalidated`].
    pub async fn recover(&self, call: &mut CallDescriptor, failed: TransportResponse) -> Result<()> {
        if !call.mark_retried() {
            debug!(path = call.path(), "authorization failed after replay; giving up");
            return Err(failed.into_error().await);
        }
        drop(failed);

        // Another call may have rotated the pair since this one was sent.
        if let Some(stored) = self.credentials.get()
            && call.access_token() != Some(stored.access.as_str())
        {
            REFRESH_STALE_REPLAYS.click();
            debug!(path = call.path(), "replaying with credential refreshed by another call");
            call.authorize(Some(&stored.access));
            return Ok(());
        }

        let pair = self.refresh().await?;
        call.authorize(Some(&pair.access));
        Ok(())
    }

    /// Exchanges the stored refresh credential for a new pair.
    ///
    /// If an exchange is already underway the caller awaits that one instead
    /// of starting another.
    pub async fn refresh(&self) -> Result<CredentialPair> {
        let shared = {
            let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(shared) => {
                    REFRESH_JOINS.click();
                    debug!("joining refresh already in flight");
                    shared.clone()
                }
                None => {
                    let shared = exchange(
                        Arc::clone(&self.transport),
                        Arc::clone(&self.credentials),
                        self.events.clone(),
                    )
                    .boxed()
                    .shared();
                    *slot = Some(shared.clone());
                    shared
                }
            }
        };

        let outcome = shared.clone().await;

        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&shared)) {
            *slot = None;
        }
        outcome
    }
}

async fn exchange(
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    events: broadcast::Sender<SessionEvent>,
) -> Result<CredentialPair> {
    let Some(current) = credentials.get() else {
        return Err(invalidate(
            credentials.as_ref(),
            &events,
            "no refresh credential stored".to_string(),
        ));
    };

    REFRESH_EXCHANGES.click();
    debug!("exchanging refresh credential");
    match request_new_pair(transport.as_ref(), current.refresh).await {
        Ok(pair) => {
            if let Err(err) = credentials.set(pair.clone()) {
                return Err(invalidate(credentials.as_ref(), &events, err.to_string()));
            }
            info!("access credential refreshed");
            let _ = events.send(SessionEvent::Refreshed);
            Ok(pair)
        }
        Err(err) => Err(invalidate(credentials.as_ref(), &events, err.to_string())),
    }
}

async fn request_new_pair(transport: &dyn Transport, refresh_token: String) -> Result<CredentialPair> {
    let call = CallDescriptor::post(REFRESH_PATH).with_json(&RefreshRequest { refresh_token })?;
    let response = transport.execute(&call).await?;
    if !response.is_success() {
        return Err(response.into_error().await);
    }
    let tokens: TokenResponse = response.json().await?;
    Ok(CredentialPair::from(&tokens))
}

fn invalidate(
    credentials: &dyn CredentialStore,
    events: &broadcast::Sender<SessionEvent>,
    reason: String,
) -> Error {
    REFRESH_FAILURES.click();
    warn!(reason = %reason, "refresh failed; ending session");
    if let Err(err) = credentials.clear() {
        warn!(error = %err, "failed to clear credentials");
    }
    let _ = events.send(SessionEvent::Invalidated {
        reason: reason.clone(),
    });
    Error::session_invalidated(reason)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::credentials::MemoryCredentialStore;
    use crate::transport::testing::{Reply, ScriptedTransport};

    fn tokens(access: &str, refresh: &str) -> Reply {
        Reply::json(
            200,
            json!({"access_token": access, "refresh_token": refresh, "token_type": "bearer"}),
        )
    }

    fn unauthorized() -> TransportResponse {
        TransportResponse::from_chunks(
            reqwest::StatusCode::UNAUTHORIZED,
            vec![bytes::Bytes::from_static(b"{\"detail\":\"Could not validate credentials\"}")],
        )
    }

    fn setup(transport: ScriptedTransport) -> (Arc<ScriptedTransport>, Arc<MemoryCredentialStore>, RefreshCoordinator) {
        let transport = Arc::new(transport);
        let store = Arc::new(MemoryCredentialStore::with_pair(CredentialPair::new("a0", "r0")));
        let coordinator = RefreshCoordinator::new(transport.clone(), store.clone());
        (transport, store, coordinator)
    }

    #[tokio::test]
    async fn first_401_refreshes_and_authorizes_replay() {
        let (transport, store, coordinator) =
            setup(ScriptedTransport::new().on("POST /auth/refresh", tokens("a1", "r1")));
        let mut events = coordinator.subscribe();

        let mut call = CallDescriptor::get("/auth/me");
        call.authorize(Some("a0"));
        coordinator.recover(&mut call, unauthorized()).await.unwrap();

        assert!(call.is_retried());
        assert_eq!(call.access_token(), Some("a1"));
        assert_eq!(store.get(), Some(CredentialPair::new("a1", "r1")));
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Refreshed);

        let refreshes = transport.calls_to("POST /auth/refresh");
        assert_eq!(refreshes.len(), 1);
        assert_eq!(refreshes[0].body, Some(json!({"refresh_token": "r0"})));
        assert_eq!(refreshes[0].access, None);
    }

    #[tokio::test]
    async fn second_401_is_final() {
        let (transport, _store, coordinator) =
            setup(ScriptedTransport::new().on("POST /auth/refresh", tokens("a1", "r1")));

        let mut call = CallDescriptor::get("/auth/me");
        call.authorize(Some("a0"));
        coordinator.recover(&mut call, unauthorized()).await.unwrap();
        let err = coordinator.recover(&mut call, unauthorized()).await.unwrap_err();

        assert!(err.is_authentication());
        assert!(err.to_string().contains("Could not validate credentials"));
        assert_eq!(transport.calls_to("POST /auth/refresh").len(), 1);
    }

    #[tokio::test]
    async fn rejected_refresh_invalidates_session() {
        let (_transport, store, coordinator) = setup(ScriptedTransport::new().on(
            "POST /auth/refresh",
            Reply::json(401, json!({"detail": "Invalid refresh token"})),
        ));
        let mut events = coordinator.subscribe();

        let mut call = CallDescriptor::get("/auth/me");
        call.authorize(Some("a0"));
        let err = coordinator.recover(&mut call, unauthorized()).await.unwrap_err();

        assert!(err.is_session_invalidated());
        assert!(store.get().is_none());
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::Invalidated {
                reason: "Authentication error: Invalid refresh token".to_string()
            }
        );
    }

    #[tokio::test]
    async fn network_failure_during_refresh_invalidates_session() {
        let (_transport, store, coordinator) = setup(ScriptedTransport::new().on(
            "POST /auth/refresh",
            Reply::Fail(Error::connection("connection refused", None)),
        ));

        let mut call = CallDescriptor::get("/auth/me");
        call.authorize(Some("a0"));
        let err = coordinator.recover(&mut call, unauthorized()).await.unwrap_err();

        assert!(err.is_session_invalidated());
        assert!(store.get().is_none());
    }

    #[tokio::test]
    async fn missing_refresh_credential_skips_exchange() {
        let transport = Arc::new(ScriptedTransport::new());
        let store = Arc::new(MemoryCredentialStore::new());
        let coordinator = RefreshCoordinator::new(transport.clone(), store.clone());

        let mut call = CallDescriptor::get("/auth/me");
        let err = coordinator.recover(&mut call, unauthorized()).await.unwrap_err();

        assert!(err.is_session_invalidated());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn stale_call_replays_with_already_rotated_pair() {
        let (transport, _store, coordinator) =
            setup(ScriptedTransport::new().on("POST /auth/refresh", tokens("a1", "r1")));

        // Sent before the rotation with a credential that is no longer current.
        let mut call = CallDescriptor::get("/auth/me");
        call.authorize(Some("a-older"));
        coordinator.recover(&mut call, unauthorized()).await.unwrap();

        assert_eq!(call.access_token(), Some("a0"));
        assert!(call.is_retried());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_refreshes_share_one_exchange() {
        let (transport, store, coordinator) = setup(ScriptedTransport::new().on(
            "POST /auth/refresh",
            tokens("a1", "r1").delayed(Duration::from_millis(50)),
        ));

        let (first, second, third) =
            tokio::join!(coordinator.refresh(), coordinator.refresh(), coordinator.refresh());

        assert_eq!(first.unwrap(), CredentialPair::new("a1", "r1"));
        assert_eq!(second.unwrap(), CredentialPair::new("a1", "r1"));
        assert_eq!(third.unwrap(), CredentialPair::new("a1", "r1"));
        assert_eq!(transport.calls_to("POST /auth/refresh").len(), 1);
        assert_eq!(store.get(), Some(CredentialPair::new("a1", "r1")));
    }

    #[tokio::test(start_paused = true)]
    async fn shared_failure_reaches_every_waiter() {
        let (transport, store, coordinator) = setup(ScriptedTransport::new().on(
            "POST /auth/refresh",
            Reply::json(401, json!({"detail": "Invalid refresh token"}))
                .delayed(Duration::from_millis(50)),
        ));

        let (first, second) = tokio::join!(coordinator.refresh(), coordinator.refresh());

        assert!(first.unwrap_err().is_session_invalidated());
        assert!(second.unwrap_err().is_session_invalidated());
        assert_eq!(transport.calls_to("POST /auth/refresh").len(), 1);
        assert!(store.get().is_none());
    }

    #[tokio::test]
    async fn sequential_refreshes_each_exchange() {
        let (transport, store, coordinator) = setup(
            ScriptedTransport::new()
                .on("POST /auth/refresh", tokens("a1", "r1"))
                .on("POST /auth/refresh", tokens("a2", "r2")),
        );

        coordinator.refresh().await.unwrap();
        coordinator.refresh().await.unwrap();

        let refreshes = transport.calls_to("POST /auth/refresh");
        assert_eq!(refreshes.len(), 2);
        assert_eq!(refreshes[1].body, Some(json!({"refresh_token": "r1"})));
        assert_eq!(store.get(), Some(CredentialPair::new("a2", "r2")));
    }
}
