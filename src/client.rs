use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::credentials::CredentialStore;
use crate::error::Result;
use crate::observability::{
    CLIENT_REPLAYS, CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS, CLIENT_REQUESTS,
};
use crate::refresh::{RefreshCoordinator, SessionEvent};
use crate::sse::{FrameStream, decode_frames};
use crate::transport::{CallDescriptor, ReqwestTransport, Transport, TransportResponse};
use crate::types::{
    ChatRequest, ChatResponse, Conversation, ConversationDetail, ConversationId,
    CreateConversationRequest, CredentialPair, LoginRequest, ModelInfo, ModelsResponse,
    RegisterRequest, TokenResponse, User,
};

const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/v1/";
const BASE_URL_ENV: &str = "ZEROX_BASE_URL";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const CHAT_SEND_PATH: &str = "/chat/send";
const CONVERSATIONS_PATH: &str = "/chat/conversations";
const MODELS_PATH: &str = "/models";

/// Client for the ZeroX chat API.
///
/// Every call goes through [`ZeroX::send`], which attaches the stored access
/// credential and recovers from an expired one by refreshing and replaying
/// the call once.  Clones share the transport, the credential store, and the
/// refresh coordinator.
#[derive(Clone)]
pub struct ZeroX {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    refresh: Arc<RefreshCoordinator>,
}

impl ZeroX {
    /// Create a new client.
    ///
    /// The base URL is read from the ZEROX_BASE_URL environment variable and
    /// defaults to a backend on localhost.
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Result<Self> {
        Self::with_options(credentials, None, None)
    }

    /// Create a new client with custom settings.
    pub fn with_options(
        credentials: Arc<dyn CredentialStore>,
        base_url: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let base_url = match base_url {
            Some(url) => url,
            None => env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
        };
        let transport = ReqwestTransport::new(&base_url, timeout.unwrap_or(DEFAULT_TIMEOUT))?;
        Ok(Self::with_transport(Arc::new(transport), credentials))
    }

    /// Create a client over an arbitrary transport.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let refresh = Arc::new(RefreshCoordinator::new(
            Arc::clone(&transport),
            Arc::clone(&credentials),
        ));
        Self {
            transport,
            credentials,
            refresh,
        }
    }

    /// The credential store this client reads and writes.
    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// Subscribe to refresh and session-invalidation events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.refresh.subscribe()
    }

    /// Whether a credential pair is currently stored.
    pub fn is_authenticated(&self) -> bool {
        self.credentials.get().is_some()
    }

    /// Dispatch a call with the stored access credential attached.
    ///
    /// Sends unauthenticated when no pair is stored.  A 401 is handed to the
    /// refresh coordinator and the call is replayed at most once; the result
    /// of the replay is final.  Any other non-success status is returned as
    /// the corresponding [`Error`](crate::Error).
    pub async fn send(&self, mut call: CallDescriptor) -> Result<TransportResponse> {
        let stored = self.credentials.get();
        call.authorize(stored.as_ref().map(|pair| pair.access.as_str()));

        CLIENT_REQUESTS.click();
        debug!(method = %call.method(), path = call.path(), "dispatching call");
        let start = Instant::now();

        let outcome = loop {
            let response = match self.transport.execute(&call).await {
                Ok(response) => response,
                Err(err) => break Err(err),
            };
            if response.status() == StatusCode::UNAUTHORIZED {
                if let Err(err) = self.refresh.recover(&mut call, response).await {
                    break Err(err);
                }
                CLIENT_REPLAYS.click();
                debug!(method = %call.method(), path = call.path(), "replaying call");
                continue;
            }
            if !response.is_success() {
                break Err(response.into_error().await);
            }
            break Ok(response);
        };

        CLIENT_REQUEST_DURATION.add(start.elapsed().as_secs_f64());
        if let Err(err) = &outcome {
            CLIENT_REQUEST_ERRORS.click();
            debug!(method = %call.method(), path = call.path(), error = %err, "call failed");
        }
        outcome
    }

    async fn send_json<T: DeserializeOwned>(&self, call: CallDescriptor) -> Result<T> {
        self.send(call).await?.json().await
    }

    /// Sends a call that must not carry or refresh credentials.
    async fn send_unauthenticated(&self, call: CallDescriptor) -> Result<TransportResponse> {
        CLIENT_REQUESTS.click();
        debug!(method = %call.method(), path = call.path(), "dispatching unauthenticated call");
        let response = self.transport.execute(&call).await?;
        if !response.is_success() {
            CLIENT_REQUEST_ERRORS.click();
            return Err(response.into_error().await);
        }
        Ok(response)
    }

    async fn adopt_tokens(&self, call: CallDescriptor) -> Result<TokenResponse> {
        let tokens: TokenResponse = self.send_unauthenticated(call).await?.json().await?;
        self.credentials.set(CredentialPair::from(&tokens))?;
        Ok(tokens)
    }

    /// Log in and store the returned credential pair.
    pub async fn login(
        &self,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<TokenResponse> {
        let call = CallDescriptor::post("/auth/login").with_json(&LoginRequest {
            email: email.into(),
            password: password.into(),
        })?;
        let tokens = self.adopt_tokens(call).await?;
        info!("logged in");
        Ok(tokens)
    }

    /// Create an account and store the returned credential pair.
    pub async fn register(&self, request: RegisterRequest) -> Result<TokenResponse> {
        let call = CallDescriptor::post("/auth/register").with_json(&request)?;
        let tokens = self.adopt_tokens(call).await?;
        info!(username = %request.username, "registered");
        Ok(tokens)
    }

    /// Log out.
    ///
    /// The backend is told on a best-effort basis; the stored pair is cleared
    /// whether or not that succeeds.
    pub async fn logout(&self) -> Result<()> {
        if self.is_authenticated()
            && let Err(err) = self.send(CallDescriptor::post("/auth/logout")).await
        {
            warn!(error = %err, "logout request failed; clearing credentials anyway");
        }
        self.credentials.clear()
    }

    /// Fetch the logged-in account.
    pub async fn me(&self) -> Result<User> {
        self.send_json(CallDescriptor::get("/auth/me")).await
    }

    /// List conversations, most recently updated first.
    pub async fn list_conversations(&self, skip: u32, limit: u32) -> Result<Vec<Conversation>> {
        let call = CallDescriptor::get(CONVERSATIONS_PATH)
            .with_query("skip", skip)
            .with_query("limit", limit);
        self.send_json(call).await
    }

    /// Fetch a conversation with its messages.
    pub async fn get_conversation(&self, id: ConversationId) -> Result<ConversationDetail> {
        self.send_json(CallDescriptor::get(format!("{CONVERSATIONS_PATH}/{id}")))
            .await
    }

    /// Create an empty conversation.
    pub async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<Conversation> {
        let call = CallDescriptor::post(CONVERSATIONS_PATH).with_json(&request)?;
        self.send_json(call).await
    }

    /// Delete a conversation and its messages.
    pub async fn delete_conversation(&self, id: ConversationId) -> Result<()> {
        self.send(CallDescriptor::delete(format!("{CONVERSATIONS_PATH}/{id}")))
            .await?;
        Ok(())
    }

    /// List the models the logged-in account may use.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response: ModelsResponse = self.send_json(CallDescriptor::get(MODELS_PATH)).await?;
        Ok(response.models)
    }

    /// List the free models.  Works without logging in.
    pub async fn list_free_models(&self) -> Result<Vec<ModelInfo>> {
        let call = CallDescriptor::get(format!("{MODELS_PATH}/free"));
        let response: ModelsResponse = self.send_unauthenticated(call).await?.json().await?;
        Ok(response.models)
    }

    /// Send a chat message and wait for the complete reply.
    pub async fn send_chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let call = CallDescriptor::post(CHAT_SEND_PATH).with_json(&request.with_stream(false))?;
        self.send_json(call).await
    }

    /// Send a chat message and stream the reply.
    ///
    /// A non-success status is reported here, before any frame is decoded.
    /// The returned stream is single-use; dropping it closes the connection.
    pub async fn stream_chat(&self, request: ChatRequest) -> Result<FrameStream> {
        let call = CallDescriptor::post(CHAT_SEND_PATH)
            .with_json(&request.with_stream(true))?
            .streaming();
        let response = self.send(call).await?;
        Ok(decode_frames(response.into_byte_stream()))
    }
}

impl std::fmt::Debug for ZeroX {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZeroX")
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}
