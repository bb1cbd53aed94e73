// Public modules
pub mod chat_message;
pub mod chat_request;
pub mod chat_response;
pub mod conversation;
pub mod conversation_id;
pub mod credential_pair;
pub mod model_info;
pub mod stream_frame;
pub mod user;

// Re-exports
pub use chat_message::{ChatMessage, MessageId, MessageRole};
pub use chat_request::ChatRequest;
pub use chat_response::ChatResponse;
pub use conversation::{Conversation, ConversationDetail, CreateConversationRequest};
pub use conversation_id::ConversationId;
pub use credential_pair::CredentialPair;
pub use model_info::{ModelInfo, ModelsResponse};
pub use stream_frame::StreamFrame;
pub use user::{LoginRequest, RefreshRequest, RegisterRequest, TokenResponse, User};
