pub mod agent;
pub mod conversation;
pub mod echo;
pub mod profile;
pub mod session;

pub use agent::{
    AgentError, AgentEvent, AgentEventStream, AgentHandle, AgentRuntime, Fragment, LiveRequest,
    LiveRequestQueue,
};
pub use conversation::{
    ConversationLog, ConversationRecord, ConversationStore, MemoryConversationStore, Role, Turn,
    TurnPayload,
};
pub use session::{Lifecycle, Modality, SessionContext, SessionState};
