//! Wire types for the WebSocket protocol and the handshake query.

pub mod connect;
pub mod inbound;
pub mod outbound;

pub use connect::ConnectQuery;
pub use inbound::{
    ChangeConfigRequest, NewMessageRequest, Operation, RefreshWordRequest, SelectWordRequest,
};
pub use outbound::{
    ErrorPayload, ModelInfoPayload, NewMessageEndPayload, NewMessagePayload, RefreshWordPayload,
    ServerEvent,
};
