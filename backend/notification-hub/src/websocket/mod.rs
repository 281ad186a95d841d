/// WebSocket transport for real-time notifications
///
/// Architecture:
/// 1. WsSession: one actor per connection, drives the session lifecycle
/// 2. ChannelTransport: per-session outbound buffers the dispatcher pushes into
/// 3. WebSocketMessage: JSON frames exchanged with the client

pub mod messages;
pub mod session;

pub use messages::WebSocketMessage;
pub use session::WsSession;
