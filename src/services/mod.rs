/// Connection tokens, password digests and permission resolution.
pub mod authorization;
/// Packet registry and authorization gate.
pub mod dispatcher;
/// OpenAPI documentation generation.
pub mod documentation;
/// Image upload guards and storage.
pub mod files;
/// Registry handlers.
pub mod handlers;
/// Health check service.
pub mod health_service;
/// Peer server discovery.
pub mod mesh;
/// Outbound score announcements.
pub mod messaging;
/// Qualifier leaderboards and attempt accounting.
pub mod scoring;
/// Durable storage reconnect loop.
pub mod storage_supervisor;
/// WebSocket connection and message handling service.
pub mod websocket_service;
