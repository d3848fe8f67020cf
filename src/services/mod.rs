/// Client role: mirrors the master onto the local display.
pub mod client;
/// Local round loop of a master display.
pub mod engine;
/// Forced-number polling and the override it produces.
pub mod forced_number;
/// Health check service.
pub mod health_service;
/// Master role: authoritative state and broadcasts.
pub mod master;
/// Node assembly and shutdown.
pub mod node;
/// Channel endpoint mirrored onto the SSE hub.
pub mod publisher;
/// Round persistence and spin-log loading.
pub mod round_data;
/// Server-Sent Events streaming of sync traffic.
pub mod sse_service;
/// State inspection and visibility reports.
pub mod state_service;
pub mod visibility;
/// WebSocket relay for remote displays.
pub mod websocket_service;
