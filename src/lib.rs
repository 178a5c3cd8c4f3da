pub mod api;
pub mod chat;
pub mod config;
pub mod console;
pub mod countdown;
pub mod engine;
pub mod entities;
pub mod error;
pub mod external;
pub mod geofence;
pub mod lifecycle;
pub mod realtime;
pub mod telemetry;
