//! Outbound side of the engine: gateways, locking and the dispatch loop.

pub mod dispatcher;
pub mod gateway;
pub mod locks;
pub mod ticker;

pub use dispatcher::{DispatchReport, Dispatcher};
pub use gateway::{DeliveryGateway, FallbackGateway, HttpGateway, HttpGatewayConfig, SendOutcome, gateway_from_env};
pub use locks::{EngineLocks, KeyedLocks};
pub use ticker::spawn_dispatch_ticker;
