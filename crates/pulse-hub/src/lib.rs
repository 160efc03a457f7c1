pub mod alerts;
pub mod gateway;
pub mod history;
pub mod hub;
pub mod policy;
pub mod reconnect;
pub mod registry;
pub mod session;

pub use alerts::{default_rules, AlertPipeline, Comparator, ThresholdRule};
pub use gateway::{BuiltinExecutor, CommandExecutor, CommandGateway, ExecutionError};
pub use history::HistoryRing;
pub use hub::BroadcastHub;
pub use policy::{default_policy, CommandSpec, ParamKind, ParamSpec, PolicyTable};
pub use reconnect::{BackoffPolicy, ConnectionPhase, ReconnectController};
pub use registry::SessionRegistry;
pub use session::{OutboundQueue, PushOutcome, Session, Subscription};
