pub mod gateway;

pub use gateway::{
    default_metrics, GatewayDecision, GatewayError, GatewayStage, OperatorOutcome, SafetyGateway, SigningOutcome,
};
