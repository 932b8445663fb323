pub mod alert_service;
pub mod audit_logger;
pub mod clock_sync;
pub mod execution_engine;
pub mod health_server;
pub mod instance_lock;
pub mod metrics;
pub mod order_state_machine;
pub mod portfolio_trimmer;
pub mod position_manager;
pub mod rate_limiter;
pub mod risk_engine;
pub mod secret_rotation;
pub mod strategy_registry;
pub mod trading_loop;
pub mod universe;
