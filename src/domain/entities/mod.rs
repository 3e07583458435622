pub mod entitlement;
pub mod entitlement_operation;
pub mod event_log;
pub mod subscription_event;
