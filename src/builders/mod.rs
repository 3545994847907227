//! Builders to construct control-plane components from configuration.

pub mod controller_builder;

pub use controller_builder::{
    build_controller, build_controller_with_hooks, BreakerHook, ControllerHooks, MonitorHook,
};
