#![forbid(unsafe_code)]

pub mod constants;
pub mod control;
pub mod dom;
pub mod hotkeys;
pub mod hover;
pub mod messages;
pub mod mutation;
pub mod runtime;
pub mod settings;
pub mod simulate;
pub mod site_rules;
pub mod store;
pub mod style;
