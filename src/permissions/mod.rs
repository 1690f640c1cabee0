//! Permission model: actions, security levels, the effective permission
//! resolver, risk scoring and the default catalog seed.

pub mod action;
pub mod catalog;
pub mod resolver;
pub mod risk;

pub use action::{actions_from_strings, actions_to_strings, parse_action_list, Action, ActionSet, SecurityLevel};
pub use catalog::{seed_defaults, CatalogSeed, SeedError};
pub use resolver::{resolve, EffectivePermission, EffectivePermissions, PermissionSource};
pub use risk::{assess, baseline, ChangeProfile, RiskAssessment};
