pub mod audit;
pub mod metrics;
pub mod permission;
pub mod profile;
pub mod recommend;
pub mod tenant;
pub mod token;
pub mod user;
