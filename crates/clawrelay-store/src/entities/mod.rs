//! Database entities

pub mod deployment;
pub mod deployment_secret;

pub use deployment::Entity as Deployment;
pub use deployment_secret::Entity as DeploymentSecret;

pub mod prelude {
    pub use super::deployment::Entity as Deployment;
    pub use super::deployment_secret::Entity as DeploymentSecret;
}
