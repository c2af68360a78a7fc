//! Session construction
//!
//! [`S3StoreBuilder`] turns a region (and optionally a role to assume)
//! into a ready S3 client. Credentials resolve through the default chain:
//! environment, the named profile when one is configured, then instance
//! metadata.

use std::sync::Arc;

use anyhow::Result;
use aws_config::sts::AssumeRoleProvider;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use tracing::debug;

use s3sync_core::config::TransferSettings;
use s3sync_core::ports::object_store::{IObjectStore, IStoreBuilder};

use crate::client::S3ObjectStore;

/// Session name attached to assumed-role credentials.
const ROLE_SESSION_NAME: &str = "s3-synchronizer";

/// Builds S3 clients for the orchestrator.
#[derive(Debug, Clone)]
pub struct S3StoreBuilder {
    /// Credentials profile; empty means the default chain.
    profile: String,
    transfer: TransferSettings,
}

impl S3StoreBuilder {
    pub fn new(profile: impl Into<String>, transfer: TransferSettings) -> Self {
        Self {
            profile: profile.into(),
            transfer,
        }
    }
}

#[async_trait::async_trait]
impl IStoreBuilder for S3StoreBuilder {
    async fn build(
        &self,
        region: &str,
        role_arn: Option<&str>,
    ) -> Result<Arc<dyn IObjectStore>> {
        let region = Region::new(region.to_string());
        debug!(region = %region, role = role_arn.unwrap_or("-"), "building s3 client");

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region.clone());
        if !self.profile.is_empty() {
            loader = loader.profile_name(self.profile.as_str());
        }

        if let Some(role_arn) = role_arn {
            let provider = AssumeRoleProvider::builder(role_arn)
                .session_name(ROLE_SESSION_NAME)
                .region(region)
                .build()
                .await;
            loader = loader.credentials_provider(provider);
        }

        let config = loader.load().await;
        Ok(Arc::new(S3ObjectStore::new(
            Client::new(&config),
            self.transfer,
        )))
    }
}
